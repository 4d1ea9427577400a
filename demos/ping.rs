use crest::connect;

fn main() -> anyhow::Result<()> {
    let mut ws = connect("wss://ws.postman-echo.com/raw/")?;

    ws.ping()?;
    println!("received pong, connection alive");

    ws.close()?;
    Ok(())
}
