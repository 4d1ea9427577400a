use std::io::Read;

use crest::{connect, OpCode};

fn main() -> anyhow::Result<()> {
    let mut ws = connect("wss://ws.postman-echo.com/raw/")?;

    ws.send("hello over websocket")?;

    loop {
        let mut message = ws.read_message()?;
        let op = message.op;
        let mut body = Vec::new();
        message.read_to_end(&mut body)?;
        println!("({op:?}) ({}) {}", body.len(), String::from_utf8_lossy(&body));
        if op == OpCode::Text {
            break;
        }
    }

    ws.close()?;
    Ok(())
}
