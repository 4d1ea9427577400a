//! Constructors: URL or request in, connected websocket out.

use std::io;
use std::io::{Read, Write};
use std::net::TcpStream;

use http::Request;
use url::Url;

use crate::cancel::CancelToken;
use crate::connection::Connection;
use crate::error::Error;
use crate::handshake;
use crate::stream::{MaybeTlsStream, Shared};

/// Connection type produced by the URL and request constructors.
pub type DialedConnection = Connection<Shared<MaybeTlsStream>, Shared<MaybeTlsStream>>;

/// Connects to `url` (`ws`, `wss`, `http` or `https` scheme) and
/// performs the upgrade handshake. The default dialer honours the
/// `ALL_PROXY` environment variable.
pub fn connect(url: &str) -> Result<DialedConnection, Error> {
    let parsed = Url::parse(url)?;
    match parsed.scheme() {
        "ws" | "wss" | "http" | "https" => {}
        scheme => Err(io::Error::other(format!("unrecognised url scheme: {scheme}")))?,
    }
    let request = Request::builder()
        .uri(url)
        .body(())
        .map_err(|err| Error::Handshake(format!("invalid url: {err}")))?;
    connect_with_request(&CancelToken::new(), request)
}

/// Connects using a caller-built request; extra headers (authentication
/// and the like) pass through the handshake untouched. TLS is selected
/// by the `wss`/`https` scheme.
pub fn connect_with_request(cancel: &CancelToken, request: Request<()>) -> Result<DialedConnection, Error> {
    if matches!(request.uri().scheme_str(), Some("wss") | Some("https")) {
        #[cfg(feature = "tls")]
        {
            return connect_with_dialer(cancel, dial_tls, request);
        }
        #[cfg(not(feature = "tls"))]
        {
            return Err(Error::Io(io::Error::other(
                "secure url requires the `tls` feature",
            )));
        }
    }
    connect_with_dialer(cancel, dial_plain, request)
}

/// Connects through a caller-supplied dialer given a `host:port` string.
/// The dialer owns transport concerns (TCP options, TLS, proxies); this
/// function performs the client handshake on whatever stream it returns
/// and masks all outgoing payloads.
pub fn connect_with_dialer<S, D>(
    cancel: &CancelToken,
    dialer: D,
    request: Request<()>,
) -> Result<Connection<Shared<S>, Shared<S>>, Error>
where
    S: Read + Write,
    D: FnOnce(&CancelToken, &str) -> io::Result<S>,
{
    let addr = remote_addr(&request)?;
    let mut stream = dialer(cancel, &addr)?;
    handshake::client_handshake(&mut stream, &request)?;
    let (writer, reader) = Shared::pair(stream);
    Ok(Connection::with_cancel(writer, reader, true, cancel.clone()))
}

/// Server side of the upgrade for a request the embedding HTTP server
/// already parsed, with the stream pair hijacked from its machinery.
pub fn accept<W: Write, R: Read>(mut writer: W, reader: R, request: &Request<()>) -> Result<Connection<W, R>, Error> {
    handshake::server_handshake(&mut writer, request)?;
    Ok(Connection::new(writer, reader, false))
}

/// Reads one HTTP request off `reader`, then performs the server side of
/// the upgrade.
pub fn server_pair<W: Write, R: Read>(writer: W, mut reader: R) -> Result<Connection<W, R>, Error> {
    let head = handshake::read_head(&mut reader)?;
    let request = handshake::parse_request(&head)?;
    accept(writer, reader, &request)
}

fn remote_addr(request: &Request<()>) -> Result<String, Error> {
    let uri = request.uri();
    let host = uri
        .host()
        .ok_or_else(|| Error::Handshake("request uri has no host".to_string()))?;
    let port = uri.port_u16().unwrap_or(match uri.scheme_str() {
        Some("wss") | Some("https") => 443,
        _ => 80,
    });
    Ok(format!("{host}:{port}"))
}

fn dial_plain(cancel: &CancelToken, addr: &str) -> io::Result<MaybeTlsStream> {
    Ok(MaybeTlsStream::Plain(dial_tcp(cancel, addr)?))
}

#[cfg(feature = "tls")]
fn dial_tls(cancel: &CancelToken, addr: &str) -> io::Result<MaybeTlsStream> {
    let stream = dial_tcp(cancel, addr)?;
    let server_name = addr.rsplit_once(':').map_or(addr, |(host, _)| host);
    crate::stream::wrap_tls(stream, server_name).map_err(io::Error::from)
}

/// Establishes the TCP leg, tunnelling through `ALL_PROXY` when set.
fn dial_tcp(cancel: &CancelToken, addr: &str) -> io::Result<TcpStream> {
    cancel.check().map_err(io::Error::from)?;
    match proxy_from_env() {
        Some(proxy) => dial_through_proxy(&proxy, addr),
        None => TcpStream::connect(addr),
    }
}

fn proxy_from_env() -> Option<Url> {
    let raw = std::env::var("ALL_PROXY").ok()?;
    Url::parse(&raw).ok()
}

fn dial_through_proxy(proxy: &Url, addr: &str) -> io::Result<TcpStream> {
    let host = proxy
        .host_str()
        .ok_or_else(|| io::Error::other("ALL_PROXY url has no host"))?;
    let port = proxy.port_or_known_default().unwrap_or(8080);
    let mut stream = TcpStream::connect((host, port))?;

    stream.write_all(format!("CONNECT {addr} HTTP/1.1\r\nHost: {addr}\r\n\r\n").as_bytes())?;
    let head = handshake::read_head(&mut stream).map_err(io::Error::from)?;

    let mut headers = [httparse::EMPTY_HEADER; 16];
    let mut response = httparse::Response::new(&mut headers);
    response
        .parse(&head)
        .map_err(|err| io::Error::other(format!("malformed proxy response: {err}")))?;
    match response.code {
        Some(code) if (200..300).contains(&code) => Ok(stream),
        code => Err(io::Error::other(format!(
            "proxy CONNECT failed with status {code:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Status;
    use crate::frame::Frame;
    use crate::protocol::OpCode;
    use std::io::Cursor;

    const UPGRADE_REQUEST: &str = "GET /chat HTTP/1.1\r\nHost: server.example.com\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";

    #[test]
    fn should_reject_unknown_scheme() {
        assert!(connect("ftp://example.com/ws").is_err());
    }

    #[test]
    fn should_reject_invalid_url() {
        assert!(matches!(connect("not a url"), Err(Error::UrlParse(_))));
    }

    #[test]
    fn should_default_ports_by_scheme() {
        let request = Request::builder().uri("ws://example.com/ws").body(()).unwrap();
        assert_eq!("example.com:80", remote_addr(&request).unwrap());

        let request = Request::builder().uri("wss://example.com/ws").body(()).unwrap();
        assert_eq!("example.com:443", remote_addr(&request).unwrap());

        let request = Request::builder().uri("ws://example.com:9001/ws").body(()).unwrap();
        assert_eq!("example.com:9001", remote_addr(&request).unwrap());
    }

    #[test]
    fn should_accept_via_server_pair() {
        // the frame after the head must stay unread until the caller asks
        let mut input = UPGRADE_REQUEST.as_bytes().to_vec();
        let mut frame = Vec::new();
        Frame::from_slice(true, true, OpCode::Text, b"hi")
            .encode(&mut frame, &CancelToken::new())
            .unwrap();
        input.extend(&frame);

        let mut connection = server_pair(Vec::new(), Cursor::new(input)).unwrap();
        assert_eq!(Status::Open, connection.status());

        let mut message = connection.read_message().unwrap();
        assert_eq!(OpCode::Text, message.op);
        let mut body = String::new();
        message.read_to_string(&mut body).unwrap();
        assert_eq!("hi", body);
    }

    #[test]
    fn should_reject_bad_version_via_server_pair() {
        let request = UPGRADE_REQUEST.replace("Sec-WebSocket-Version: 13", "Sec-WebSocket-Version: 8");
        let err = server_pair(Vec::new(), Cursor::new(request.into_bytes())).unwrap_err();
        assert!(matches!(err, Error::Handshake(_)));
    }
}
