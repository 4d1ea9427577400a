//! Opening handshake: key derivation plus the client and server sides of
//! the HTTP upgrade exchange.

use std::io::{Read, Write};

use base64::engine::general_purpose;
use base64::Engine;
use http::{header, Request, StatusCode};
use rand::{thread_rng, Rng};
use sha1::{Digest, Sha1};

use crate::error::Error;

const MAGIC_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_HEADERS: usize = 64;
const MAX_HEAD_LEN: usize = 16 * 1024;

/// Freshly generated `Sec-WebSocket-Key` nonce: 16 random bytes, base64.
pub fn sec_websocket_key() -> String {
    let mut rng = thread_rng();
    let nonce: [u8; 16] = rng.gen();
    general_purpose::STANDARD.encode(nonce)
}

/// Accept key proof: `base64(SHA1(key + magic GUID))`.
pub fn sec_accept_key(key: &str) -> String {
    let mut sha = Sha1::new();
    sha.update(key.as_bytes());
    sha.update(MAGIC_GUID.as_bytes());
    general_purpose::STANDARD.encode(sha.finalize())
}

/// Performs the client side of the upgrade exchange over `stream`.
///
/// The request's `Host`, `Connection`, `Upgrade`, `Sec-WebSocket-Version`
/// and `Sec-WebSocket-Key` headers are controlled here; everything else
/// the caller set is sent through untouched.
pub(crate) fn client_handshake<S: Read + Write>(stream: &mut S, request: &Request<()>) -> Result<(), Error> {
    client_handshake_with_key(stream, request, &sec_websocket_key())
}

fn client_handshake_with_key<S: Read + Write>(
    stream: &mut S,
    request: &Request<()>,
    key: &str,
) -> Result<(), Error> {
    write_request(stream, request, key)?;
    let raw = read_head(stream)?;

    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut response = httparse::Response::new(&mut headers);
    response
        .parse(&raw)
        .map_err(|err| Error::Handshake(format!("malformed upgrade response: {err}")))?;

    let code = response.code.unwrap_or(0);
    if code != StatusCode::SWITCHING_PROTOCOLS.as_u16() {
        return Err(Error::Handshake(format!("unexpected status code {code}")));
    }
    let response_headers: &[httparse::Header] = &*response.headers;
    let connection = find_header(response_headers, "connection").unwrap_or("");
    if !connection.to_ascii_lowercase().contains("upgrade") {
        return Err(Error::Handshake(
            "response header `connection` does not contain 'upgrade'".to_string(),
        ));
    }
    let upgrade = find_header(response_headers, "upgrade").unwrap_or("");
    if !upgrade.to_ascii_lowercase().contains("websocket") {
        return Err(Error::Handshake(
            "response header `upgrade` does not contain 'websocket'".to_string(),
        ));
    }
    let accept = find_header(response_headers, "sec-websocket-accept").unwrap_or("");
    if accept != sec_accept_key(key) {
        return Err(Error::Handshake(
            "`sec-websocket-accept` key mismatch".to_string(),
        ));
    }
    Ok(())
}

fn write_request<S: Write>(stream: &mut S, request: &Request<()>, key: &str) -> Result<(), Error> {
    let uri = request.uri();
    let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
    let host = match request.headers().get(header::HOST) {
        Some(value) => value
            .to_str()
            .map_err(|_| Error::Handshake("invalid `host` header value".to_string()))?,
        None => uri
            .host()
            .ok_or_else(|| Error::Handshake("request has no host".to_string()))?,
    };

    let mut head = format!("GET {target} HTTP/1.1\r\nHost: {host}\r\n");
    for (name, value) in request.headers() {
        let name = name.as_str();
        if matches!(
            name,
            "host" | "connection" | "upgrade" | "sec-websocket-key" | "sec-websocket-version"
        ) {
            continue;
        }
        let value = value
            .to_str()
            .map_err(|_| Error::Handshake(format!("invalid `{name}` header value")))?;
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("Upgrade: websocket\r\n");
    head.push_str("Connection: upgrade\r\n");
    head.push_str(&format!("Sec-WebSocket-Key: {key}\r\n"));
    head.push_str("Sec-WebSocket-Version: 13\r\n");
    head.push_str("\r\n");

    stream.write_all(head.as_bytes())?;
    stream.flush()?;
    Ok(())
}

/// Validates the client's upgrade request and writes the 101 response.
pub(crate) fn server_handshake<W: Write>(writer: &mut W, request: &Request<()>) -> Result<(), Error> {
    let connection = header_str(request, header::CONNECTION);
    if !connection.to_ascii_lowercase().contains("upgrade") {
        return Err(Error::Handshake(
            "request header `connection` does not contain 'upgrade'".to_string(),
        ));
    }
    let upgrade = header_str(request, header::UPGRADE);
    if !upgrade.to_ascii_lowercase().contains("websocket") {
        return Err(Error::Handshake(
            "request header `upgrade` does not contain 'websocket'".to_string(),
        ));
    }
    let version = header_str(request, header::SEC_WEBSOCKET_VERSION);
    if version != "13" {
        return Err(Error::Handshake(
            "request header `sec-websocket-version` is not '13'".to_string(),
        ));
    }

    let accept = sec_accept_key(header_str(request, header::SEC_WEBSOCKET_KEY));
    let response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nSec-Websocket-Accept: {accept}\r\nUpgrade: websocket\r\nConnection: upgrade\r\n\r\n"
    );
    writer.write_all(response.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Parses one HTTP request head into typed form.
pub(crate) fn parse_request(raw: &[u8]) -> Result<Request<()>, Error> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut headers);
    parsed
        .parse(raw)
        .map_err(|err| Error::Handshake(format!("malformed upgrade request: {err}")))?;

    let mut builder = Request::builder()
        .method(parsed.method.unwrap_or("GET"))
        .uri(parsed.path.unwrap_or("/"));
    for h in parsed.headers.iter() {
        builder = builder.header(h.name, h.value);
    }
    builder
        .body(())
        .map_err(|err| Error::Handshake(format!("malformed upgrade request: {err}")))
}

/// Reads the HTTP head off `stream` one byte at a time, stopping at the
/// blank line. Bytes past the head belong to the frame codec, so
/// over-reading is not an option here.
pub(crate) fn read_head<S: Read + ?Sized>(stream: &mut S) -> Result<Vec<u8>, Error> {
    let mut head = Vec::with_capacity(512);
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte)?;
        if n == 0 {
            return Err(Error::ShortRead);
        }
        head.push(byte[0]);
        if head.ends_with(b"\r\n\r\n") {
            return Ok(head);
        }
        if head.len() > MAX_HEAD_LEN {
            return Err(Error::Handshake("upgrade head too large".to_string()));
        }
    }
}

fn find_header<'b>(headers: &[httparse::Header<'b>], name: &str) -> Option<&'b str> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .and_then(|h| std::str::from_utf8(h.value).ok())
}

fn header_str(request: &Request<()>, name: header::HeaderName) -> &str {
    request
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::io::Cursor;

    const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";
    const SAMPLE_ACCEPT: &str = "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=";

    /// Reads from a scripted response, records everything written.
    struct ScriptedStream {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl ScriptedStream {
        fn new(input: &str) -> Self {
            Self {
                input: Cursor::new(input.as_bytes().to_vec()),
                output: Vec::new(),
            }
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for ScriptedStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.output.write(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn upgrade_request() -> Request<()> {
        Request::builder().uri("ws://example.com/chat").body(()).unwrap()
    }

    #[test]
    fn should_compute_rfc_sample_accept_key() {
        assert_eq!(SAMPLE_ACCEPT, sec_accept_key(SAMPLE_KEY));
    }

    #[test]
    fn should_generate_sixteen_byte_nonce() {
        let key = sec_websocket_key();
        let nonce = general_purpose::STANDARD.decode(&key).unwrap();
        assert_eq!(16, nonce.len());
        assert_ne!(key, sec_websocket_key());
    }

    #[test]
    fn should_complete_client_handshake() {
        let mut stream = ScriptedStream::new(&format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {SAMPLE_ACCEPT}\r\n\r\n"
        ));
        client_handshake_with_key(&mut stream, &upgrade_request(), SAMPLE_KEY).unwrap();

        let sent = String::from_utf8(stream.output).unwrap();
        assert!(sent.starts_with("GET /chat HTTP/1.1\r\n"));
        assert!(sent.contains("Host: example.com\r\n"));
        assert!(sent.contains("Upgrade: websocket\r\n"));
        assert!(sent.contains("Connection: upgrade\r\n"));
        assert!(sent.contains(&format!("Sec-WebSocket-Key: {SAMPLE_KEY}\r\n")));
        assert!(sent.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(sent.ends_with("\r\n\r\n"));
    }

    #[test]
    fn should_override_handshake_headers_but_pass_others_through() {
        let request = Request::builder()
            .uri("ws://example.com/feed?symbols=all")
            .header("connection", "keep-alive")
            .header("sec-websocket-version", "8")
            .header("authorization", "Bearer token")
            .body(())
            .unwrap();
        let mut stream = ScriptedStream::new(&format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {SAMPLE_ACCEPT}\r\n\r\n"
        ));
        client_handshake_with_key(&mut stream, &request, SAMPLE_KEY).unwrap();

        let sent = String::from_utf8(stream.output).unwrap();
        assert!(sent.starts_with("GET /feed?symbols=all HTTP/1.1\r\n"));
        assert!(sent.contains("authorization: Bearer token\r\n"));
        assert!(!sent.contains("keep-alive"));
        assert!(sent.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(!sent.contains("sec-websocket-version: 8"));
    }

    #[test]
    fn should_reject_non_switching_status() {
        let mut stream = ScriptedStream::new("HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n");
        let err = client_handshake_with_key(&mut stream, &upgrade_request(), SAMPLE_KEY).unwrap_err();
        assert!(matches!(err, Error::Handshake(ref msg) if msg.contains("status code 200")));
    }

    #[test]
    fn should_reject_missing_upgrade_header() {
        let mut stream = ScriptedStream::new(&format!(
            "HTTP/1.1 101 Switching Protocols\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {SAMPLE_ACCEPT}\r\n\r\n"
        ));
        let err = client_handshake_with_key(&mut stream, &upgrade_request(), SAMPLE_KEY).unwrap_err();
        assert!(matches!(err, Error::Handshake(ref msg) if msg.contains("upgrade")));
    }

    #[test]
    fn should_reject_accept_key_mismatch() {
        let mut stream = ScriptedStream::new(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: wrong=\r\n\r\n",
        );
        let err = client_handshake_with_key(&mut stream, &upgrade_request(), SAMPLE_KEY).unwrap_err();
        assert!(matches!(err, Error::Handshake(ref msg) if msg.contains("mismatch")));
    }

    #[test]
    fn should_write_upgrade_response_verbatim() {
        let request = Request::builder()
            .uri("/chat")
            .header("connection", "Upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "13")
            .header("sec-websocket-key", SAMPLE_KEY)
            .body(())
            .unwrap();
        let mut out = Vec::new();
        server_handshake(&mut out, &request).unwrap();
        assert_eq!(
            format!(
                "HTTP/1.1 101 Switching Protocols\r\nSec-Websocket-Accept: {SAMPLE_ACCEPT}\r\nUpgrade: websocket\r\nConnection: upgrade\r\n\r\n"
            ),
            String::from_utf8(out).unwrap()
        );
    }

    #[test]
    fn should_reject_wrong_version() {
        let request = Request::builder()
            .uri("/chat")
            .header("connection", "Upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-version", "8")
            .header("sec-websocket-key", SAMPLE_KEY)
            .body(())
            .unwrap();
        let mut out = Vec::new();
        let err = server_handshake(&mut out, &request).unwrap_err();
        assert!(matches!(err, Error::Handshake(ref msg) if msg.contains("sec-websocket-version")));
        assert!(out.is_empty());
    }

    #[test]
    fn should_reject_request_without_upgrade_intent() {
        let request = Request::builder()
            .uri("/chat")
            .header("connection", "keep-alive")
            .body(())
            .unwrap();
        let mut out = Vec::new();
        let err = server_handshake(&mut out, &request).unwrap_err();
        assert!(matches!(err, Error::Handshake(ref msg) if msg.contains("connection")));
    }

    #[test]
    fn should_parse_request_head() {
        let raw = b"GET /chat HTTP/1.1\r\nHost: server.example.com\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        let request = parse_request(raw).unwrap();
        assert_eq!("/chat", request.uri().path());
        assert_eq!(
            SAMPLE_KEY,
            request.headers().get("sec-websocket-key").unwrap().to_str().unwrap()
        );
    }

    #[test]
    fn should_stop_reading_head_at_blank_line() {
        let mut stream = Cursor::new(b"HTTP/1.1 101 S\r\n\r\n\x81\x00".to_vec());
        let head = read_head(&mut stream).unwrap();
        assert!(head.ends_with(b"\r\n\r\n"));
        assert_eq!(18, stream.position());
    }

    #[test]
    fn should_fail_head_read_on_eof() {
        let mut stream = Cursor::new(b"HTTP/1.1 101".to_vec());
        let err = read_head(&mut stream).unwrap_err();
        assert!(matches!(err, Error::ShortRead));
    }
}
