//! Stream adapters used by the dialing layer.

use std::io;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};

#[cfg(feature = "tls")]
use crate::error::Error;

/// Splits one full-duplex stream into a pair of handles over the same
/// underlying channel.
///
/// The connection facade drives its reads and writes strictly
/// sequentially, so the inner lock is never contended through
/// [`crate::Connection`]. Callers that want truly independent halves
/// (for a reader task and a writer task in parallel) should build the
/// connection from two one-way streams instead.
#[derive(Debug)]
pub struct Shared<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Shared<S> {
    pub fn new(stream: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(stream)),
        }
    }

    /// Writer and reader handles over the same stream.
    pub fn pair(stream: S) -> (Shared<S>, Shared<S>) {
        let writer = Shared::new(stream);
        let reader = writer.clone();
        (writer, reader)
    }
}

impl<S> Clone for Shared<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: Read> Read for Shared<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("stream lock poisoned"))?;
        guard.read(buf)
    }
}

impl<S: Write> Write for Shared<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("stream lock poisoned"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("stream lock poisoned"))?;
        guard.flush()
    }
}

/// Plain or TLS-wrapped TCP stream, picked by the url scheme at dial
/// time.
pub enum MaybeTlsStream {
    Plain(TcpStream),
    #[cfg(feature = "tls")]
    Tls(Box<rustls::StreamOwned<rustls::ClientConnection, TcpStream>>),
}

impl Read for MaybeTlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            MaybeTlsStream::Plain(stream) => stream.read(buf),
            #[cfg(feature = "tls")]
            MaybeTlsStream::Tls(stream) => stream.read(buf),
        }
    }
}

impl Write for MaybeTlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            MaybeTlsStream::Plain(stream) => stream.write(buf),
            #[cfg(feature = "tls")]
            MaybeTlsStream::Tls(stream) => stream.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            MaybeTlsStream::Plain(stream) => stream.flush(),
            #[cfg(feature = "tls")]
            MaybeTlsStream::Tls(stream) => stream.flush(),
        }
    }
}

/// Wraps `stream` in a TLS session using `server_name` as SNI and the
/// webpki root store.
#[cfg(feature = "tls")]
pub fn wrap_tls(stream: TcpStream, server_name: &str) -> Result<MaybeTlsStream, Error> {
    use rustls::pki_types::ServerName;
    use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};

    let mut root_store = RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let server_name = ServerName::try_from(server_name.to_owned()).map_err(|_| {
        Error::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid TLS server name '{server_name}'"),
        ))
    })?;
    let tls = ClientConnection::new(Arc::new(config), server_name)
        .map_err(|err| Error::Io(io::Error::other(err)))?;
    Ok(MaybeTlsStream::Tls(Box::new(StreamOwned::new(tls, stream))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn should_share_one_stream_between_halves() {
        let (mut writer, mut reader) = Shared::pair(Cursor::new(b"data".to_vec()));

        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(b"data", &buf);

        // both halves observe the same cursor
        writer.write_all(b"more").unwrap();
        let mut remaining = Vec::new();
        reader.read_to_end(&mut remaining).unwrap();
        assert!(remaining.is_empty());
    }
}
