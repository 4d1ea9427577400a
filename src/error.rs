use std::io;
use std::io::ErrorKind::Other;
use thiserror::Error;
use url::ParseError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("the websocket is already in closing or closed state")]
    ClosedStatus,
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("previous message not read to completion")]
    PreviousMessageNotReadToCompletion,
    #[error("stream ended before the expected number of bytes were read")]
    ShortRead,
    #[error("operation cancelled")]
    Cancelled,
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("url parse error: {0}")]
    UrlParse(#[from] ParseError),
}

impl From<Error> for io::Error {
    fn from(value: Error) -> Self {
        io::Error::new(Other, value)
    }
}
