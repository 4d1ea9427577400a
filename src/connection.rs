//! Connection facade over a pair of owned byte stream halves.

use std::io;
use std::io::{Read, Write};

use log::warn;

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::frame::{Frame, FrameHead};
use crate::message;
use crate::message::Message;
use crate::protocol::OpCode;

/// Connection lifecycle state. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Open,
    Closing,
    Closed,
}

/// A websocket connection over an owned writable half and an owned
/// readable half. The halves may belong to one full-duplex stream or to
/// two independent one-way streams; either way the connection owns them
/// exclusively and dropping it (or calling [`Connection::close`]) closes
/// both.
///
/// The API supports a single reader and a single writer. All operations
/// take `&mut self`, so concurrent misuse is unrepresentable through
/// this type.
#[derive(Debug)]
pub struct Connection<W, R> {
    writer: Option<W>,
    reader: Option<R>,
    mask: bool,
    status: Status,
    cancel: CancelToken,
}

impl<W: Write, R: Read> Connection<W, R> {
    /// Raw constructor: takes ownership of both halves, no handshake.
    /// `mask` selects client behaviour (outgoing payloads are masked).
    pub fn new(writer: W, reader: R, mask: bool) -> Self {
        Self::with_cancel(writer, reader, mask, CancelToken::new())
    }

    /// Same as [`Connection::new`] with an externally held cancellation
    /// token observed by every frame encode and decode.
    pub fn with_cancel(writer: W, reader: R, mask: bool, cancel: CancelToken) -> Self {
        Self {
            writer: Some(writer),
            reader: Some(reader),
            mask,
            status: Status::Open,
            cancel,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Handle to the cancellation signal this connection observes.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Sends a text message.
    pub fn send(&mut self, text: &str) -> Result<(), Error> {
        self.send_message(OpCode::Text, text.as_bytes())
    }

    /// Streams a message of unknown length as a fragment sequence: the
    /// first frame carries `op`, later frames are continuations, the
    /// final frame has fin set. Control opcodes are buffered and sent as
    /// a single frame instead; they are never fragmented.
    ///
    /// A mid-message stream error leaves the connection `Open`; the
    /// caller is expected to close.
    pub fn send_message<B: Read>(&mut self, op: OpCode, mut body: B) -> Result<(), Error> {
        self.ensure_open()?;
        if op.is_control() {
            let mut payload = Vec::new();
            body.read_to_end(&mut payload)?;
            return self.send_control(op, &payload);
        }
        let mask = self.mask;
        let cancel = self.cancel.clone();
        let writer = self.writer()?;
        message::send_fragmented(writer, mask, op, body, &cancel)
    }

    /// Receives the next message. The body streams lazily: continuation
    /// frames are pulled from the stream as the caller reads, and the
    /// connection cannot be used again until the returned message is
    /// dropped.
    ///
    /// Ping frames are serviced transparently: the payload is echoed
    /// back as a Pong and reading continues. A Close frame tears the
    /// connection down and is returned with its payload buffered.
    pub fn read_message(&mut self) -> Result<Message<'_, R>, Error> {
        self.ensure_open()?;
        let cancel = self.cancel.clone();
        let head = loop {
            let head = FrameHead::decode(self.reader()?, &cancel)?;
            match head.op {
                OpCode::Ping => {
                    let payload = self.read_control_payload(head)?;
                    self.send_control(OpCode::Pong, &payload)?;
                }
                OpCode::Close => {
                    let payload = self.read_control_payload(head)?;
                    self.close()?;
                    return Ok(Message::buffered(OpCode::Close, payload));
                }
                _ => break head,
            }
        };
        let reader = self.reader()?;
        Ok(Message::streaming(head.op, head.into_frame(reader), cancel))
    }

    /// Sends a Ping and blocks until the peer's Pong arrives. Frames
    /// received in the meantime are drained and discarded, so this call
    /// must not be interleaved with an in-flight message read.
    pub fn ping(&mut self) -> Result<(), Error> {
        self.send_control(OpCode::Ping, &[])?;
        let cancel = self.cancel.clone();
        loop {
            let head = FrameHead::decode(self.reader()?, &cancel)?;
            match head.op {
                OpCode::Pong => {
                    self.drain_frame(head)?;
                    return Ok(());
                }
                OpCode::Ping => {
                    let payload = self.read_control_payload(head)?;
                    self.send_control(OpCode::Pong, &payload)?;
                }
                OpCode::Close => {
                    self.drain_frame(head)?;
                    self.close()?;
                    return Err(Error::ClosedStatus);
                }
                op => {
                    warn!("discarding {op:?} frame received while awaiting pong");
                    self.drain_frame(head)?;
                }
            }
        }
    }

    /// Sends an empty Close frame, then tears both halves down by
    /// dropping them. Status moves Open → Closing → Closed and never
    /// backward; closing an already closed connection fails with
    /// [`Error::ClosedStatus`].
    pub fn close(&mut self) -> Result<(), Error> {
        if self.status == Status::Closed {
            return Err(Error::ClosedStatus);
        }
        let sent = if self.status == Status::Open {
            self.send_control(OpCode::Close, &[])
        } else {
            Ok(())
        };
        self.status = Status::Closing;
        self.writer.take();
        self.reader.take();
        self.status = Status::Closed;
        sent
    }

    fn send_control(&mut self, op: OpCode, payload: &[u8]) -> Result<(), Error> {
        self.ensure_open()?;
        let mask = self.mask;
        let cancel = self.cancel.clone();
        let writer = self.writer()?;
        Frame::from_slice(true, mask, op, payload).encode(writer, &cancel)
    }

    fn read_control_payload(&mut self, head: FrameHead) -> Result<Vec<u8>, Error> {
        let reader = self.reader()?;
        let mut payload = Vec::new();
        head.into_frame(reader).payload.read_to_end(&mut payload)?;
        Ok(payload)
    }

    fn drain_frame(&mut self, head: FrameHead) -> Result<(), Error> {
        let reader = self.reader()?;
        io::copy(&mut head.into_frame(reader).payload, &mut io::sink())?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.status > Status::Open {
            return Err(Error::ClosedStatus);
        }
        Ok(())
    }

    fn writer(&mut self) -> Result<&mut W, Error> {
        self.writer.as_mut().ok_or(Error::ClosedStatus)
    }

    fn reader(&mut self) -> Result<&mut R, Error> {
        self.reader.as_mut().ok_or(Error::ClosedStatus)
    }
}
