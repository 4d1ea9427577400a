//! Message assembly on top of the frame codec: fragmented send and a
//! lazy streaming receive body.

use std::io;
use std::io::{Cursor, Read, Write};

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::frame::Frame;
use crate::protocol::OpCode;

/// Payload chunk pulled from the caller's source per outgoing frame.
pub(crate) const CHUNK_SIZE: usize = 2048;

/// One logical message delivered to the caller.
///
/// The body is a single-pass reader. Data payloads stream lazily off the
/// connection, pulling continuation frames on demand; the connection
/// cannot be read again until the message is dropped or drained. Close
/// payloads arrive fully buffered.
pub struct Message<'a, R: Read> {
    pub op: OpCode,
    body: Body<'a, R>,
}

enum Body<'a, R: Read> {
    Buffered(Cursor<Vec<u8>>),
    Streaming(MessageReader<'a, R>),
}

impl<'a, R: Read> Message<'a, R> {
    pub(crate) fn buffered(op: OpCode, payload: Vec<u8>) -> Self {
        Self {
            op,
            body: Body::Buffered(Cursor::new(payload)),
        }
    }

    pub(crate) fn streaming(op: OpCode, frame: Frame<&'a mut R>, cancel: CancelToken) -> Self {
        Self {
            op,
            body: Body::Streaming(MessageReader {
                state: BodyState::InFrame(frame),
                cancel,
            }),
        }
    }
}

impl<R: Read> Read for Message<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.body {
            Body::Buffered(cursor) => cursor.read(buf),
            Body::Streaming(reader) => reader.read(buf),
        }
    }
}

/// Body state machine: drains the current frame, then pulls the next
/// continuation until one carries the fin flag.
struct MessageReader<'a, R: Read> {
    state: BodyState<'a, R>,
    cancel: CancelToken,
}

enum BodyState<'a, R: Read> {
    InFrame(Frame<&'a mut R>),
    Done,
}

impl<R: Read> Read for MessageReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match std::mem::replace(&mut self.state, BodyState::Done) {
                BodyState::Done => return Ok(0),
                BodyState::InFrame(mut frame) => {
                    if !frame.payload.is_exhausted() {
                        let n = frame.payload.read(buf)?;
                        self.state = BodyState::InFrame(frame);
                        return Ok(n);
                    }
                    if frame.fin {
                        return Ok(0);
                    }
                    let Frame { payload, .. } = frame;
                    let next = Frame::decode(payload.into_inner(), &self.cancel)
                        .map_err(io::Error::from)?;
                    if next.op != OpCode::Continuation {
                        return Err(Error::PreviousMessageNotReadToCompletion.into());
                    }
                    self.state = BodyState::InFrame(next);
                }
            }
        }
    }
}

/// Streams `body` to `writer` as one message: the first frame carries
/// `op`, later frames are continuations, the final frame has fin set.
/// A source whose length is an exact chunk multiple ends with an empty
/// closing frame.
pub(crate) fn send_fragmented<W, B>(
    writer: &mut W,
    mask: bool,
    op: OpCode,
    mut body: B,
    cancel: &CancelToken,
) -> Result<(), Error>
where
    W: Write + ?Sized,
    B: Read,
{
    let mut chunk = vec![0u8; CHUNK_SIZE];
    let mut op = op;
    loop {
        let mut filled = 0;
        let mut eof = false;
        while filled < chunk.len() {
            let n = body.read(&mut chunk[filled..]).map_err(Error::Io)?;
            if n == 0 {
                eof = true;
                break;
            }
            filled += n;
        }
        Frame::from_slice(eof, mask, op, &chunk[..filled]).encode(writer, cancel)?;
        if eof {
            return Ok(());
        }
        op = OpCode::Continuation;
    }
}
