//! Frame codec: encode/decode one websocket frame to/from a byte stream.

use std::cmp;
use std::io;
use std::io::{Read, Write};

use rand::{thread_rng, Rng};

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::mask::Masker;
use crate::protocol;
use crate::protocol::OpCode;

/// 2 fixed bytes + 8 extended length bytes + 4 mask key bytes.
const MAX_HEADER_LEN: usize = 14;

const ENCODE_CHUNK: usize = 4096;

/// Fixed part of a frame: everything up to the payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHead {
    pub fin: bool,
    pub mask: bool,
    pub op: OpCode,
    pub payload_len: u64,
    pub key: Option<[u8; 4]>,
}

impl FrameHead {
    /// Decodes the frame header from `reader`, including the extended
    /// payload length and the masking key when present. Fails with
    /// [`Error::ShortRead`] if the stream ends mid-header. RSV bits are
    /// ignored.
    pub fn decode<R: Read + ?Sized>(reader: &mut R, cancel: &CancelToken) -> Result<FrameHead, Error> {
        let mut fixed = [0u8; 2];
        crate::util::read_full(reader, &mut fixed, cancel)?;
        let fin = fixed[0] & protocol::FIN_MASK != 0;
        let op = OpCode::from_wire(fixed[0] & protocol::OP_CODE_MASK);
        let mask = fixed[1] & protocol::MASK_MASK != 0;
        let payload_len = match fixed[1] & protocol::PAYLOAD_LENGTH_MASK {
            126 => {
                let mut ext = [0u8; 2];
                crate::util::read_full(reader, &mut ext, cancel)?;
                u64::from(u16::from_be_bytes(ext))
            }
            127 => {
                let mut ext = [0u8; 8];
                crate::util::read_full(reader, &mut ext, cancel)?;
                let len = u64::from_be_bytes(ext);
                if len & (1 << 63) != 0 {
                    return Err(Error::Io(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "frame payload length has the high bit set",
                    )));
                }
                len
            }
            short => u64::from(short),
        };
        let key = if mask {
            let mut key = [0u8; 4];
            crate::util::read_full(reader, &mut key, cancel)?;
            Some(key)
        } else {
            None
        };
        Ok(FrameHead {
            fin,
            mask,
            op,
            payload_len,
            key,
        })
    }

    /// Attaches the payload view over `reader`, completing the frame.
    pub fn into_frame<R>(self, reader: R) -> Frame<R> {
        Frame {
            fin: self.fin,
            mask: self.mask,
            op: self.op,
            payload: Payload::new(reader, self.payload_len, self.key),
        }
    }
}

/// Bounded, lazily unmasking view over the payload bytes of one frame.
///
/// Yields exactly the declared number of bytes; an underlying EOF before
/// that surfaces as `UnexpectedEof`. The view must be drained before the
/// next frame can be decoded from the same stream.
#[derive(Debug)]
pub struct Payload<R> {
    reader: R,
    remaining: u64,
    mask: Option<Masker>,
}

impl<R> Payload<R> {
    pub(crate) fn new(reader: R, len: u64, key: Option<[u8; 4]>) -> Self {
        Self {
            reader,
            remaining: len,
            mask: key.map(Masker::new),
        }
    }

    /// Bytes left to pull from this frame.
    pub const fn remaining(&self) -> u64 {
        self.remaining
    }

    pub const fn is_exhausted(&self) -> bool {
        self.remaining == 0
    }

    pub(crate) fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> Read for Payload<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = cmp::min(self.remaining, buf.len() as u64) as usize;
        let n = self.reader.read(&mut buf[..want])?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        if let Some(mask) = &mut self.mask {
            mask.apply(&mut buf[..n]);
        }
        self.remaining -= n as u64;
        Ok(n)
    }
}

/// In-memory representation of one wire frame: header fields plus a
/// bounded payload source.
#[derive(Debug)]
pub struct Frame<R> {
    pub fin: bool,
    pub mask: bool,
    pub op: OpCode,
    pub payload: Payload<R>,
}

impl<'a> Frame<&'a [u8]> {
    /// Frame over an in-memory payload.
    pub fn from_slice(fin: bool, mask: bool, op: OpCode, payload: &'a [u8]) -> Self {
        Frame::new(fin, mask, op, payload, payload.len() as u64)
    }
}

impl<R: Read> Frame<R> {
    /// Frame over a payload source that will yield at least `len` bytes;
    /// the encoder sends exactly `len` of them.
    pub fn new(fin: bool, mask: bool, op: OpCode, payload: R, len: u64) -> Self {
        Self {
            fin,
            mask,
            op,
            payload: Payload::new(payload, len, None),
        }
    }

    /// Decodes the next frame from `reader`. The payload is not buffered;
    /// the caller must consume it before decoding another frame from the
    /// same stream.
    pub fn decode(mut reader: R, cancel: &CancelToken) -> Result<Frame<R>, Error> {
        let head = FrameHead::decode(&mut reader, cancel)?;
        Ok(head.into_frame(reader))
    }

    /// Encodes the frame to `writer`: header, freshly generated masking
    /// key when masked, then exactly the declared number of payload
    /// bytes. A payload source that dries up early fails with
    /// [`Error::ShortRead`]; bytes past the declared length are not
    /// pulled. The cancel token is checked before every write.
    pub fn encode<W: Write + ?Sized>(self, writer: &mut W, cancel: &CancelToken) -> Result<(), Error> {
        let key = thread_rng().gen();
        self.encode_with_key(writer, cancel, key)
    }

    fn encode_with_key<W: Write + ?Sized>(
        mut self,
        writer: &mut W,
        cancel: &CancelToken,
        key: [u8; 4],
    ) -> Result<(), Error> {
        let mut header = [0u8; MAX_HEADER_LEN];
        let mut header_len = 2;
        if self.fin {
            header[0] |= protocol::FIN_MASK;
        }
        header[0] |= self.op.to_wire();

        let payload_len = self.payload.remaining();
        if payload_len <= 125 {
            header[1] |= payload_len as u8;
        } else if payload_len <= u64::from(u16::MAX) {
            header[1] |= 126;
            header[2..4].copy_from_slice(&(payload_len as u16).to_be_bytes());
            header_len += 2;
        } else {
            header[1] |= 127;
            header[2..10].copy_from_slice(&payload_len.to_be_bytes());
            header_len += 8;
        }

        let mut masker = None;
        if self.mask {
            header[1] |= protocol::MASK_MASK;
            header[header_len..header_len + 4].copy_from_slice(&key);
            header_len += 4;
            masker = Some(Masker::new(key));
        }
        crate::util::write_all(writer, &header[..header_len], cancel)?;

        let mut chunk = [0u8; ENCODE_CHUNK];
        while !self.payload.is_exhausted() {
            let read = match self.payload.read(&mut chunk) {
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Err(Error::ShortRead),
                Err(err) => return Err(Error::Io(err)),
            };
            if let Some(masker) = &mut masker {
                masker.apply(&mut chunk[..read]);
            }
            crate::util::write_all(writer, &chunk[..read], cancel)?;
        }
        writer.flush().map_err(Error::Io)?;
        Ok(())
    }
}
