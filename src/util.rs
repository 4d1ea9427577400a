//! Cancellable blocking IO helpers.

use std::io;
use std::io::{Read, Write};

use crate::cancel::CancelToken;
use crate::error::Error;

/// Reads exactly `buf.len()` bytes, checking the cancel token before each
/// underlying read. A clean EOF mid-buffer is an [`Error::ShortRead`].
pub(crate) fn read_full<R: Read + ?Sized>(
    reader: &mut R,
    buf: &mut [u8],
    cancel: &CancelToken,
) -> Result<(), Error> {
    let mut read = 0;
    while read < buf.len() {
        cancel.check()?;
        let n = reader.read(&mut buf[read..])?;
        if n == 0 {
            return Err(Error::ShortRead);
        }
        read += n;
    }
    Ok(())
}

/// Writes the whole buffer, checking the cancel token before each write.
pub(crate) fn write_all<W: Write + ?Sized>(
    writer: &mut W,
    mut buf: &[u8],
    cancel: &CancelToken,
) -> Result<(), Error> {
    while !buf.is_empty() {
        cancel.check()?;
        let n = writer.write(buf)?;
        if n == 0 {
            return Err(Error::Io(io::ErrorKind::WriteZero.into()));
        }
        buf = &buf[n..];
    }
    Ok(())
}
