//! Line framing over async byte streams.
//!
//! Reading is split from decoding so callers can tell a dead connection
//! (io error, EOF) from a single bad message (decode error).

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use meshfile_core::wire::{encode_line, Message, WireError, FRAME_TERMINATOR, MAX_FRAME_LEN};

/// Buffered reader yielding one raw line per call.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
            buf: Vec::new(),
        }
    }

    /// Next line, terminator included. `Ok(None)` on clean EOF.
    ///
    /// EOF in the middle of a line is `UnexpectedEof`; a line longer than
    /// `MAX_FRAME_LEN` is `InvalidData`.
    pub async fn next_frame(&mut self) -> io::Result<Option<&[u8]>> {
        self.buf.clear();
        let n = (&mut self.inner)
            .take(MAX_FRAME_LEN as u64)
            .read_until(FRAME_TERMINATOR, &mut self.buf)
            .await?;
        if n == 0 {
            return Ok(None);
        }
        if self.buf.last() != Some(&FRAME_TERMINATOR) {
            if n >= MAX_FRAME_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("frame exceeds {MAX_FRAME_LEN} bytes"),
                ));
            }
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed mid-frame",
            ));
        }
        Ok(Some(self.buf.as_slice()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error("write failed: {0}")]
    Io(#[from] io::Error),
}

/// Encode `msg`, write it newline-terminated, and flush.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &Message,
) -> Result<(), SendError> {
    let line = encode_line(msg)?;
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
