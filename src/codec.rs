//! Line-delimited protocol codec
//!
//! One JSON frame per line. JSON escapes control characters, so a newline
//! inside a text field never splits a frame.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{AppError, DecodeError};
use crate::frame::Frame;

/// Default ceiling for a single inbound line, in bytes
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

/// Decode one line (without its terminator) into a frame
pub fn decode(line: &str) -> Result<Frame, DecodeError> {
    Ok(serde_json::from_str(line)?)
}

/// Encode a frame as a single line, without the terminator
pub fn encode(frame: &Frame) -> Result<String, serde_json::Error> {
    serde_json::to_string(frame)
}

/// Write one encoded frame followed by `\n`
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), AppError>
where
    W: AsyncWrite + Unpin,
{
    let mut line = encode(frame)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}

/// Buffered line reader with a length ceiling
///
/// Strips `\n` or `\r\n`. A final line without a terminator is still
/// returned before EOF is reported.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    max_line_length: usize,
    buf: String,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Wrap a reader, rejecting lines longer than `max_line_length` bytes
    pub fn new(reader: R, max_line_length: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            max_line_length,
            buf: String::new(),
        }
    }

    /// Read the next line
    ///
    /// Returns `Ok(None)` on EOF. Invalid UTF-8 surfaces as an IO error.
    pub async fn next_line(&mut self) -> Result<Option<String>, AppError> {
        self.buf.clear();

        // Room for a `\r\n` terminator after a maximal line
        let limit = self.max_line_length as u64 + 2;
        let read = (&mut self.inner).take(limit).read_line(&mut self.buf).await?;
        if read == 0 {
            return Ok(None);
        }

        let line = self.buf.trim_end_matches('\n').trim_end_matches('\r');
        let truncated = !self.buf.ends_with('\n') && read as u64 >= limit;
        if truncated || line.len() > self.max_line_length {
            return Err(AppError::LineTooLong(self.max_line_length));
        }
        Ok(Some(line.to_string()))
    }

    /// Read the next line and decode it
    pub async fn next_frame(&mut self) -> Result<Option<Frame>, AppError> {
        match self.next_line().await? {
            Some(line) => Ok(Some(decode(&line)?)),
            None => Ok(None),
        }
    }
}
