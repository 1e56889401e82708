//! # RESP2 Codec
//!
//! Purpose: Encode and decode RESP2 frames shared by the blocking client and
//! the development server.
//!
//! ## Design Principles
//!
//! 1. **Streaming Friendly**: The parser reads from a mutable buffer and
//!    returns `None` when more data is needed, consuming nothing in that case.
//! 2. **Single Frame Type**: Requests (arrays of bulk strings) and replies use
//!    the same `Frame` enum so both ends share one codec.
//! 3. **Fail Fast**: Malformed frames return a protocol error immediately.
//! 4. **Bounded Input**: Bulk length and nesting depth are capped so a hostile
//!    peer cannot make the parser allocate without limit.
//!
//! ## Wire Layout
//!
//! ```text
//! +OK\r\n                 simple string
//! -ERR message\r\n        error
//! :42\r\n                 integer
//! $5\r\nhello\r\n         bulk string ($-1\r\n is nil)
//! *2\r\n<frame><frame>    array (*-1\r\n is nil)
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::error::StoreError;

const CRLF: &[u8] = b"\r\n";

/// Largest bulk string accepted by the parser (512 MiB, the Redis limit).
pub const MAX_BULK_LEN: usize = 512 * 1024 * 1024;

/// Deepest array nesting accepted by the parser.
pub const MAX_DEPTH: usize = 32;

/// RESP parser errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RespError {
    /// The input is not valid RESP2.
    #[error("protocol error: {0}")]
    Protocol(&'static str),
    /// A bulk string or nesting level exceeds the configured limits.
    #[error("frame exceeds size limits")]
    TooLarge,
}

impl From<RespError> for StoreError {
    fn from(err: RespError) -> Self {
        StoreError::protocol(err.to_string())
    }
}

/// A single RESP2 value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Bytes),
    /// Nil bulk string or nil array.
    Null,
    Array(Vec<Frame>),
}

impl Frame {
    /// Builds a bulk string frame.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(data.into())
    }

    /// Builds the array-of-bulk-strings frame used for commands.
    pub fn command<A: AsRef<[u8]>>(args: &[A]) -> Self {
        Frame::Array(
            args.iter()
                .map(|arg| Frame::Bulk(Bytes::copy_from_slice(arg.as_ref())))
                .collect(),
        )
    }

    /// Appends the wire encoding of the frame to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            Frame::Simple(text) => {
                buf.put_u8(b'+');
                buf.put_slice(text.as_bytes());
                buf.put_slice(CRLF);
            }
            Frame::Error(text) => {
                buf.put_u8(b'-');
                buf.put_slice(text.as_bytes());
                buf.put_slice(CRLF);
            }
            Frame::Integer(value) => {
                buf.put_u8(b':');
                buf.put_slice(value.to_string().as_bytes());
                buf.put_slice(CRLF);
            }
            Frame::Bulk(data) => {
                buf.put_u8(b'$');
                buf.put_slice(data.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                buf.put_slice(data);
                buf.put_slice(CRLF);
            }
            Frame::Null => buf.put_slice(b"$-1\r\n"),
            Frame::Array(items) => {
                buf.put_u8(b'*');
                buf.put_slice(items.len().to_string().as_bytes());
                buf.put_slice(CRLF);
                for item in items {
                    item.encode(buf);
                }
            }
        }
    }

    /// Returns the payload of a bulk or simple string frame.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Frame::Bulk(data) => Some(data),
            Frame::Simple(text) => Some(text.as_bytes()),
            _ => None,
        }
    }
}

/// Incremental RESP2 frame parser.
#[derive(Debug, Clone)]
pub struct FrameParser {
    max_bulk_len: usize,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    /// Creates a parser with the default size limits.
    pub fn new() -> Self {
        FrameParser {
            max_bulk_len: MAX_BULK_LEN,
        }
    }

    /// Creates a parser that rejects bulk strings longer than `max_bulk_len`.
    pub fn with_max_bulk_len(max_bulk_len: usize) -> Self {
        FrameParser { max_bulk_len }
    }

    /// Attempts to parse a single frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` if more data is required; `buf` is left untouched in
    /// that case. On success the frame's bytes are consumed.
    pub fn parse(&self, buf: &mut BytesMut) -> Result<Option<Frame>, RespError> {
        let mut pos = 0;
        match self.parse_at(buf, &mut pos, 0)? {
            Some(frame) => {
                buf.advance(pos);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    fn parse_at(&self, data: &[u8], pos: &mut usize, depth: usize) -> Result<Option<Frame>, RespError> {
        if depth > MAX_DEPTH {
            return Err(RespError::TooLarge);
        }
        let Some((line, next)) = read_line(data, *pos) else {
            return Ok(None);
        };
        let (&tag, body) = line.split_first().ok_or(RespError::Protocol("empty line"))?;

        let frame = match tag {
            b'+' => Frame::Simple(parse_text(body)?),
            b'-' => Frame::Error(parse_text(body)?),
            b':' => Frame::Integer(parse_int(body)?),
            b'$' => {
                let Some(len) = parse_len(body)? else {
                    *pos = next;
                    return Ok(Some(Frame::Null));
                };
                if len > self.max_bulk_len {
                    return Err(RespError::TooLarge);
                }
                let end = next + len;
                if data.len() < end + CRLF.len() {
                    return Ok(None);
                }
                if &data[end..end + CRLF.len()] != CRLF {
                    return Err(RespError::Protocol("bulk string not terminated by CRLF"));
                }
                *pos = end + CRLF.len();
                return Ok(Some(Frame::Bulk(Bytes::copy_from_slice(&data[next..end]))));
            }
            b'*' => {
                let Some(len) = parse_len(body)? else {
                    *pos = next;
                    return Ok(Some(Frame::Null));
                };
                let mut items = Vec::with_capacity(len.min(1024));
                let mut cursor = next;
                for _ in 0..len {
                    match self.parse_at(data, &mut cursor, depth + 1)? {
                        Some(item) => items.push(item),
                        None => return Ok(None),
                    }
                }
                *pos = cursor;
                return Ok(Some(Frame::Array(items)));
            }
            _ => return Err(RespError::Protocol("unknown frame type")),
        };
        *pos = next;
        Ok(Some(frame))
    }
}

/// Finds the CRLF-terminated line starting at `start`.
///
/// Returns the line without its terminator and the index just past it.
fn read_line(data: &[u8], start: usize) -> Option<(&[u8], usize)> {
    let mut idx = start + 1;
    while idx < data.len() {
        if data[idx] == b'\n' && data[idx - 1] == b'\r' {
            return Some((&data[start..idx - 1], idx + 1));
        }
        idx += 1;
    }
    None
}

fn parse_text(data: &[u8]) -> Result<String, RespError> {
    std::str::from_utf8(data)
        .map(str::to_owned)
        .map_err(|_| RespError::Protocol("line is not valid UTF-8"))
}

fn parse_int(data: &[u8]) -> Result<i64, RespError> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse::<i64>().ok())
        .ok_or(RespError::Protocol("invalid integer"))
}

/// Parses a bulk/array length; `-1` means nil.
fn parse_len(data: &[u8]) -> Result<Option<usize>, RespError> {
    match parse_int(data)? {
        -1 => Ok(None),
        len if len < 0 => Err(RespError::Protocol("negative length")),
        len => usize::try_from(len)
            .map(Some)
            .map_err(|_| RespError::TooLarge),
    }
}
