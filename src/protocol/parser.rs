//! Incremental RESP Request Parser
//!
//! Requests arrive on a TCP stream in arbitrary fragments. The parser works on
//! whatever has been buffered so far and returns either:
//! - `Ok(Some((command, consumed)))` - a complete request, `consumed` bytes were used
//! - `Ok(None)` - the request is incomplete, read more bytes and try again
//! - `Err(ProtocolError)` - the bytes can never form a valid request
//!
//! [`RespParser::read_command`] wraps that loop around an [`AsyncRead`] and is
//! what connection handlers call.
//!
//! ## Framing Rules
//!
//! Header lines end at `\n`; a trailing `\r` and surrounding ASCII whitespace are
//! trimmed. The first byte of the header selects the request shape:
//!
//! - `*<count>` - an array of `count` bulk elements
//! - `$<length>` - a single bulk element
//! - `+<text>` - a single element holding `text` verbatim
//!
//! Bulk payloads are taken by their declared byte length and never searched
//! for terminators, so values may contain `\r\n` or any other bytes. After the
//! payload, everything up to and including the next `\n` is discarded.
//!
//! Counts and lengths of zero or below are not errors: `*0` and `*-1` yield an
//! empty command, `$0` an empty element, and `$-1` an empty element with no
//! payload or terminator. Counts above [`MAX_ARRAY_LEN`] are rejected.

use crate::protocol::types::{prefix, Command};
use bytes::{Buf, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Errors that can occur while decoding a request.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A header line was blank
    #[error("empty line")]
    EmptyLine,

    /// A count or length was not an integer
    #[error("invalid length: {0:?}")]
    BadLength(String),

    /// Unknown type tag byte
    #[error("unsupported RESP type: {0:#04x}")]
    UnsupportedType(u8),

    /// The stream ended in the middle of a request
    #[error("stream ended before the request was complete")]
    ShortRead,

    /// The underlying read failed
    #[error("read failed: {0}")]
    ReadFailure(#[from] std::io::Error),

    /// A declared bulk length exceeds the limit
    #[error("bulk length too large: {size} bytes (max: {max})")]
    TooLarge { size: i64, max: usize },

    /// A declared array count exceeds the limit
    #[error("too many elements: {count} (max: {max})")]
    TooManyElements { count: usize, max: usize },

    /// A header line grew past the limit without a terminator
    #[error("line exceeds {max} bytes without a terminator")]
    LineTooLong { max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ProtocolError>;

/// Maximum size for a single bulk payload (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum length of a header line (64 KB)
pub const MAX_LINE_LENGTH: usize = 64 * 1024;

/// Maximum number of elements in one request array (same as Redis)
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Bytes reserved in the read buffer before each socket read
const READ_CHUNK: usize = 4096;

/// Upper bound on capacity pre-allocated from a client-declared array count
const MAX_PREALLOC_ARGS: usize = 64;

/// An incremental RESP request parser.
///
/// # Example
///
/// ```
/// use respkv::protocol::parser::RespParser;
/// use bytes::Bytes;
///
/// let parser = RespParser::new();
/// let (command, consumed) = parser
///     .parse(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
///     .unwrap()
///     .unwrap();
///
/// assert_eq!(command, vec![Bytes::from("GET"), Bytes::from("name")]);
/// assert_eq!(consumed, 23);
/// ```
///
/// [`parse`](RespParser::parse) is stateless. [`read_command`](RespParser::read_command)
/// keeps the elements of a partially received array between reads, so one
/// parser serves one stream.
#[derive(Debug, Clone)]
pub struct RespParser {
    max_bulk_size: usize,
    max_line_length: usize,
    max_array_len: usize,

    /// Array request whose elements are still arriving
    pending: Option<PendingArray>,
}

/// Elements decoded so far for an array request.
///
/// Completed elements are removed from the read buffer as they are decoded,
/// so each read only scans bytes that have not been decoded yet.
#[derive(Debug, Clone)]
struct PendingArray {
    remaining: usize,
    command: Command,
}

impl PendingArray {
    fn new(count: usize) -> Self {
        Self {
            remaining: count,
            command: Vec::with_capacity(count.min(MAX_PREALLOC_ARGS)),
        }
    }

    fn complete(value: Bytes) -> Self {
        Self {
            remaining: 0,
            command: vec![value],
        }
    }
}

impl Default for RespParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RespParser {
    /// Creates a parser with the default limits.
    pub fn new() -> Self {
        Self::with_limits(MAX_BULK_SIZE, MAX_LINE_LENGTH)
    }

    /// Creates a parser with custom limits.
    pub fn with_limits(max_bulk_size: usize, max_line_length: usize) -> Self {
        Self {
            max_bulk_size,
            max_line_length,
            max_array_len: MAX_ARRAY_LEN,
            pending: None,
        }
    }

    /// Sets the largest array count accepted in a request.
    pub fn with_max_array_len(mut self, max_array_len: usize) -> Self {
        self.max_array_len = max_array_len;
        self
    }

    /// Attempts to decode one request from the start of `buf`.
    pub fn parse(&self, buf: &[u8]) -> ParseResult<Option<(Command, usize)>> {
        let (line, pos) = match self.read_line(buf, 0)? {
            Some(found) => found,
            None => return Ok(None),
        };

        let (&tag, rest) = line.split_first().ok_or(ProtocolError::EmptyLine)?;

        match tag {
            prefix::ARRAY => self.parse_array(buf, rest, pos),
            prefix::BULK_STRING => {
                let length = parse_length(rest)?;
                Ok(self
                    .read_payload(buf, pos, length)?
                    .map(|(value, consumed)| (vec![value], consumed)))
            }
            prefix::SIMPLE_STRING => Ok(Some((vec![Bytes::copy_from_slice(rest)], pos))),
            other => Err(ProtocolError::UnsupportedType(other)),
        }
    }

    /// Decodes the next request from `reader`, buffering in `buf`.
    ///
    /// Returns `Ok(None)` when the stream closes cleanly between requests.
    /// Bytes following the returned request stay in `buf` for the next call.
    /// Decoded bytes are consumed from `buf` even when the request is not
    /// complete yet; progress is kept in the parser.
    pub async fn read_command<R>(
        &mut self,
        reader: &mut R,
        buf: &mut BytesMut,
    ) -> ParseResult<Option<Command>>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(command) = self.decode(buf)? {
                return Ok(Some(command));
            }

            if buf.capacity() - buf.len() < READ_CHUNK {
                buf.reserve(READ_CHUNK);
            }

            if reader.read_buf(buf).await? == 0 {
                return if buf.is_empty() && self.pending.is_none() {
                    Ok(None)
                } else {
                    self.pending = None;
                    Err(ProtocolError::ShortRead)
                };
            }
        }
    }

    /// Decodes whatever `buf` holds, resuming a partially decoded array.
    ///
    /// Returns `Ok(None)` when more bytes are needed.
    fn decode(&mut self, buf: &mut BytesMut) -> ParseResult<Option<Command>> {
        let mut pending = match self.pending.take() {
            Some(pending) => pending,
            None => match self.start_request(buf)? {
                Some(pending) => pending,
                None => return Ok(None),
            },
        };

        while pending.remaining > 0 {
            match self.parse_element(buf, 0)? {
                Some((value, consumed)) => {
                    buf.advance(consumed);
                    pending.command.push(value);
                    pending.remaining -= 1;
                }
                None => {
                    self.pending = Some(pending);
                    return Ok(None);
                }
            }
        }

        Ok(Some(pending.command))
    }

    /// Reads the header of the next request and consumes it from `buf`.
    fn start_request(&self, buf: &mut BytesMut) -> ParseResult<Option<PendingArray>> {
        let (line, pos) = match self.read_line(buf, 0)? {
            Some(found) => found,
            None => return Ok(None),
        };

        let (&tag, rest) = line.split_first().ok_or(ProtocolError::EmptyLine)?;

        let (pending, consumed) = match tag {
            prefix::ARRAY => (PendingArray::new(self.parse_count(rest)?), pos),
            // The bulk header is decoded again as the only element
            prefix::BULK_STRING => (PendingArray::new(1), 0),
            prefix::SIMPLE_STRING => (PendingArray::complete(Bytes::copy_from_slice(rest)), pos),
            other => return Err(ProtocolError::UnsupportedType(other)),
        };

        buf.advance(consumed);
        Ok(Some(pending))
    }

    /// Parses the elements of an array whose header has already been read.
    fn parse_array(
        &self,
        buf: &[u8],
        header: &[u8],
        mut pos: usize,
    ) -> ParseResult<Option<(Command, usize)>> {
        let mut pending = PendingArray::new(self.parse_count(header)?);

        while pending.remaining > 0 {
            match self.parse_element(buf, pos)? {
                Some((value, next)) => {
                    pending.command.push(value);
                    pending.remaining -= 1;
                    pos = next;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((pending.command, pos)))
    }

    /// Parses an array count; negative counts mean an empty command.
    fn parse_count(&self, digits: &[u8]) -> ParseResult<usize> {
        let count = usize::try_from(parse_length(digits)?).unwrap_or(0);
        if count > self.max_array_len {
            return Err(ProtocolError::TooManyElements {
                count,
                max: self.max_array_len,
            });
        }
        Ok(count)
    }

    /// Parses one `$<length>` element of an array.
    fn parse_element(&self, buf: &[u8], start: usize) -> ParseResult<Option<(Bytes, usize)>> {
        let (line, pos) = match self.read_line(buf, start)? {
            Some(found) => found,
            None => return Ok(None),
        };

        match line.split_first() {
            None => Err(ProtocolError::EmptyLine),
            Some((&prefix::BULK_STRING, rest)) => {
                let length = parse_length(rest)?;
                self.read_payload(buf, pos, length)
            }
            Some((&other, _)) => Err(ProtocolError::UnsupportedType(other)),
        }
    }

    /// Takes exactly `length` bytes at `start`, then skips the line terminator.
    fn read_payload(
        &self,
        buf: &[u8],
        start: usize,
        length: i64,
    ) -> ParseResult<Option<(Bytes, usize)>> {
        // Negative length is a null bulk: no payload, no terminator
        let length = match usize::try_from(length) {
            Ok(length) => length,
            Err(_) => return Ok(Some((Bytes::new(), start))),
        };

        if length > self.max_bulk_size {
            return Err(ProtocolError::TooLarge {
                size: length as i64,
                max: self.max_bulk_size,
            });
        }

        let end = start + length;
        if buf.len() < end {
            return Ok(None);
        }

        match self.read_line(buf, end)? {
            Some((_, consumed)) => Ok(Some((Bytes::copy_from_slice(&buf[start..end]), consumed))),
            None => Ok(None),
        }
    }

    /// Finds the line starting at `start`.
    ///
    /// Returns the trimmed line content and the offset just past its `\n`.
    fn read_line<'a>(&self, buf: &'a [u8], start: usize) -> ParseResult<Option<(&'a [u8], usize)>> {
        let rest = &buf[start..];
        match rest.iter().position(|&b| b == b'\n') {
            Some(pos) if pos > self.max_line_length => Err(ProtocolError::LineTooLong {
                max: self.max_line_length,
            }),
            Some(pos) => Ok(Some((rest[..pos].trim_ascii(), start + pos + 1))),
            None if rest.len() > self.max_line_length => Err(ProtocolError::LineTooLong {
                max: self.max_line_length,
            }),
            None => Ok(None),
        }
    }
}

/// Parses a decimal count or length from a header.
fn parse_length(digits: &[u8]) -> ParseResult<i64> {
    std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ProtocolError::BadLength(String::from_utf8_lossy(digits).into_owned()))
}

/// Helper function to parse a single request from bytes.
pub fn parse_message(buf: &[u8]) -> ParseResult<Option<(Command, usize)>> {
    RespParser::new().parse(buf)
}
