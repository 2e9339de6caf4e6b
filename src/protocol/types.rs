//! RESP Data Types
//!
//! The reply shapes this server writes and the decoded request type it reads.
//!
//! ## Wire Format
//!
//! - Simple String: `+OK\r\n`
//! - Bulk String: `$5\r\nhello\r\n`
//! - Null Bulk String: `$-1\r\n`
//! - Array: `*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`
//!
//! Bulk lengths are byte counts, so a multi-byte UTF-8 value such as `"héllo"`
//! is framed as `$6`.

use bytes::Bytes;

/// The CRLF terminator used in RESP protocol
pub const CRLF: &[u8] = b"\r\n";

/// RESP protocol type prefixes
pub mod prefix {
    pub const SIMPLE_STRING: u8 = b'+';
    pub const BULK_STRING: u8 = b'$';
    pub const ARRAY: u8 = b'*';
}

/// One decoded client request: the verb followed by its arguments.
///
/// Every element is kept as raw bytes; nothing is assumed about encoding.
pub type Command = Vec<Bytes>;

/// A RESP value written back to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// `+<string>\r\n`. Must not contain CR or LF.
    SimpleString(String),

    /// `$<length>\r\n<data>\r\n`. Binary safe.
    BulkString(Bytes),

    /// Null bulk string, `$-1\r\n`
    Null,

    /// `*<count>\r\n<element1><element2>...`
    ///
    /// Replies never use this; clients use it to frame requests.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Creates a new simple string response.
    ///
    /// # Example
    /// ```
    /// use respkv::protocol::types::RespValue;
    /// let ok = RespValue::simple_string("OK");
    /// ```
    pub fn simple_string(s: impl Into<String>) -> Self {
        RespValue::SimpleString(s.into())
    }

    /// Creates a new bulk string response.
    ///
    /// # Example
    /// ```
    /// use respkv::protocol::types::RespValue;
    /// use bytes::Bytes;
    /// let bulk = RespValue::bulk_string(Bytes::from("hello"));
    /// assert_eq!(bulk.serialize(), b"$5\r\nhello\r\n");
    /// ```
    pub fn bulk_string(data: impl Into<Bytes>) -> Self {
        RespValue::BulkString(data.into())
    }

    /// Creates a null response.
    pub fn null() -> Self {
        RespValue::Null
    }

    /// Creates an array value.
    pub fn array(values: Vec<RespValue>) -> Self {
        RespValue::Array(values)
    }

    /// Frames a command as a RESP array of bulk strings, the way clients send it.
    ///
    /// ```
    /// use respkv::protocol::types::RespValue;
    /// let req = RespValue::request(["GET", "name"]);
    /// assert_eq!(req.serialize(), b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n");
    /// ```
    pub fn request<I, T>(args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        RespValue::Array(
            args.into_iter()
                .map(|arg| RespValue::BulkString(arg.into()))
                .collect(),
        )
    }

    /// Reply to a successful SET
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    /// Reply to PING
    pub fn pong() -> Self {
        RespValue::SimpleString("PONG".to_string())
    }

    /// Serializes the value to its wire representation.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.serialize_into(&mut buf);
        buf
    }

    /// Serializes the value into an existing buffer.
    pub fn serialize_into(&self, buf: &mut Vec<u8>) {
        match self {
            RespValue::SimpleString(s) => {
                buf.push(prefix::SIMPLE_STRING);
                buf.extend_from_slice(s.as_bytes());
                buf.extend_from_slice(CRLF);
            }
            RespValue::BulkString(data) => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(data.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                buf.extend_from_slice(data);
                buf.extend_from_slice(CRLF);
            }
            RespValue::Null => {
                buf.push(prefix::BULK_STRING);
                buf.extend_from_slice(b"-1");
                buf.extend_from_slice(CRLF);
            }
            RespValue::Array(values) => {
                buf.push(prefix::ARRAY);
                buf.extend_from_slice(values.len().to_string().as_bytes());
                buf.extend_from_slice(CRLF);
                for value in values {
                    value.serialize_into(buf);
                }
            }
        }
    }
}
