//! RESP Protocol Implementation
//!
//! The subset of the Redis Serialization Protocol (RESP) this server speaks.
//!
//! ## Modules
//!
//! - `types`: reply values (`RespValue`) and their wire encoding
//! - `parser`: incremental request decoder
//!
//! ## Example
//!
//! ```
//! use respkv::protocol::{parse_message, RespValue};
//! use bytes::Bytes;
//!
//! // Decoding a request
//! let data = b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n";
//! let (command, consumed) = parse_message(data).unwrap().unwrap();
//! assert_eq!(command[1], Bytes::from("name"));
//!
//! // Encoding a reply
//! let reply = RespValue::bulk_string(Bytes::from("Ariz"));
//! assert_eq!(reply.serialize(), b"$4\r\nAriz\r\n");
//! ```

pub mod parser;
pub mod types;

pub use parser::{parse_message, ParseResult, ProtocolError, RespParser};
pub use types::{Command, RespValue};
