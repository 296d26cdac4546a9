//! Memcache binary protocol codec.
//!
//! The binary protocol frames every request and response with a fixed
//! 24-byte header followed by `extras || key || value`. All multi-byte
//! integers are big-endian.
//!
//! - Request magic: 0x80
//! - Response magic: 0x81
//!
//! This crate is a pure transform: it encodes requests into caller-provided
//! buffers and decodes response headers and bodies. Connection handling and
//! request/response correlation live in `memcache-node`.
//!
//! # Example
//!
//! ```
//! use protocol_memcache::{BinaryRequest, Opcode, RequestHeader};
//!
//! let mut buf = [0u8; 64];
//! let len = BinaryRequest::encode_get(&mut buf, b"mykey", 1).unwrap();
//!
//! let header = RequestHeader::parse(&buf[..len]).unwrap();
//! assert_eq!(header.opcode, Opcode::Get);
//! assert_eq!(header.opaque, 1);
//! ```

mod error;
mod header;
mod request;
mod response;

pub use error::{EncodeError, ParseError};
pub use header::{
    HEADER_SIZE, Opcode, REQUEST_MAGIC, RESPONSE_MAGIC, RequestHeader, ResponseHeader, Status,
};
pub use request::{BinaryRequest, MAX_KEY_LENGTH, SET_EXTRAS_LEN};
pub use response::ResponseBody;

