//! Error types for transports and the SASL handshake.

use std::io;

use protocol_memcache::{EncodeError, Opcode, ParseError, Status};
use thiserror::Error;

/// Transport-level failures.
///
/// These never escape [`MemcacheNode::try_send`](crate::MemcacheNode::try_send):
/// a failed request is completed with [`Status::InternalError`] and the error
/// itself is published as a
/// [`NodeEvent::TransportError`](crate::NodeEvent::TransportError).
#[derive(Debug, Error)]
pub enum Error {
    /// Connect, read or write failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The response header or body could not be decoded (bad magic,
    /// unknown opcode, inconsistent lengths).
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// The request does not fit a binary protocol frame. Nothing was
    /// written to the connection.
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),

    /// The response opaque does not match the in-flight request id.
    #[error("opaque mismatch: expected {expected}, got {actual}")]
    OpaqueMismatch { expected: u32, actual: u32 },

    /// The response opcode does not echo the in-flight request opcode.
    #[error("opcode mismatch: expected {expected:?}, got {actual:?}")]
    OpcodeMismatch { expected: Opcode, actual: Opcode },

    /// The response announces a body larger than the client accepts.
    #[error("frame too large: {0} bytes")]
    FrameTooLarge(u32),

    /// The server refused the SASL handshake.
    #[error("authentication failed: {0}")]
    Auth(Status),

    /// The connection was closed by the peer before a full frame arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport was shut down while connecting.
    #[error("disposed")]
    Disposed,
}

impl Error {
    /// True for errors raised by frame validation rather than by the socket.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_)
                | Error::OpaqueMismatch { .. }
                | Error::OpcodeMismatch { .. }
                | Error::FrameTooLarge(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_classification() {
        assert!(Error::Protocol(ParseError::InvalidMagic(42)).is_protocol());
        assert!(
            Error::OpaqueMismatch {
                expected: 1,
                actual: 0
            }
            .is_protocol()
        );
        assert!(!Error::ConnectionClosed.is_protocol());
        assert!(!Error::Encode(EncodeError::ExtrasTooLong(300)).is_protocol());
        assert!(!Error::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_protocol());
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Error::OpaqueMismatch {
                expected: 1,
                actual: 0
            }
            .to_string(),
            "opaque mismatch: expected 1, got 0"
        );
        assert_eq!(
            Error::Protocol(ParseError::InvalidMagic(42)).to_string(),
            "protocol error: invalid magic byte: 0x2a"
        );
        assert_eq!(
            Error::Auth(Status::AuthRequired).to_string(),
            "authentication failed: Authentication required"
        );
    }
}
