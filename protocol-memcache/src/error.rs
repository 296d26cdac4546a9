//! Error types for Memcache binary protocol parsing and encoding.

/// Error type for Memcache parsing operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Need more data to complete parsing.
    /// This is not a fatal error - the caller should buffer more data and retry.
    #[error("incomplete data")]
    Incomplete,

    /// The first header byte is not the expected magic.
    #[error("invalid magic byte: {0:#04x}")]
    InvalidMagic(u8),

    /// Unknown opcode in the header.
    #[error("unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// Header length fields disagree with the body.
    #[error("invalid length: extras {extras} + key {key} exceeds body {body}")]
    InvalidLength { extras: usize, key: usize, body: usize },
}

/// A request that cannot be represented in a binary protocol header.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("key of {len} bytes exceeds {max}")]
    KeyTooLong { len: usize, max: usize },

    #[error("extras of {0} bytes exceed 255")]
    ExtrasTooLong(usize),

    #[error("body of {0} bytes exceeds u32 range")]
    BodyTooLong(usize),
}

impl ParseError {
    /// Returns true if this error indicates more data is needed.
    #[inline]
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ParseError::Incomplete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_incomplete() {
        assert!(ParseError::Incomplete.is_incomplete());
        assert!(!ParseError::InvalidMagic(0x2A).is_incomplete());
        assert!(!ParseError::UnknownOpcode(0x42).is_incomplete());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", ParseError::InvalidMagic(0x2A)),
            "invalid magic byte: 0x2a"
        );
        assert_eq!(
            format!("{}", ParseError::UnknownOpcode(0x42)),
            "unknown opcode: 0x42"
        );
        assert_eq!(
            format!(
                "{}",
                ParseError::InvalidLength {
                    extras: 4,
                    key: 3,
                    body: 5
                }
            ),
            "invalid length: extras 4 + key 3 exceeds body 5"
        );
        assert_eq!(
            format!(
                "{}",
                EncodeError::KeyTooLong {
                    len: 300,
                    max: 250
                }
            ),
            "key of 300 bytes exceeds 250"
        );
    }
}
