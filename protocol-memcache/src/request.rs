//! Client-side binary protocol request encoding.
//!
//! Every encoder writes a complete frame (header, extras, key, value) into
//! `buf` and returns the number of bytes written. `buf` must be at least
//! [`BinaryRequest::frame_len`] bytes long. Segments that do not fit their
//! header fields are rejected before anything is written.

use crate::error::EncodeError;
use crate::header::{HEADER_SIZE, Opcode, RequestHeader};

/// Length of the flags + expiration extras carried by SET.
pub const SET_EXTRAS_LEN: usize = 8;

/// Longest item key a memcached server accepts.
pub const MAX_KEY_LENGTH: usize = 250;

/// A binary protocol request builder.
pub struct BinaryRequest;

impl BinaryRequest {
    /// Size of a frame with the given segment lengths.
    pub fn frame_len(extras: usize, key: usize, value: usize) -> usize {
        HEADER_SIZE + extras + key + value
    }

    /// Encode a frame from its parts.
    pub fn encode_frame(
        buf: &mut [u8],
        opcode: Opcode,
        opaque: u32,
        cas: u64,
        extras: &[u8],
        key: &[u8],
        value: &[u8],
    ) -> Result<usize, EncodeError> {
        let mut header = RequestHeader::for_body(opcode, extras.len(), key.len(), value.len())?;
        header.opaque = opaque;
        header.cas = cas;
        header.encode(buf);

        let mut pos = HEADER_SIZE;
        for segment in [extras, key, value] {
            buf[pos..pos + segment.len()].copy_from_slice(segment);
            pos += segment.len();
        }
        Ok(pos)
    }

    /// Check an item key against [`MAX_KEY_LENGTH`].
    pub fn check_key(key: &[u8]) -> Result<(), EncodeError> {
        if key.len() > MAX_KEY_LENGTH {
            return Err(EncodeError::KeyTooLong {
                len: key.len(),
                max: MAX_KEY_LENGTH,
            });
        }
        Ok(())
    }

    /// Encode a GET request.
    pub fn encode_get(buf: &mut [u8], key: &[u8], opaque: u32) -> Result<usize, EncodeError> {
        Self::check_key(key)?;
        Self::encode_frame(buf, Opcode::Get, opaque, 0, &[], key, &[])
    }

    /// Encode a SET request. Extras are `flags` then `expiration`.
    pub fn encode_set(
        buf: &mut [u8],
        key: &[u8],
        value: &[u8],
        flags: u32,
        expiration: u32,
        cas: u64,
        opaque: u32,
    ) -> Result<usize, EncodeError> {
        Self::check_key(key)?;
        let mut extras = [0u8; SET_EXTRAS_LEN];
        extras[..4].copy_from_slice(&flags.to_be_bytes());
        extras[4..].copy_from_slice(&expiration.to_be_bytes());
        Self::encode_frame(buf, Opcode::Set, opaque, cas, &extras, key, value)
    }

    /// Encode a DELETE request.
    pub fn encode_delete(
        buf: &mut [u8],
        key: &[u8],
        cas: u64,
        opaque: u32,
    ) -> Result<usize, EncodeError> {
        Self::check_key(key)?;
        Self::encode_frame(buf, Opcode::Delete, opaque, cas, &[], key, &[])
    }

    /// Encode a NOOP request.
    pub fn encode_noop(buf: &mut [u8], opaque: u32) -> Result<usize, EncodeError> {
        Self::encode_frame(buf, Opcode::Noop, opaque, 0, &[], &[], &[])
    }

    /// Encode a SASL request. The mechanism name travels as the key and the
    /// mechanism payload as the value.
    pub fn encode_sasl(
        buf: &mut [u8],
        opcode: Opcode,
        mechanism: &[u8],
        payload: &[u8],
        opaque: u32,
    ) -> Result<usize, EncodeError> {
        debug_assert!(opcode.is_sasl());
        Self::encode_frame(buf, opcode, opaque, 0, &[], mechanism, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::REQUEST_MAGIC;

    #[test]
    fn test_encode_get() {
        let mut buf = [0u8; 64];
        let len = BinaryRequest::encode_get(&mut buf, b"mykey", 7).unwrap();
        assert_eq!(len, HEADER_SIZE + 5);
        assert_eq!(buf[0], REQUEST_MAGIC);
        assert_eq!(buf[1], Opcode::Get as u8);
        assert_eq!(&buf[2..4], &5u16.to_be_bytes());
        assert_eq!(&buf[12..16], &7u32.to_be_bytes());
        assert_eq!(&buf[HEADER_SIZE..len], b"mykey");
    }

    #[test]
    fn test_encode_set_layout() {
        let mut buf = [0u8; 64];
        let len =
            BinaryRequest::encode_set(&mut buf, b"Key", &[0, 1, 2, 3, 4], 9, 60, 0, 1).unwrap();
        assert_eq!(len, BinaryRequest::frame_len(8, 3, 5));

        let header = RequestHeader::parse(&buf).unwrap();
        assert_eq!(header.opcode, Opcode::Set);
        assert_eq!(header.extras_length, 8);
        assert_eq!(header.key_length, 3);
        assert_eq!(header.total_body_length, 16);
        assert_eq!(header.value_length(), 5);

        assert_eq!(&buf[24..28], &9u32.to_be_bytes());
        assert_eq!(&buf[28..32], &60u32.to_be_bytes());
        assert_eq!(&buf[32..35], b"Key");
        assert_eq!(&buf[35..40], &[0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_encode_noop() {
        let mut buf = [0u8; HEADER_SIZE];
        assert_eq!(BinaryRequest::encode_noop(&mut buf, 3), Ok(HEADER_SIZE));
        let header = RequestHeader::parse(&buf).unwrap();
        assert_eq!(header.opcode, Opcode::Noop);
        assert_eq!(header.total_body_length, 0);
        assert_eq!(header.opaque, 3);
    }

    #[test]
    fn test_encode_sasl_plain() {
        let payload = b"zone\0user\0password";
        let mut buf = [0u8; 64];
        let len =
            BinaryRequest::encode_sasl(&mut buf, Opcode::SaslStart, b"PLAIN", payload, 0).unwrap();

        let expected: &[u8] = &[
            0x80, 0x21, 0x00, 0x05, // magic, opcode, key length
            0x00, 0x00, 0x00, 0x00, // extras, data type, vbucket
            0x00, 0x00, 0x00, 0x17, // total body length
            0x00, 0x00, 0x00, 0x00, // opaque
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // cas
        ];
        assert_eq!(&buf[..HEADER_SIZE], expected);
        assert_eq!(&buf[HEADER_SIZE..HEADER_SIZE + 5], b"PLAIN");
        assert_eq!(&buf[HEADER_SIZE + 5..len], payload);
    }

    #[test]
    fn test_encode_delete_carries_cas() {
        let mut buf = [0u8; 64];
        BinaryRequest::encode_delete(&mut buf, b"k", 0xABCD, 5).unwrap();
        let header = RequestHeader::parse(&buf).unwrap();
        assert_eq!(header.opcode, Opcode::Delete);
        assert_eq!(header.cas, 0xABCD);
        assert_eq!(header.key_length, 1);
    }

    #[test]
    fn test_long_key_is_rejected_before_writing() {
        let key = vec![b'k'; MAX_KEY_LENGTH + 1];
        let mut buf = vec![0u8; BinaryRequest::frame_len(SET_EXTRAS_LEN, key.len(), 1)];
        assert_eq!(
            BinaryRequest::encode_set(&mut buf, &key, b"v", 0, 0, 0, 1),
            Err(EncodeError::KeyTooLong {
                len: MAX_KEY_LENGTH + 1,
                max: MAX_KEY_LENGTH
            })
        );
        assert!(buf.iter().all(|&b| b == 0));

        assert!(BinaryRequest::encode_get(&mut buf, &key[..MAX_KEY_LENGTH], 1).is_ok());
    }

    #[test]
    fn test_key_past_u16_is_rejected_for_any_opcode() {
        let mechanism = vec![b'M'; 70_000];
        let mut buf = vec![0u8; BinaryRequest::frame_len(0, mechanism.len(), 0)];
        let err = BinaryRequest::encode_sasl(&mut buf, Opcode::SaslStart, &mechanism, b"", 0)
            .unwrap_err();
        assert_eq!(
            err,
            EncodeError::KeyTooLong {
                len: 70_000,
                max: 65_535
            }
        );
    }
}
