//! Client-side binary response decoding.
//!
//! The header is decoded first (see [`ResponseHeader::parse`]), then the
//! `total_body_length` bytes that follow are split into their extras, key
//! and value segments with [`ResponseBody::split`].

use crate::error::ParseError;
use crate::header::ResponseHeader;

/// A response body split into its segments.
///
/// `Default` is the empty body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseBody<'a> {
    pub extras: &'a [u8],
    pub key: &'a [u8],
    pub value: &'a [u8],
}

impl<'a> ResponseBody<'a> {
    /// Split `body` according to the lengths announced in `header`.
    ///
    /// `body` must hold exactly `header.total_body_length` bytes.
    pub fn split(header: &ResponseHeader, body: &'a [u8]) -> Result<Self, ParseError> {
        let extras = header.extras_length as usize;
        let key = header.key_length as usize;
        let total = header.total_body_length as usize;

        if body.len() < total {
            return Err(ParseError::Incomplete);
        }
        if extras + key > total {
            return Err(ParseError::InvalidLength {
                extras,
                key,
                body: total,
            });
        }

        Ok(Self {
            extras: &body[..extras],
            key: &body[extras..extras + key],
            value: &body[extras + key..total],
        })
    }

    /// Item flags carried in the extras of GET responses.
    pub fn flags(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.extras.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{HEADER_SIZE, Opcode, Status};

    fn get_response(value: &[u8]) -> Vec<u8> {
        let mut header = ResponseHeader::new(Opcode::Get, Status::NoError);
        header.extras_length = 4;
        header.total_body_length = 4 + value.len() as u32;
        header.opaque = 11;
        let mut frame = header.to_bytes().to_vec();
        frame.extend_from_slice(&0xCAFEu32.to_be_bytes());
        frame.extend_from_slice(value);
        frame
    }

    #[test]
    fn test_split_get_body() {
        let frame = get_response(b"hello");
        let header = ResponseHeader::parse(&frame).unwrap();
        let body = ResponseBody::split(&header, &frame[HEADER_SIZE..]).unwrap();
        assert_eq!(header.opaque, 11);
        assert_eq!(body.flags(), Some(0xCAFE));
        assert!(body.key.is_empty());
        assert_eq!(body.value, b"hello");
    }

    #[test]
    fn test_split_short_body_is_incomplete() {
        let frame = get_response(b"hello");
        let header = ResponseHeader::parse(&frame).unwrap();
        assert_eq!(
            ResponseBody::split(&header, &frame[HEADER_SIZE..frame.len() - 1]),
            Err(ParseError::Incomplete)
        );
    }

    #[test]
    fn test_split_rejects_oversized_segments() {
        let mut header = ResponseHeader::new(Opcode::Get, Status::NoError);
        header.extras_length = 4;
        header.key_length = 4;
        header.total_body_length = 6;
        assert_eq!(
            ResponseBody::split(&header, &[0u8; 6]),
            Err(ParseError::InvalidLength {
                extras: 4,
                key: 4,
                body: 6
            })
        );
    }

    #[test]
    fn test_split_empty_body() {
        let header = ResponseHeader::new(Opcode::Noop, Status::NoError);
        let body = ResponseBody::split(&header, &[]).unwrap();
        assert!(body.extras.is_empty() && body.key.is_empty() && body.value.is_empty());
        assert_eq!(body.flags(), None);
    }
}
