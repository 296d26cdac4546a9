//! Memcache binary protocol headers.
//!
//! Requests and responses share one fixed 24-byte layout. The only difference
//! is the magic byte and the meaning of bytes 6..8 (vbucket id on requests,
//! status on responses).

use crate::error::{EncodeError, ParseError};

/// Magic byte for binary request packets.
pub const REQUEST_MAGIC: u8 = 0x80;

/// Magic byte for binary response packets.
pub const RESPONSE_MAGIC: u8 = 0x81;

/// Size of a binary protocol header.
pub const HEADER_SIZE: usize = 24;

/// Binary protocol opcodes understood by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Get = 0x00,
    Set = 0x01,
    Delete = 0x04,
    Quit = 0x07,
    Noop = 0x0A,
    Version = 0x0B,
    GetK = 0x0C,
    SaslListMechs = 0x20,
    SaslStart = 0x21,
    SaslStep = 0x22,
}

impl Opcode {
    /// Try to convert a byte to an opcode.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Opcode::Get),
            0x01 => Some(Opcode::Set),
            0x04 => Some(Opcode::Delete),
            0x07 => Some(Opcode::Quit),
            0x0A => Some(Opcode::Noop),
            0x0B => Some(Opcode::Version),
            0x0C => Some(Opcode::GetK),
            0x20 => Some(Opcode::SaslListMechs),
            0x21 => Some(Opcode::SaslStart),
            0x22 => Some(Opcode::SaslStep),
            _ => None,
        }
    }

    /// Returns true for the SASL handshake opcodes.
    pub fn is_sasl(&self) -> bool {
        matches!(
            self,
            Opcode::SaslListMechs | Opcode::SaslStart | Opcode::SaslStep
        )
    }
}

/// Response status codes.
///
/// `InternalError` doubles as the status the client reports for any
/// transport or protocol fault it detects on its own side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Status {
    NoError = 0x0000,
    KeyNotFound = 0x0001,
    KeyExists = 0x0002,
    ValueTooLarge = 0x0003,
    InvalidArguments = 0x0004,
    ItemNotStored = 0x0005,
    NonNumericValue = 0x0006,
    WrongVbucket = 0x0007,
    AuthRequired = 0x0020,
    StepRequired = 0x0021,
    UnknownCommand = 0x0081,
    OutOfMemory = 0x0082,
    NotSupported = 0x0083,
    InternalError = 0x0084,
    Busy = 0x0085,
    TempFailure = 0x0086,
}

impl Status {
    /// Try to convert a u16 to a status.
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(Status::NoError),
            0x0001 => Some(Status::KeyNotFound),
            0x0002 => Some(Status::KeyExists),
            0x0003 => Some(Status::ValueTooLarge),
            0x0004 => Some(Status::InvalidArguments),
            0x0005 => Some(Status::ItemNotStored),
            0x0006 => Some(Status::NonNumericValue),
            0x0007 => Some(Status::WrongVbucket),
            0x0020 => Some(Status::AuthRequired),
            0x0021 => Some(Status::StepRequired),
            0x0081 => Some(Status::UnknownCommand),
            0x0082 => Some(Status::OutOfMemory),
            0x0083 => Some(Status::NotSupported),
            0x0084 => Some(Status::InternalError),
            0x0085 => Some(Status::Busy),
            0x0086 => Some(Status::TempFailure),
            _ => None,
        }
    }

    /// Returns true if this status indicates success.
    pub fn is_success(&self) -> bool {
        *self == Status::NoError
    }

    /// Short human readable description.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::NoError => "No error",
            Status::KeyNotFound => "Key not found",
            Status::KeyExists => "Key exists",
            Status::ValueTooLarge => "Value too large",
            Status::InvalidArguments => "Invalid arguments",
            Status::ItemNotStored => "Item not stored",
            Status::NonNumericValue => "Incr/Decr on non-numeric value",
            Status::WrongVbucket => "Wrong vbucket",
            Status::AuthRequired => "Authentication required",
            Status::StepRequired => "Authentication step required",
            Status::UnknownCommand => "Unknown command",
            Status::OutOfMemory => "Out of memory",
            Status::NotSupported => "Not supported",
            Status::InternalError => "Internal error",
            Status::Busy => "Busy",
            Status::TempFailure => "Temporary failure",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary protocol request header (24 bytes).
///
/// ```text
/// Byte/     0       |       1       |       2       |       3       |
///   +---------------+---------------+---------------+---------------+
///  0| Magic         | Opcode        | Key length                    |
///   +---------------+---------------+---------------+---------------+
///  4| Extras length | Data type     | vbucket id                    |
///   +---------------+---------------+---------------+---------------+
///  8| Total body length                                             |
///   +---------------+---------------+---------------+---------------+
/// 12| Opaque                                                        |
///   +---------------+---------------+---------------+---------------+
/// 16| CAS                                                           |
///   |                                                               |
///   +---------------+---------------+---------------+---------------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub magic: u8,
    pub opcode: Opcode,
    pub key_length: u16,
    pub extras_length: u8,
    pub data_type: u8,
    pub vbucket_id: u16,
    /// extras_length + key_length + value_length
    pub total_body_length: u32,
    /// Correlation id, echoed back by the server.
    pub opaque: u32,
    pub cas: u64,
}

impl RequestHeader {
    /// Header for `opcode` with every other field zeroed.
    pub fn new(opcode: Opcode) -> Self {
        Self {
            magic: REQUEST_MAGIC,
            opcode,
            key_length: 0,
            extras_length: 0,
            data_type: 0,
            vbucket_id: 0,
            total_body_length: 0,
            opaque: 0,
            cas: 0,
        }
    }

    /// Header sized for a body of `extras`, `key` and `value_len` bytes.
    ///
    /// Fails when a segment does not fit its length field.
    pub fn for_body(
        opcode: Opcode,
        extras: usize,
        key: usize,
        value_len: usize,
    ) -> Result<Self, EncodeError> {
        let extras_length = u8::try_from(extras).map_err(|_| EncodeError::ExtrasTooLong(extras))?;
        let key_length = u16::try_from(key).map_err(|_| EncodeError::KeyTooLong {
            len: key,
            max: u16::MAX as usize,
        })?;
        let total = extras.saturating_add(key).saturating_add(value_len);
        let total_body_length = u32::try_from(total).map_err(|_| EncodeError::BodyTooLong(total))?;

        let mut header = Self::new(opcode);
        header.extras_length = extras_length;
        header.key_length = key_length;
        header.total_body_length = total_body_length;
        Ok(header)
    }

    /// Parse a request header from the first 24 bytes of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let raw = RawHeader::read(data, REQUEST_MAGIC)?;
        Ok(Self {
            magic: REQUEST_MAGIC,
            opcode: raw.opcode,
            key_length: raw.key_length,
            extras_length: raw.extras_length,
            data_type: raw.data_type,
            vbucket_id: raw.word,
            total_body_length: raw.total_body_length,
            opaque: raw.opaque,
            cas: raw.cas,
        })
    }

    /// Encode the header into `buf`. Returns HEADER_SIZE.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        RawHeader {
            opcode: self.opcode,
            key_length: self.key_length,
            extras_length: self.extras_length,
            data_type: self.data_type,
            word: self.vbucket_id,
            total_body_length: self.total_body_length,
            opaque: self.opaque,
            cas: self.cas,
        }
        .write(self.magic, buf)
    }

    /// Length of the value segment implied by the header fields.
    pub fn value_length(&self) -> usize {
        (self.total_body_length as usize)
            .saturating_sub(self.extras_length as usize + self.key_length as usize)
    }
}

/// Binary protocol response header (24 bytes).
///
/// Same layout as [`RequestHeader`], with RESPONSE_MAGIC and a status in
/// place of the vbucket id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    pub magic: u8,
    /// Echo of the request opcode.
    pub opcode: Opcode,
    pub key_length: u16,
    pub extras_length: u8,
    pub data_type: u8,
    pub status: Status,
    pub total_body_length: u32,
    /// Echo of the request opaque.
    pub opaque: u32,
    pub cas: u64,
}

impl ResponseHeader {
    /// Header with the given opcode and status, every other field zeroed.
    pub fn new(opcode: Opcode, status: Status) -> Self {
        Self {
            magic: RESPONSE_MAGIC,
            opcode,
            key_length: 0,
            extras_length: 0,
            data_type: 0,
            status,
            total_body_length: 0,
            opaque: 0,
            cas: 0,
        }
    }

    /// Parse a response header from the first 24 bytes of `data`.
    ///
    /// The magic byte is validated before any other field is looked at.
    /// Unknown status values decode as [`Status::InternalError`].
    pub fn parse(data: &[u8]) -> Result<Self, ParseError> {
        let raw = RawHeader::read(data, RESPONSE_MAGIC)?;
        Ok(Self {
            magic: RESPONSE_MAGIC,
            opcode: raw.opcode,
            key_length: raw.key_length,
            extras_length: raw.extras_length,
            data_type: raw.data_type,
            status: Status::from_u16(raw.word).unwrap_or(Status::InternalError),
            total_body_length: raw.total_body_length,
            opaque: raw.opaque,
            cas: raw.cas,
        })
    }

    /// Encode the header into `buf`. Returns HEADER_SIZE.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        RawHeader {
            opcode: self.opcode,
            key_length: self.key_length,
            extras_length: self.extras_length,
            data_type: self.data_type,
            word: self.status as u16,
            total_body_length: self.total_body_length,
            opaque: self.opaque,
            cas: self.cas,
        }
        .write(self.magic, buf)
    }

    /// Encode the header into a fresh array.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode(&mut buf);
        buf
    }

    /// Length of the value segment implied by the header fields.
    pub fn value_length(&self) -> usize {
        (self.total_body_length as usize)
            .saturating_sub(self.extras_length as usize + self.key_length as usize)
    }
}

// Shared field layout of both header kinds. `word` is bytes 6..8.
struct RawHeader {
    opcode: Opcode,
    key_length: u16,
    extras_length: u8,
    data_type: u8,
    word: u16,
    total_body_length: u32,
    opaque: u32,
    cas: u64,
}

impl RawHeader {
    fn read(data: &[u8], magic: u8) -> Result<Self, ParseError> {
        if data.len() < HEADER_SIZE {
            return Err(ParseError::Incomplete);
        }
        if data[0] != magic {
            return Err(ParseError::InvalidMagic(data[0]));
        }
        let opcode = Opcode::from_u8(data[1]).ok_or(ParseError::UnknownOpcode(data[1]))?;

        Ok(Self {
            opcode,
            key_length: u16::from_be_bytes([data[2], data[3]]),
            extras_length: data[4],
            data_type: data[5],
            word: u16::from_be_bytes([data[6], data[7]]),
            total_body_length: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            opaque: u32::from_be_bytes([data[12], data[13], data[14], data[15]]),
            cas: u64::from_be_bytes([
                data[16], data[17], data[18], data[19], data[20], data[21], data[22], data[23],
            ]),
        })
    }

    fn write(&self, magic: u8, buf: &mut [u8]) -> usize {
        buf[0] = magic;
        buf[1] = self.opcode as u8;
        buf[2..4].copy_from_slice(&self.key_length.to_be_bytes());
        buf[4] = self.extras_length;
        buf[5] = self.data_type;
        buf[6..8].copy_from_slice(&self.word.to_be_bytes());
        buf[8..12].copy_from_slice(&self.total_body_length.to_be_bytes());
        buf[12..16].copy_from_slice(&self.opaque.to_be_bytes());
        buf[16..24].copy_from_slice(&self.cas.to_be_bytes());
        HEADER_SIZE
    }
}
