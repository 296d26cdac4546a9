//! Requests and the request/response correlation contract.
//!
//! A [`Request`] is one of a closed set of variants. Each variant can build
//! its query buffer (any number of times) and, exactly once, complete its
//! callback: either from a decoded response through
//! [`Request::handle_response`], or with a client-side status through
//! [`Request::fail`]. Both consume the request, so a second completion does
//! not type-check.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use protocol_memcache::{
    BinaryRequest, EncodeError, HEADER_SIZE, Opcode, RequestHeader, ResponseBody, ResponseHeader,
    SET_EXTRAS_LEN, Status,
};

/// Completion callback for requests that only report a status.
pub type Callback = Box<dyn FnOnce(Status) + Send + 'static>;

/// Completion callback for GET.
pub type GetCallback = Box<dyn FnOnce(Status, Option<GetValue>) + Send + 'static>;

/// Relative expirations above this many seconds are sent as absolute unix
/// timestamps, as memcached interprets them that way.
pub const MAX_RELATIVE_EXPIRATION: u64 = 60 * 60 * 24 * 30;

/// A value returned by a GET.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetValue {
    pub data: Bytes,
    pub flags: u32,
    pub cas: u64,
}

// -- Variants ----------------------------------------------------------------

pub struct GetRequest {
    pub key: Bytes,
    pub request_id: u32,
    callback: GetCallback,
}

impl GetRequest {
    pub fn new(
        key: impl Into<Bytes>,
        callback: impl FnOnce(Status, Option<GetValue>) + Send + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            request_id: 0,
            callback: Box::new(callback),
        }
    }

    pub fn with_request_id(mut self, request_id: u32) -> Self {
        self.request_id = request_id;
        self
    }
}

pub struct SetRequest {
    pub key: Bytes,
    pub value: Bytes,
    pub flags: u32,
    /// Zero means never expire.
    pub expire: Duration,
    pub cas: u64,
    pub request_id: u32,
    callback: Callback,
}

impl SetRequest {
    pub fn new(
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        callback: impl FnOnce(Status) + Send + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            flags: 0,
            expire: Duration::ZERO,
            cas: 0,
            request_id: 0,
            callback: Box::new(callback),
        }
    }

    pub fn with_request_id(mut self, request_id: u32) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn with_expire(mut self, expire: Duration) -> Self {
        self.expire = expire;
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }
}

pub struct DeleteRequest {
    pub key: Bytes,
    pub request_id: u32,
    callback: Callback,
}

impl DeleteRequest {
    pub fn new(key: impl Into<Bytes>, callback: impl FnOnce(Status) + Send + 'static) -> Self {
        Self {
            key: key.into(),
            request_id: 0,
            callback: Box::new(callback),
        }
    }

    pub fn with_request_id(mut self, request_id: u32) -> Self {
        self.request_id = request_id;
        self
    }
}

/// NOOP, mostly used as a liveness check. The callback is optional.
#[derive(Default)]
pub struct NoOpRequest {
    pub request_id: u32,
    callback: Option<Callback>,
}

impl NoOpRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callback(mut self, callback: impl FnOnce(Status) + Send + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn with_request_id(mut self, request_id: u32) -> Self {
        self.request_id = request_id;
        self
    }
}

/// One SASL handshake message: the mechanism name travels as the key and
/// the mechanism payload as the value.
pub struct SaslRequest {
    pub mechanism: Bytes,
    pub payload: Bytes,
    pub request_id: u32,
    callback: Callback,
}

impl SaslRequest {
    pub fn new(
        mechanism: impl Into<Bytes>,
        payload: impl Into<Bytes>,
        callback: impl FnOnce(Status) + Send + 'static,
    ) -> Self {
        Self {
            mechanism: mechanism.into(),
            payload: payload.into(),
            request_id: 0,
            callback: Box::new(callback),
        }
    }
}

// -- Request -----------------------------------------------------------------

/// Every request the node can carry.
pub enum Request {
    Get(GetRequest),
    Set(SetRequest),
    Delete(DeleteRequest),
    NoOp(NoOpRequest),
    SaslStart(SaslRequest),
    SaslStep(SaslRequest),
}

impl Request {
    /// The opcode this request is sent with, and expects echoed back.
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Get(_) => Opcode::Get,
            Request::Set(_) => Opcode::Set,
            Request::Delete(_) => Opcode::Delete,
            Request::NoOp(_) => Opcode::Noop,
            Request::SaslStart(_) => Opcode::SaslStart,
            Request::SaslStep(_) => Opcode::SaslStep,
        }
    }

    /// Correlation id sent as the header opaque.
    pub fn request_id(&self) -> u32 {
        match self {
            Request::Get(r) => r.request_id,
            Request::Set(r) => r.request_id,
            Request::Delete(r) => r.request_id,
            Request::NoOp(r) => r.request_id,
            Request::SaslStart(r) | Request::SaslStep(r) => r.request_id,
        }
    }

    /// Check the request fits a frame: item keys are at most
    /// [`MAX_KEY_LENGTH`](protocol_memcache::MAX_KEY_LENGTH) bytes and every
    /// segment fits its header field.
    pub fn validate(&self) -> Result<(), EncodeError> {
        let (extras, key, value) = match self {
            Request::Get(r) => {
                BinaryRequest::check_key(&r.key)?;
                (0, r.key.len(), 0)
            }
            Request::Set(r) => {
                BinaryRequest::check_key(&r.key)?;
                (SET_EXTRAS_LEN, r.key.len(), r.value.len())
            }
            Request::Delete(r) => {
                BinaryRequest::check_key(&r.key)?;
                (0, r.key.len(), 0)
            }
            Request::NoOp(_) => (0, 0, 0),
            Request::SaslStart(r) | Request::SaslStep(r) => (0, r.mechanism.len(), r.payload.len()),
        };
        RequestHeader::for_body(self.opcode(), extras, key, value)?;
        Ok(())
    }

    /// The serialized frame for this request.
    pub fn query_buffer(&self) -> Result<Vec<u8>, EncodeError> {
        let opaque = self.request_id();
        match self {
            Request::Get(r) => encode(0, r.key.len(), 0, |buf| {
                BinaryRequest::encode_get(buf, &r.key, opaque)
            }),
            Request::Set(r) => encode(SET_EXTRAS_LEN, r.key.len(), r.value.len(), |buf| {
                BinaryRequest::encode_set(
                    buf,
                    &r.key,
                    &r.value,
                    r.flags,
                    expiration_field(r.expire, SystemTime::now()),
                    r.cas,
                    opaque,
                )
            }),
            Request::Delete(r) => encode(0, r.key.len(), 0, |buf| {
                BinaryRequest::encode_delete(buf, &r.key, 0, opaque)
            }),
            Request::NoOp(_) => encode(0, 0, 0, |buf| BinaryRequest::encode_noop(buf, opaque)),
            Request::SaslStart(r) | Request::SaslStep(r) => {
                let opcode = self.opcode();
                encode(0, r.mechanism.len(), r.payload.len(), |buf| {
                    BinaryRequest::encode_sasl(buf, opcode, &r.mechanism, &r.payload, opaque)
                })
            }
        }
    }

    /// Complete the request from a validated response.
    pub fn handle_response(self, header: &ResponseHeader, body: ResponseBody<'_>) {
        let status = header.status;
        match self {
            Request::Get(r) => {
                let value = status.is_success().then(|| GetValue {
                    data: Bytes::copy_from_slice(body.value),
                    flags: body.flags().unwrap_or(0),
                    cas: header.cas,
                });
                (r.callback)(status, value);
            }
            Request::Set(r) => (r.callback)(status),
            Request::Delete(r) => (r.callback)(status),
            Request::NoOp(r) => {
                if let Some(callback) = r.callback {
                    callback(status);
                }
            }
            Request::SaslStart(r) | Request::SaslStep(r) => (r.callback)(status),
        }
    }

    /// Complete the request without a response.
    pub fn fail(self, status: Status) {
        match self {
            Request::Get(r) => (r.callback)(status, None),
            Request::Set(r) => (r.callback)(status),
            Request::Delete(r) => (r.callback)(status),
            Request::NoOp(r) => {
                if let Some(callback) = r.callback {
                    callback(status);
                }
            }
            Request::SaslStart(r) | Request::SaslStep(r) => (r.callback)(status),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("opcode", &self.opcode())
            .field("request_id", &self.request_id())
            .finish_non_exhaustive()
    }
}

impl From<GetRequest> for Request {
    fn from(r: GetRequest) -> Self {
        Request::Get(r)
    }
}

impl From<SetRequest> for Request {
    fn from(r: SetRequest) -> Self {
        Request::Set(r)
    }
}

impl From<DeleteRequest> for Request {
    fn from(r: DeleteRequest) -> Self {
        Request::Delete(r)
    }
}

impl From<NoOpRequest> for Request {
    fn from(r: NoOpRequest) -> Self {
        Request::NoOp(r)
    }
}

// -- Encoding helpers --------------------------------------------------------

fn encode(
    extras: usize,
    key: usize,
    value: usize,
    f: impl FnOnce(&mut [u8]) -> Result<usize, EncodeError>,
) -> Result<Vec<u8>, EncodeError> {
    let mut buf = vec![0u8; BinaryRequest::frame_len(extras, key, value)];
    let len = f(&mut buf)?;
    debug_assert!(len >= HEADER_SIZE);
    buf.truncate(len);
    Ok(buf)
}

/// The expiration field for `expire`, relative to `now`.
pub(crate) fn expiration_field(expire: Duration, now: SystemTime) -> u32 {
    let secs = expire.as_secs();
    if secs <= MAX_RELATIVE_EXPIRATION {
        return secs as u32;
    }
    let epoch = now
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    u32::try_from(epoch.saturating_add(secs)).unwrap_or(u32::MAX)
}
