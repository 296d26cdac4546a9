//! SASL-style authentication.
//!
//! An [`Authenticator`] holds credentials and hands out one [`AuthToken`]
//! per connection. The token is a small state machine: each call to
//! [`AuthToken::step_authenticate`] either yields the next request to send,
//! or reports the status the server answered with.
//!
//! ```text
//! NotStarted ──step──▶ StepRequired ──handler(NoError)──▶ Authenticated
//!                           │
//!                           └──handler(other)──▶ Failed(status)
//! ```
//!
//! The token never builds a request before the handler of the previous one
//! has run. The transport sends each request and feeds the response to the
//! request's own handler before stepping again. It keeps stepping while a
//! token answers `StepRequired` with a request, so a mechanism with more
//! rounds returns [`Request::SaslStep`] requests after the start. PLAIN
//! finishes in one round: a server `StepRequired` ends it as a failure.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::{Condvar, Mutex};
use protocol_memcache::Status;

use crate::request::{Request, SaslRequest};

/// Name of the PLAIN mechanism, sent as the key of the start request.
pub const PLAIN_MECHANISM: &str = "PLAIN";

/// Builds per-connection authentication tokens.
pub trait Authenticator: Send + Sync {
    fn create_token(&self) -> Box<dyn AuthToken>;
}

/// Per-connection authentication state.
pub trait AuthToken: Send {
    /// Advance the handshake.
    ///
    /// Returns the status reached so far and, when the server has to be
    /// asked something, the request to send. `timeout` bounds the wait for
    /// the handler of the previously returned request.
    fn step_authenticate(&mut self, timeout: Duration) -> (Status, Option<Request>);
}

/// SASL PLAIN (RFC 4616): `zone \0 user \0 password` in a single step.
#[derive(Clone, Default)]
pub struct SaslPlainAuthenticator {
    pub user: String,
    pub password: String,
    /// Authorization identity. Empty means "same as user".
    pub zone: String,
}

impl SaslPlainAuthenticator {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            zone: String::new(),
        }
    }

    pub fn with_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = zone.into();
        self
    }

    fn payload(&self) -> Bytes {
        let len = self.zone.len() + self.user.len() + self.password.len() + 2;
        let mut buf = BytesMut::with_capacity(len);
        buf.put_slice(self.zone.as_bytes());
        buf.put_u8(0);
        buf.put_slice(self.user.as_bytes());
        buf.put_u8(0);
        buf.put_slice(self.password.as_bytes());
        buf.freeze()
    }
}

impl fmt::Debug for SaslPlainAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslPlainAuthenticator")
            .field("user", &self.user)
            .field("zone", &self.zone)
            .finish_non_exhaustive()
    }
}

impl Authenticator for SaslPlainAuthenticator {
    fn create_token(&self) -> Box<dyn AuthToken> {
        Box::new(SaslPlainToken {
            payload: self.payload(),
            state: TokenState::NotStarted,
            reply: Arc::new(Reply::default()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenState {
    NotStarted,
    StepRequired,
    Authenticated,
    Failed(Status),
}

/// Status recorded by the start request's handler.
#[derive(Default)]
struct Reply {
    status: Mutex<Option<Status>>,
    ready: Condvar,
}

impl Reply {
    fn record(&self, status: Status) {
        *self.status.lock() = Some(status);
        self.ready.notify_all();
    }

    fn wait(&self, timeout: Duration) -> Option<Status> {
        let mut status = self.status.lock();
        self.ready.wait_while_for(&mut status, |s| s.is_none(), timeout);
        status.take()
    }
}

struct SaslPlainToken {
    payload: Bytes,
    state: TokenState,
    reply: Arc<Reply>,
}

impl AuthToken for SaslPlainToken {
    fn step_authenticate(&mut self, timeout: Duration) -> (Status, Option<Request>) {
        match self.state {
            TokenState::NotStarted => {
                let reply = self.reply.clone();
                let request = SaslRequest::new(PLAIN_MECHANISM, self.payload.clone(), move |s| {
                    reply.record(s)
                });
                self.state = TokenState::StepRequired;
                (Status::StepRequired, Some(Request::SaslStart(request)))
            }
            TokenState::StepRequired => {
                // PLAIN has no further step: whatever the server answered,
                // other than success, ends the handshake.
                let status = self.reply.wait(timeout).unwrap_or(Status::InternalError);
                self.state = if status.is_success() {
                    TokenState::Authenticated
                } else {
                    TokenState::Failed(status)
                };
                (status, None)
            }
            TokenState::Authenticated => (Status::NoError, None),
            TokenState::Failed(status) => (status, None),
        }
    }
}
