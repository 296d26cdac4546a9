//! Pooled memcached client node speaking the binary protocol.
//!
//! A [`MemcacheNode`] owns a fixed pool of transports to one server. Each
//! transport carries one request at a time; [`MemcacheNode::try_send`] hands
//! a request to the first idle transport, waiting up to a timeout for one to
//! free up. Every accepted request completes exactly once through its
//! callback, with the server's status or with [`Status::InternalError`] when
//! the transport fails.
//!
//! Broken transports reconnect on their own after
//! [`NodeConfig::dead_timeout`], re-running SASL authentication when an
//! [`Authenticator`] is configured. The node reports health changes and
//! transport failures as [`NodeEvent`]s.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use memcache_node::{GetRequest, MemcacheNode, NodeConfig, SetRequest, Status};
//!
//! let node = MemcacheNode::new("127.0.0.1:11211".parse().unwrap(), NodeConfig::default());
//!
//! let set = SetRequest::new("hello", "world", |status| {
//!     assert_eq!(status, Status::NoError);
//! })
//! .with_expire(Duration::from_secs(60));
//! node.try_send(set, Some(Duration::from_secs(1)));
//!
//! let get = GetRequest::new("hello", |status, value| {
//!     if let Some(value) = value {
//!         println!("{status}: {:?}", value.data);
//!     }
//! });
//! node.try_send(get, Some(Duration::from_secs(1)));
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod event;
pub mod metrics;
pub mod node;
pub mod request;
pub mod transport;

pub use auth::{AuthToken, Authenticator, PLAIN_MECHANISM, SaslPlainAuthenticator};
pub use config::{NodeConfig, NodeFactory, TransportFactory, default_node_factory};
pub use error::Error;
pub use event::{NodeEvent, SubscriptionId};
pub use node::{MemcacheNode, TransportHooks};
pub use protocol_memcache::{EncodeError, Opcode, Status};
pub use request::{
    Callback, DeleteRequest, GetCallback, GetRequest, GetValue, MAX_RELATIVE_EXPIRATION,
    NoOpRequest, Request, SaslRequest, SetRequest,
};
pub use transport::{TcpTransport, Transport, TransportContext};
