//! Node configuration and the factories that build transports and nodes.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::Authenticator;
use crate::node::MemcacheNode;
use crate::transport::{Transport, TransportContext};

/// Builds one transport for a node. Called `pool_size` times when the node
/// is created. Substitute it to plug in a custom or mock transport.
pub type TransportFactory = Arc<dyn Fn(TransportContext) -> Arc<dyn Transport> + Send + Sync>;

/// Builds one node for an endpoint. Used by layers that manage several
/// nodes; [`default_node_factory`] builds a plain [`MemcacheNode`].
pub type NodeFactory = Arc<dyn Fn(SocketAddr, &NodeConfig) -> Arc<MemcacheNode> + Send + Sync>;

/// Configuration for a [`MemcacheNode`] and its transports.
#[derive(Clone)]
pub struct NodeConfig {
    /// Number of transports (connections) in the node's pool.
    /// Each transport carries at most one request at a time.
    pub pool_size: usize,
    /// How long a dead transport waits between reconnection attempts.
    pub dead_timeout: Duration,
    /// The node is dead while its working transports are at or below this
    /// count. `0` means "dead only when no transport works". Values at or
    /// above `pool_size` are clamped to `pool_size - 1`.
    pub dead_threshold: usize,
    /// TCP connect timeout. `None` uses the OS default.
    pub connect_timeout: Option<Duration>,
    /// Read/write timeout on established connections. A timeout is an I/O
    /// failure of the transport. `None` blocks until the peer answers.
    pub socket_timeout: Option<Duration>,
    /// How long each authentication step waits for the server's answer.
    pub auth_timeout: Duration,
    /// Run a SASL handshake on every new connection before using it.
    pub authenticator: Option<Arc<dyn Authenticator>>,
    /// Transport constructor. `None` uses
    /// [`TcpTransport`](crate::transport::TcpTransport).
    pub transport_factory: Option<TransportFactory>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            pool_size: 2,
            dead_timeout: Duration::from_secs(2),
            dead_threshold: 0,
            connect_timeout: Some(Duration::from_secs(1)),
            socket_timeout: None,
            auth_timeout: Duration::from_secs(10),
            authenticator: None,
            transport_factory: None,
        }
    }
}

impl NodeConfig {
    /// The dead threshold actually applied for this pool size.
    pub fn effective_dead_threshold(&self) -> usize {
        self.dead_threshold.min(self.pool_size.saturating_sub(1))
    }
}

impl fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeConfig")
            .field("pool_size", &self.pool_size)
            .field("dead_timeout", &self.dead_timeout)
            .field("dead_threshold", &self.dead_threshold)
            .field("connect_timeout", &self.connect_timeout)
            .field("socket_timeout", &self.socket_timeout)
            .field("auth_timeout", &self.auth_timeout)
            .field("authenticator", &self.authenticator.is_some())
            .field("transport_factory", &self.transport_factory.is_some())
            .finish()
    }
}

/// A [`NodeFactory`] that builds a [`MemcacheNode`] from a copy of the
/// given configuration.
pub fn default_node_factory() -> NodeFactory {
    Arc::new(|endpoint: SocketAddr, config: &NodeConfig| {
        Arc::new(MemcacheNode::new(endpoint, config.clone()))
    })
}
