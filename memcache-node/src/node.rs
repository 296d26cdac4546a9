//! A pool of transports to one memcached server.
//!
//! The node hands each request to an idle transport and tracks how many of
//! its transports work. Transports report back through [`TransportHooks`].

use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, RwLock};
use protocol_memcache::Status;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::Error;
use crate::event::{Listeners, NodeEvent, SubscriptionId};
use crate::metrics::{
    NODES_DEAD, REQUESTS_REJECTED, REQUESTS_SENT, TRANSPORT_ERRORS, TRANSPORTS_WORKING,
};
use crate::request::Request;
use crate::transport::{Transport, TransportContext, tcp_transport};

/// A memcached server reached through a fixed-size pool of transports.
///
/// Dropping the node disposes it.
pub struct MemcacheNode {
    shared: Arc<Shared>,
}

pub(crate) struct Shared {
    endpoint: SocketAddr,
    pool_size: usize,
    dead_threshold: usize,
    transports: RwLock<Vec<Arc<dyn Transport>>>,
    idle: Mutex<Idle>,
    idle_ready: Condvar,
    health: Mutex<Health>,
    working: AtomicUsize,
    dead: AtomicBool,
    disposed: AtomicBool,
    listeners: Listeners,
}

/// Slots whose transport is alive and waiting for a request. `queued`
/// keeps a slot from being listed twice.
struct Idle {
    slots: VecDeque<usize>,
    queued: Vec<bool>,
}

struct Health {
    alive: Vec<bool>,
    working: usize,
    dead: bool,
}

impl MemcacheNode {
    /// Build the node and its transports. With the default TCP transport
    /// every connection is attempted before this returns, so a reachable
    /// node is ready for requests right away.
    pub fn new(endpoint: SocketAddr, config: NodeConfig) -> Self {
        let pool_size = config.pool_size.max(1);
        let dead_threshold = config.effective_dead_threshold();

        let shared = Arc::new(Shared {
            endpoint,
            pool_size,
            dead_threshold,
            transports: RwLock::new(Vec::with_capacity(pool_size)),
            idle: Mutex::new(Idle {
                slots: VecDeque::with_capacity(pool_size),
                queued: vec![false; pool_size],
            }),
            idle_ready: Condvar::new(),
            health: Mutex::new(Health {
                alive: vec![false; pool_size],
                working: 0,
                dead: true,
            }),
            working: AtomicUsize::new(0),
            dead: AtomicBool::new(true),
            disposed: AtomicBool::new(false),
            listeners: Listeners::default(),
        });
        NODES_DEAD.increment();

        let factory = config.transport_factory.clone();
        let transports: Vec<Arc<dyn Transport>> = (0..pool_size)
            .map(|slot| {
                let context = TransportContext {
                    endpoint,
                    config: config.clone(),
                    hooks: TransportHooks {
                        slot,
                        node: Arc::downgrade(&shared),
                    },
                };
                match &factory {
                    Some(factory) => factory(context),
                    None => tcp_transport(context),
                }
            })
            .collect();
        *shared.transports.write() = transports;

        debug!(
            %endpoint,
            pool_size,
            working = shared.working.load(Ordering::Acquire),
            "node created"
        );
        Self { shared }
    }

    pub fn endpoint(&self) -> SocketAddr {
        self.shared.endpoint
    }

    pub fn pool_size(&self) -> usize {
        self.shared.pool_size
    }

    /// Number of transports currently alive.
    pub fn working_transports(&self) -> usize {
        self.shared.working.load(Ordering::Acquire)
    }

    /// True while working transports are at or below the dead threshold.
    pub fn is_dead(&self) -> bool {
        self.shared.dead.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.disposed.load(Ordering::Acquire)
    }

    /// Number of transports idle right now.
    pub fn available_transports(&self) -> usize {
        self.shared.idle.lock().slots.len()
    }

    /// Send a request on the first idle transport.
    ///
    /// Waits up to `timeout` for a transport to become idle (`None` waits
    /// as long as the node has a working transport). Returns `false` when
    /// the node is disposed, has no working transport, or the wait timed
    /// out; the request's callback then runs immediately with
    /// [`Status::InternalError`]. A request that cannot be framed (see
    /// [`Request::validate`]) is refused with [`Status::InvalidArguments`]
    /// before any transport sees it. On `true` the callback runs once the
    /// response arrives or the transport fails.
    pub fn try_send(&self, request: impl Into<Request>, timeout: Option<Duration>) -> bool {
        let request = request.into();
        if let Err(e) = request.validate() {
            debug!(endpoint = %self.shared.endpoint, error = %e, "request rejected");
            REQUESTS_REJECTED.increment();
            request.fail(Status::InvalidArguments);
            return false;
        }
        match self.dispatch(request, timeout) {
            Ok(()) => true,
            Err(request) => {
                request.fail(Status::InternalError);
                false
            }
        }
    }

    /// Like [`try_send`](Self::try_send), but gives a rejected request back
    /// instead of completing it. Call [`Request::validate`] on the returned
    /// request to tell a malformed request from a busy node.
    pub fn try_dispatch(&self, request: Request, timeout: Option<Duration>) -> Result<(), Request> {
        if request.validate().is_err() {
            REQUESTS_REJECTED.increment();
            return Err(request);
        }
        self.dispatch(request, timeout)
    }

    fn dispatch(&self, request: Request, timeout: Option<Duration>) -> Result<(), Request> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut request = request;
        loop {
            let Some(slot) = self.shared.checkout(deadline) else {
                REQUESTS_REJECTED.increment();
                return Err(request);
            };
            let Some(transport) = self.shared.transports.read().get(slot).cloned() else {
                REQUESTS_REJECTED.increment();
                return Err(request);
            };
            match transport.try_send(request) {
                Ok(()) => {
                    REQUESTS_SENT.increment();
                    return Ok(());
                }
                // The slot went stale between being listed and being taken;
                // the transport lists itself again once it can take work.
                Err(returned) => request = returned,
            }
        }
    }

    /// Register a listener for [`NodeEvent`]s.
    pub fn subscribe(
        &self,
        listener: impl Fn(&NodeEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.shared.listeners.subscribe(listener)
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.listeners.unsubscribe(id)
    }

    /// Shut every transport down and wake blocked senders, which return
    /// `false`. Later calls do nothing.
    pub fn dispose(&self) {
        let shared = &self.shared;
        if shared.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut idle = shared.idle.lock();
            idle.slots.clear();
            idle.queued.iter_mut().for_each(|q| *q = false);
            shared.idle_ready.notify_all();
        }

        let transports = std::mem::take(&mut *shared.transports.write());
        for transport in &transports {
            transport.shutdown();
        }

        let mut health = shared.health.lock();
        TRANSPORTS_WORKING.sub(health.working as i64);
        if health.dead {
            NODES_DEAD.decrement();
        }
        health.alive.iter_mut().for_each(|a| *a = false);
        health.working = 0;
        health.dead = true;
        shared.working.store(0, Ordering::Release);
        shared.dead.store(true, Ordering::Release);
        drop(health);

        info!(endpoint = %shared.endpoint, "node disposed");
    }
}

impl Drop for MemcacheNode {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for MemcacheNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemcacheNode")
            .field("endpoint", &self.shared.endpoint)
            .field("pool_size", &self.shared.pool_size)
            .field("working", &self.working_transports())
            .field("dead", &self.is_dead())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

impl Shared {
    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Take an idle slot, waiting until `deadline` (forever if `None`).
    fn checkout(&self, deadline: Option<Instant>) -> Option<usize> {
        let mut idle = self.idle.lock();
        loop {
            if self.is_disposed() || self.working.load(Ordering::Acquire) == 0 {
                return None;
            }
            if let Some(slot) = idle.slots.pop_front() {
                idle.queued[slot] = false;
                return Some(slot);
            }
            match deadline {
                None => self.idle_ready.wait(&mut idle),
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return None;
                    }
                    self.idle_ready.wait_until(&mut idle, deadline);
                }
            }
        }
    }

    fn make_available(&self, slot: usize) {
        if self.is_disposed() {
            return;
        }
        let mut idle = self.idle.lock();
        if slot < idle.queued.len() && !idle.queued[slot] {
            idle.queued[slot] = true;
            idle.slots.push_back(slot);
            self.idle_ready.notify_one();
        }
    }

    /// Record a transport's liveness. Node transitions and their events
    /// happen under the health lock, so listeners see them in order.
    fn set_alive(&self, slot: usize, alive: bool) {
        if self.is_disposed() {
            return;
        }
        let mut health = self.health.lock();
        match health.alive.get(slot) {
            Some(&current) if current != alive => {}
            _ => return,
        }
        health.alive[slot] = alive;
        if alive {
            health.working += 1;
            TRANSPORTS_WORKING.increment();
        } else {
            health.working -= 1;
            TRANSPORTS_WORKING.decrement();
        }
        self.working.store(health.working, Ordering::Release);

        if !alive {
            let mut idle = self.idle.lock();
            if idle.queued[slot] {
                idle.queued[slot] = false;
                idle.slots.retain(|s| *s != slot);
            }
            if health.working == 0 {
                self.idle_ready.notify_all();
            }
        }

        let dead = health.working <= self.dead_threshold;
        if dead == health.dead {
            return;
        }
        health.dead = dead;
        self.dead.store(dead, Ordering::Release);
        if dead {
            NODES_DEAD.increment();
            warn!(endpoint = %self.endpoint, working = health.working, "node dead");
            self.listeners.emit(&NodeEvent::Dead {
                endpoint: self.endpoint,
            });
        } else {
            NODES_DEAD.decrement();
            info!(endpoint = %self.endpoint, working = health.working, "node alive");
            self.listeners.emit(&NodeEvent::Alive {
                endpoint: self.endpoint,
            });
        }
    }

    fn transport_error(&self, error: Error) {
        TRANSPORT_ERRORS.increment();
        warn!(endpoint = %self.endpoint, error = %error, "transport error");
        self.listeners.emit(&NodeEvent::TransportError {
            endpoint: self.endpoint,
            error: Arc::new(error),
        });
    }
}

// -- TransportHooks ----------------------------------------------------------

/// A transport's line back to its node.
///
/// Holds only a weak reference: once the node is gone every call is a
/// no-op.
#[derive(Clone)]
pub struct TransportHooks {
    slot: usize,
    node: Weak<Shared>,
}

impl TransportHooks {
    /// Hooks attached to no node, for running a transport on its own.
    pub fn detached() -> Self {
        Self {
            slot: 0,
            node: Weak::new(),
        }
    }

    /// Index of this transport in the node's pool.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// The transport started or stopped working.
    pub fn set_alive(&self, alive: bool) {
        if let Some(node) = self.node.upgrade() {
            node.set_alive(self.slot, alive);
        }
    }

    /// The transport is idle and can take a request.
    pub fn available(&self) {
        if let Some(node) = self.node.upgrade() {
            node.make_available(self.slot);
        }
    }

    /// Publish a failure as a [`NodeEvent::TransportError`].
    pub fn transport_error(&self, error: Error) {
        if let Some(node) = self.node.upgrade() {
            node.transport_error(error);
        }
    }

    /// True once the node is disposed or dropped.
    pub fn is_closing(&self) -> bool {
        self.node.upgrade().is_none_or(|node| node.is_disposed())
    }
}

impl fmt::Debug for TransportHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHooks")
            .field("slot", &self.slot)
            .field("attached", &(self.node.strong_count() > 0))
            .finish()
    }
}
