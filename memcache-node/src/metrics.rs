//! Client metrics.
//!
//! Process-wide counters shared by every node, exposed through `metriken`
//! for whatever exporter the application registers.

use metriken::{Counter, Gauge, metric};

// ── Requests ─────────────────────────────────────────────────────

#[metric(
    name = "memcache/requests/sent",
    description = "Requests accepted by a transport"
)]
pub static REQUESTS_SENT: Counter = Counter::new();

#[metric(
    name = "memcache/requests/failed",
    description = "Requests completed with a client-side InternalError"
)]
pub static REQUESTS_FAILED: Counter = Counter::new();

#[metric(
    name = "memcache/requests/rejected",
    description = "Requests refused by try_send (timeout, dead or disposed node)"
)]
pub static REQUESTS_REJECTED: Counter = Counter::new();

// ── Transports ───────────────────────────────────────────────────

#[metric(
    name = "memcache/transport/errors",
    description = "Transport failures (I/O, protocol, authentication)"
)]
pub static TRANSPORT_ERRORS: Counter = Counter::new();

#[metric(
    name = "memcache/transport/reconnects",
    description = "Reconnection attempts by dead transports"
)]
pub static TRANSPORT_RECONNECTS: Counter = Counter::new();

#[metric(
    name = "memcache/transport/working",
    description = "Transports currently alive, across all nodes"
)]
pub static TRANSPORTS_WORKING: Gauge = Gauge::new();

// ── Nodes ────────────────────────────────────────────────────────

#[metric(
    name = "memcache/node/dead",
    description = "Nodes currently considered dead"
)]
pub static NODES_DEAD: Gauge = Gauge::new();
