//! Node health notifications.
//!
//! Listeners are plain closures registered on a node with
//! [`MemcacheNode::subscribe`](crate::MemcacheNode::subscribe). They run on
//! whichever thread caused the transition, usually a transport's connection
//! thread, so they should be quick and must not block on the node.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::Error;

/// Something observable happened on a node.
#[derive(Debug, Clone)]
pub enum NodeEvent {
    /// The node went from dead to having enough working transports.
    Alive { endpoint: SocketAddr },
    /// The node's working transports fell to the dead threshold.
    Dead { endpoint: SocketAddr },
    /// A transport hit an I/O, protocol or authentication failure. Fires
    /// for every failure, whether or not node health changed, and always
    /// after the affected request's callback.
    TransportError {
        endpoint: SocketAddr,
        error: Arc<Error>,
    },
}

impl NodeEvent {
    pub fn endpoint(&self) -> SocketAddr {
        match self {
            NodeEvent::Alive { endpoint }
            | NodeEvent::Dead { endpoint }
            | NodeEvent::TransportError { endpoint, .. } => *endpoint,
        }
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Arc<dyn Fn(&NodeEvent) + Send + Sync>;

#[derive(Default)]
pub(crate) struct Listeners {
    next_id: AtomicU64,
    entries: RwLock<Vec<(SubscriptionId, Listener)>>,
}

impl Listeners {
    pub(crate) fn subscribe(
        &self,
        listener: impl Fn(&NodeEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.write().push((id, Arc::new(listener)));
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(entry, _)| *entry != id);
        entries.len() != before
    }

    /// Deliver `event` to every listener. The list is snapshotted first, so
    /// a listener may subscribe or unsubscribe from inside its callback.
    pub(crate) fn emit(&self, event: &NodeEvent) {
        let snapshot: Vec<Listener> = self
            .entries
            .read()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn endpoint() -> SocketAddr {
        "127.0.0.1:11211".parse().unwrap()
    }

    #[test]
    fn test_subscribe_emit_unsubscribe() {
        let listeners = Listeners::default();
        let count = Arc::new(AtomicUsize::new(0));

        let c = count.clone();
        let id = listeners.subscribe(move |event| {
            if matches!(event, NodeEvent::Dead { .. }) {
                c.fetch_add(1, Ordering::SeqCst);
            }
        });

        listeners.emit(&NodeEvent::Dead {
            endpoint: endpoint(),
        });
        listeners.emit(&NodeEvent::Alive {
            endpoint: endpoint(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(listeners.unsubscribe(id));
        assert!(!listeners.unsubscribe(id));
        listeners.emit(&NodeEvent::Dead {
            endpoint: endpoint(),
        });
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn test_listener_can_unsubscribe_itself() {
        let listeners = Arc::new(Listeners::default());
        let slot: Arc<parking_lot::Mutex<Option<SubscriptionId>>> = Default::default();

        let l = listeners.clone();
        let s = slot.clone();
        let id = listeners.subscribe(move |_| {
            if let Some(id) = s.lock().take() {
                l.unsubscribe(id);
            }
        });
        *slot.lock() = Some(id);

        listeners.emit(&NodeEvent::Alive {
            endpoint: endpoint(),
        });
        assert_eq!(listeners.len(), 0);
    }

    #[test]
    fn test_event_endpoint() {
        let event = NodeEvent::TransportError {
            endpoint: endpoint(),
            error: Arc::new(Error::ConnectionClosed),
        };
        assert_eq!(event.endpoint(), endpoint());
    }
}
