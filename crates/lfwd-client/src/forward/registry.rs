//! Registry for tracking the local forwards of a session.
//!
//! The registry assigns ids to running listeners and provides lifecycle
//! management (register, unregister, list) plus the two bulk operations
//! used on shutdown: closing every forwarded connection and stopping every
//! listener.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info};

use super::local::{ForwarderHandle, ForwarderState};

/// Information about a forward for listing purposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardInfo {
    /// Unique forward ID.
    pub id: String,
    /// Address the listener is bound to.
    pub bind_addr: SocketAddr,
    /// Target as `host:port`.
    pub target: String,
    /// Listener state.
    pub state: ForwarderState,
    /// Number of active connections.
    pub connections: usize,
    /// Bytes sent toward the target.
    pub bytes_sent: u64,
    /// Bytes received from the target.
    pub bytes_received: u64,
}

/// Registry of running local forwards.
///
/// Shared behind an `Arc` so a session disconnect callback can reach it.
pub struct ForwardRegistry {
    /// Listeners keyed by the numeric part of their id.
    forwards: Mutex<BTreeMap<u64, ForwarderHandle>>,
    /// Counter for generating unique forward IDs.
    next_id: AtomicU64,
}

impl ForwardRegistry {
    /// Create a new empty forward registry.
    pub fn new() -> Self {
        Self {
            forwards: Mutex::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a running listener.
    ///
    /// Returns the generated forward ID.
    pub fn register_forward(&self, handle: ForwarderHandle) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format_id(n);
        debug!(
            id = %id,
            addr = %handle.local_addr(),
            target = %handle.spec().target(),
            "Forward registered"
        );
        self.lock().insert(n, handle);
        id
    }

    /// Remove a listener by ID without stopping it.
    pub fn unregister_forward(&self, id: &str) -> Option<ForwarderHandle> {
        let n = parse_id(id)?;
        self.lock().remove(&n)
    }

    /// Look up a listener by ID.
    pub fn get(&self, id: &str) -> Option<ForwarderHandle> {
        let n = parse_id(id)?;
        self.lock().get(&n).cloned()
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Check if no listeners are registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// List all forwards in registration order.
    pub fn list(&self) -> Vec<ForwardInfo> {
        self.lock()
            .iter()
            .map(|(n, handle)| ForwardInfo {
                id: format_id(*n),
                bind_addr: handle.local_addr(),
                target: handle.spec().target(),
                state: handle.state(),
                connections: handle.active_connections(),
                bytes_sent: handle.bytes_sent(),
                bytes_received: handle.bytes_received(),
            })
            .collect()
    }

    /// Abort every forwarded connection of every listener.
    ///
    /// Listeners keep running. Idempotent.
    pub fn close_all(&self) {
        let forwards = self.lock();
        debug!(listeners = forwards.len(), "Closing all forwarded connections");
        for handle in forwards.values() {
            handle.close_connections();
        }
    }

    /// Stop and remove every listener.
    pub async fn stop_all(&self) {
        let forwards = std::mem::take(&mut *self.lock());
        if forwards.is_empty() {
            return;
        }
        info!(count = forwards.len(), "Stopping all forwards");
        for handle in forwards.into_values() {
            handle.stop().await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, ForwarderHandle>> {
        self.forwards
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ForwardRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn format_id(n: u64) -> String {
    format!("fwd-{}", n)
}

fn parse_id(id: &str) -> Option<u64> {
    id.strip_prefix("fwd-")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::LocalForwarder;
    use lfwd_core::forward::LocalForwardSpec;
    use lfwd_core::protocol::ChannelSide;
    use lfwd_core::transport::MemoryLink;
    use lfwd_core::{Session, SessionConfig};

    async fn start_forward(session: &Session, target_port: u16) -> ForwarderHandle {
        let spec =
            LocalForwardSpec::new("127.0.0.1:0".parse().unwrap(), "localhost", target_port);
        LocalForwarder::start(spec, session.clone()).await.unwrap()
    }

    fn session() -> (Session, Session) {
        let (a, b) = MemoryLink::pair();
        (
            Session::new(a, ChannelSide::Client, SessionConfig::default()).unwrap(),
            Session::new(b, ChannelSide::Server, SessionConfig::default()).unwrap(),
        )
    }

    #[test]
    fn test_id_format() {
        assert_eq!(format_id(3), "fwd-3");
        assert_eq!(parse_id("fwd-3"), Some(3));
        assert_eq!(parse_id("fwd-"), None);
        assert_eq!(parse_id("3"), None);
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let (client, _server) = session();
        let registry = ForwardRegistry::new();
        let handle = start_forward(&client, 80).await;
        let addr = handle.local_addr();

        let id = registry.register_forward(handle);
        assert!(id.starts_with("fwd-"));
        assert_eq!(registry.len(), 1);

        let found = registry.get(&id).unwrap();
        assert_eq!(found.local_addr(), addr);
        assert!(registry.get("fwd-999").is_none());

        registry.stop_all().await;
    }

    #[tokio::test]
    async fn test_unique_ids() {
        let (client, _server) = session();
        let registry = ForwardRegistry::new();

        let id1 = registry.register_forward(start_forward(&client, 80).await);
        let id2 = registry.register_forward(start_forward(&client, 81).await);
        assert_ne!(id1, id2);

        registry.stop_all().await;
    }

    #[tokio::test]
    async fn test_unregister_leaves_listener_running() {
        let (client, _server) = session();
        let registry = ForwardRegistry::new();
        let id = registry.register_forward(start_forward(&client, 80).await);

        let removed = registry.unregister_forward(&id).unwrap();
        assert!(registry.is_empty());
        assert!(registry.unregister_forward(&id).is_none());
        assert_eq!(removed.state(), ForwarderState::Listening);

        removed.stop().await;
    }

    #[tokio::test]
    async fn test_list_forwards() {
        let (client, _server) = session();
        let registry = ForwardRegistry::new();
        let first = registry.register_forward(start_forward(&client, 80).await);
        let second = registry.register_forward(start_forward(&client, 5432).await);

        let forwards = registry.list();
        assert_eq!(forwards.len(), 2);
        assert_eq!(forwards[0].id, first);
        assert_eq!(forwards[0].target, "localhost:80");
        assert_eq!(forwards[1].id, second);
        assert_eq!(forwards[1].target, "localhost:5432");
        for info in &forwards {
            assert_eq!(info.state, ForwarderState::Listening);
            assert_eq!(info.connections, 0);
            assert_eq!(info.bytes_sent, 0);
            assert_eq!(info.bytes_received, 0);
            assert_ne!(info.bind_addr.port(), 0);
        }

        registry.stop_all().await;
    }

    #[tokio::test]
    async fn test_stop_all_empties_registry() {
        let (client, _server) = session();
        let registry = ForwardRegistry::new();
        let handle = start_forward(&client, 80).await;
        registry.register_forward(handle.clone());

        registry.close_all();
        registry.close_all();
        assert_eq!(handle.state(), ForwarderState::Listening);

        registry.stop_all().await;
        assert!(registry.is_empty());
        assert_eq!(handle.state(), ForwarderState::Stopped);
        registry.stop_all().await;
    }
}
