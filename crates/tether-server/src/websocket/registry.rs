//! Table of live connections.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tether_core::Connection;
use tracing::{debug, warn};

use super::connection::WsConnection;

/// Why [`ConnectionRegistry::add`] refused a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A connection with the same id is already registered.
    #[error("connection id '{0}' already registered")]
    Duplicate(String),
    /// The registry holds `capacity` connections.
    #[error("server at capacity ({capacity} connections)")]
    Full {
        /// Configured limit.
        capacity: usize,
    },
}

/// Live connections indexed by id, optionally bounded.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<WsConnection>>>,
    capacity: usize,
}

impl ConnectionRegistry {
    /// Create an empty, unbounded registry.
    pub fn new() -> Self {
        Self::with_capacity(usize::MAX)
    }

    /// Create an empty registry holding at most `capacity` connections.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    /// Most connections this registry accepts.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether another connection would be refused.
    pub fn is_full(&self) -> bool {
        self.count() >= self.capacity
    }

    /// Add a connection. The duplicate and capacity checks happen under the
    /// same write lock as the insert.
    pub fn add(&self, connection: Arc<WsConnection>) -> Result<(), RegistryError> {
        let mut conns = self.connections.write();
        if conns.contains_key(connection.id()) {
            return Err(RegistryError::Duplicate(connection.id().to_owned()));
        }
        if conns.len() >= self.capacity {
            return Err(RegistryError::Full {
                capacity: self.capacity,
            });
        }
        let _ = conns.insert(connection.id().to_owned(), connection);
        Ok(())
    }

    /// Remove a connection by id.
    pub fn remove(&self, connection_id: &str) -> Option<Arc<WsConnection>> {
        self.connections.write().remove(connection_id)
    }

    /// Look up a connection by id.
    pub fn get(&self, connection_id: &str) -> Option<Arc<WsConnection>> {
        self.connections.read().get(connection_id).cloned()
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.connections.read().len()
    }

    /// Ids of every live connection, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.connections.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Send a close frame to every live connection.
    pub async fn close_all(&self, code: u16, reason: &str) {
        let conns: Vec<Arc<WsConnection>> = self.connections.read().values().cloned().collect();
        debug!(count = conns.len(), code, "closing all connections");
        for conn in conns {
            if let Err(err) = conn.close(code, reason).await {
                warn!(conn_id = conn.id(), error = %err, "close frame not queued");
            }
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::connection::Outbound;
    use tether_core::CancellationToken;
    use tether_core::connection::CLOSE_GOING_AWAY;
    use tokio::sync::mpsc;

    fn make(id: &str) -> (Arc<WsConnection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        (
            Arc::new(WsConnection::new(id.into(), tx, &CancellationToken::new())),
            rx,
        )
    }

    #[test]
    fn add_get_remove() {
        let registry = ConnectionRegistry::new();
        let (a, _rx) = make("a");
        registry.add(a.clone()).unwrap();
        assert_eq!(registry.add(a), Err(RegistryError::Duplicate("a".into())));
        assert_eq!(registry.count(), 1);
        assert!(registry.get("a").is_some());

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn capacity_is_enforced_on_add() {
        let registry = ConnectionRegistry::with_capacity(1);
        let (a, _ra) = make("a");
        let (b, _rb) = make("b");
        registry.add(a).unwrap();
        assert!(registry.is_full());
        assert_eq!(registry.add(b.clone()), Err(RegistryError::Full { capacity: 1 }));
        assert_eq!(registry.ids(), vec!["a"]);

        let _ = registry.remove("a");
        registry.add(b).unwrap();
    }

    #[test]
    fn concurrent_adds_never_exceed_capacity() {
        let registry = Arc::new(ConnectionRegistry::with_capacity(3));
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let (conn, _rx) = make(&format!("c{i}"));
                    registry.add(conn).is_ok()
                })
            })
            .collect();
        let admitted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 3);
        assert_eq!(registry.count(), 3);
    }

    #[test]
    fn ids_are_sorted() {
        let registry = ConnectionRegistry::new();
        let (b, _rb) = make("b");
        let (a, _ra) = make("a");
        let _ = registry.add(b);
        let _ = registry.add(a);
        assert_eq!(registry.ids(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn close_all_queues_close_frames() {
        let registry = ConnectionRegistry::new();
        let (a, mut ra) = make("a");
        let (b, mut rb) = make("b");
        let _ = registry.add(a.clone());
        let _ = registry.add(b);

        registry.close_all(CLOSE_GOING_AWAY, "shutdown").await;

        for rx in [&mut ra, &mut rb] {
            assert_eq!(
                rx.recv().await.unwrap(),
                Outbound::Close {
                    code: CLOSE_GOING_AWAY,
                    reason: "shutdown".into()
                }
            );
        }
        assert!(a.context().is_cancelled());
    }
}
