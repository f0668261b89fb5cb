//! Live WebSocket connections keyed by correlation id.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use etl_protocol::CorrelationId;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection {0} is already open")]
    Duplicate(CorrelationId),
    #[error("no open connection for {0}")]
    NotConnected(CorrelationId),
}

/// One open connection.
#[derive(Debug)]
pub struct ConnectionHandle {
    pub correlation_id: CorrelationId,
    pub connected_at: Instant,
    /// Frames pushed here are written to the socket by its connection task.
    outbound: mpsc::UnboundedSender<String>,
}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<CorrelationId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Record a connection. The returned guard removes it when dropped, so
    /// every exit path of the connection task deregisters.
    pub fn register(
        self: &Arc<Self>,
        id: CorrelationId,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Result<ConnectionGuard, RegistryError> {
        let mut connections = self.connections.write();
        if connections.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        connections.insert(
            id.clone(),
            ConnectionHandle {
                correlation_id: id.clone(),
                connected_at: Instant::now(),
                outbound,
            },
        );
        debug!(correlation_id = %id, total = connections.len(), "Connection registered");
        Ok(ConnectionGuard {
            registry: Arc::clone(self),
            id,
        })
    }

    pub fn deregister(&self, id: &CorrelationId) -> bool {
        let mut connections = self.connections.write();
        let removed = connections.remove(id).is_some();
        if removed {
            debug!(correlation_id = %id, total = connections.len(), "Connection deregistered");
        }
        removed
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.connections.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    pub fn ids(&self) -> Vec<CorrelationId> {
        self.connections.read().keys().cloned().collect()
    }

    /// How long `id` has been connected.
    pub fn connected_for(&self, id: &CorrelationId) -> Option<std::time::Duration> {
        self.connections
            .read()
            .get(id)
            .map(|handle| handle.connected_at.elapsed())
    }

    /// Push a text frame to one connection.
    pub fn send_to(&self, id: &CorrelationId, text: impl Into<String>) -> Result<(), RegistryError> {
        let connections = self.connections.read();
        let handle = connections
            .get(id)
            .ok_or_else(|| RegistryError::NotConnected(id.clone()))?;
        handle
            .outbound
            .send(text.into())
            .map_err(|_| RegistryError::NotConnected(id.clone()))
    }

    /// Push a text frame to every open connection; returns how many accepted it.
    pub fn broadcast(&self, text: &str) -> usize {
        self.connections
            .read()
            .values()
            .filter(|handle| handle.outbound.send(text.to_string()).is_ok())
            .count()
    }
}

/// Deregisters its connection on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    id: CorrelationId,
}

impl ConnectionGuard {
    pub fn id(&self) -> &CorrelationId {
        &self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.registry.deregister(&self.id);
    }
}
