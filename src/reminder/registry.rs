//! Connection registry: at most one live delivery channel per user.
//!
//! Registering replaces whatever was there (last connect wins). The
//! superseded handle is dropped, which closes its outbound channel once the
//! transport's pump notices. Unregistering only removes the entry if it is
//! still the same connection, so a late disconnect from a superseded socket
//! cannot evict its replacement.

use std::collections::HashMap;

use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use super::dispatcher::ReminderPayload;

/// Identity of a single live connection.
pub type ConnectionId = Uuid;

/// Sender-free identity of a connection, held by the transport so that
/// dropping the registry's handle is enough to close the channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionKey {
    pub user_id: String,
    pub id: ConnectionId,
}

/// Sending half of a user's live channel.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: String,
    tx: mpsc::UnboundedSender<ReminderPayload>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver the transport drains.
    pub fn new(user_id: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<ReminderPayload>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            tx,
        };
        (handle, rx)
    }

    pub fn key(&self) -> ConnectionKey {
        ConnectionKey {
            user_id: self.user_id.clone(),
            id: self.id,
        }
    }

    /// Push a payload to the client. Fails if the receiving side is gone.
    pub fn send(&self, payload: ReminderPayload) -> Result<(), ReminderPayload> {
        self.tx.send(payload).map_err(|e| e.0)
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handle` for its user, returning the handle it replaced.
    pub async fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let previous = self
            .connections
            .write()
            .await
            .insert(handle.user_id.clone(), handle);
        if let Some(prev) = &previous {
            tracing::debug!(
                user_id = %prev.user_id,
                connection_id = %prev.id,
                "Connection superseded"
            );
        }
        previous
    }

    /// Remove the user's entry if it is still `connection_id`.
    pub async fn unregister(&self, user_id: &str, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(user_id) {
            Some(current) if current.id == connection_id => {
                connections.remove(user_id);
                true
            }
            _ => false,
        }
    }

    pub async fn lookup(&self, user_id: &str) -> Option<ConnectionHandle> {
        self.connections.read().await.get(user_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
