//! Registry of live client connections.
//!
//! A user may be connected from several devices at once, so each user id
//! maps to a list of connection handles. The entry for a user exists only
//! while that list is non-empty: presence is read straight off the map's
//! keys.
//!
//! The map sits behind one async mutex. Callers get snapshots (cloned
//! `Arc` handles) and perform the actual sends after the lock is released.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use murmur_shared::protocol::OutboundEvent;
use murmur_shared::types::UserId;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::DeliveryError;

pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for a new connection handle.
pub fn next_connection_id() -> ConnectionId {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}

/// One live bidirectional channel to a client.
///
/// `send` must not block: implementations hand the frame to a writer task
/// (or a buffer in tests) and report failure only when the channel is gone.
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn send(&self, event: &OutboundEvent) -> Result<(), DeliveryError>;

    /// Ask the connection to shut down. Idempotent.
    fn close(&self) -> Result<(), DeliveryError>;
}

/// Result of [`ConnectionRegistry::unregister`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The user still has at least one live connection.
    StillOnline,
    /// That was the user's last connection; the entry is gone.
    WentOffline,
    /// The connection was not registered (already removed elsewhere).
    NotRegistered,
}

#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    connections: Arc<Mutex<HashMap<UserId, Vec<Arc<dyn Connection>>>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, user_id: &UserId, conn: Arc<dyn Connection>) {
        let mut connections = self.connections.lock().await;
        let entry = connections.entry(user_id.clone()).or_default();
        entry.push(conn);

        info!(
            user_id = %user_id,
            connections = entry.len(),
            "connection registered"
        );
    }

    pub async fn unregister(&self, user_id: &UserId, conn_id: ConnectionId) -> Removal {
        let mut connections = self.connections.lock().await;

        let Some(entry) = connections.get_mut(user_id) else {
            return Removal::NotRegistered;
        };

        let before = entry.len();
        entry.retain(|conn| conn.id() != conn_id);
        if entry.len() == before {
            return Removal::NotRegistered;
        }

        if entry.is_empty() {
            connections.remove(user_id);
            info!(user_id = %user_id, "last connection removed");
            Removal::WentOffline
        } else {
            debug!(
                user_id = %user_id,
                remaining = entry.len(),
                "connection removed"
            );
            Removal::StillOnline
        }
    }

    /// Remove and close every connection of `user_id`. Close failures are
    /// logged and skipped. Returns how many connections were removed.
    pub async fn close_all(&self, user_id: &UserId) -> usize {
        let removed = self
            .connections
            .lock()
            .await
            .remove(user_id)
            .unwrap_or_default();

        for conn in &removed {
            if let Err(e) = conn.close() {
                debug!(user_id = %user_id, conn_id = conn.id(), error = %e, "close failed");
            }
        }

        if !removed.is_empty() {
            info!(user_id = %user_id, closed = removed.len(), "closed all connections");
        }
        removed.len()
    }

    pub async fn is_online(&self, user_id: &UserId) -> bool {
        self.connections.lock().await.contains_key(user_id)
    }

    /// Snapshot of the ids currently online, sorted.
    pub async fn online_user_ids(&self) -> Vec<UserId> {
        let mut ids: Vec<UserId> = self.connections.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot of one user's connections.
    pub async fn connections_of(&self, user_id: &UserId) -> Vec<Arc<dyn Connection>> {
        self.connections
            .lock()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Snapshot of every registered connection, paired with its owner.
    pub async fn all_connections(&self) -> Vec<(UserId, Arc<dyn Connection>)> {
        self.connections
            .lock()
            .await
            .iter()
            .flat_map(|(user_id, conns)| {
                conns.iter().map(move |conn| (user_id.clone(), conn.clone()))
            })
            .collect()
    }

    pub async fn connection_count(&self, user_id: &UserId) -> usize {
        self.connections
            .lock()
            .await
            .get(user_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
