//! Presence registry for Courier.
//!
//! The registry is the process-wide table of reachable users. Each entry
//! maps a user id to the handle of their live connection; entries exist
//! only while a connection is open and are never persisted.

use courier_protocol::ServerEvent;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Process-unique identifier for a single connection.
///
/// Distinct from the user id: a user who reconnects gets a new connection
/// id, which is what lets stale disconnects be told apart from live ones.
pub type ConnectionId = u64;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Allocate a fresh connection id.
#[must_use]
pub fn next_connection_id() -> ConnectionId {
    CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Opaque reference to one live connection.
///
/// Pushing an event enqueues it on the connection's outbound channel; the
/// connection task serializes and writes it in order. Cloning the handle
/// clones the sender, not the connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    /// Wrap an outbound channel in a handle with a fresh connection id.
    #[must_use]
    pub fn new(tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            id: next_connection_id(),
            tx,
        }
    }

    /// The connection id this handle refers to.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Push an event to the connection.
    ///
    /// Returns `false` if the connection's receiving side is gone; the
    /// disconnect path cleans the registry up, callers just observe the
    /// push failing.
    pub fn push(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

/// Concurrent map from user id to live connection handle.
///
/// Shared across every connection task via `Arc` and injected into each
/// component that needs reachability queries. Per-user semantics are
/// last-writer-wins; there is no ordering guarantee across different
/// users' registrations.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    connections: DashMap<Uuid, ConnectionHandle>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a user, replacing any previous mapping.
    ///
    /// A superseded connection is not closed here; its own disconnect path
    /// will run [`PresenceRegistry::remove_if_current`] and no-op.
    pub fn insert(&self, user_id: Uuid, handle: ConnectionHandle) {
        debug!(user = %user_id, connection = handle.id(), "Presence: registered");
        self.connections.insert(user_id, handle);
    }

    /// Remove the user's mapping only if it still points at `connection_id`.
    ///
    /// Returns `true` if an entry was removed. This is the atomic
    /// compare-and-delete that keeps a stale disconnect from evicting a
    /// newer connection for the same user.
    pub fn remove_if_current(&self, user_id: Uuid, connection_id: ConnectionId) -> bool {
        let removed = self
            .connections
            .remove_if(&user_id, |_, handle| handle.id() == connection_id)
            .is_some();
        if removed {
            debug!(user = %user_id, connection = connection_id, "Presence: unregistered");
        } else {
            trace!(user = %user_id, connection = connection_id, "Presence: stale unregister ignored");
        }
        removed
    }

    /// Look up the live connection for a user.
    #[must_use]
    pub fn get(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.connections.get(&user_id).map(|entry| entry.clone())
    }

    /// Check whether a user is currently reachable.
    #[must_use]
    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.connections.contains_key(&user_id)
    }

    /// Number of currently registered connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if no one is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Snapshot of all currently reachable user ids.
    #[must_use]
    pub fn online_users(&self) -> Vec<Uuid> {
        self.connections.iter().map(|entry| *entry.key()).collect()
    }

    /// Push an event to every registered connection.
    pub fn broadcast(&self, event: &ServerEvent) {
        for entry in self.connections.iter() {
            entry.value().push(event.clone());
        }
    }

    /// Push an event to every registered connection except one user.
    pub fn broadcast_except(&self, event: &ServerEvent, excluded: Uuid) {
        for entry in self.connections.iter() {
            if *entry.key() != excluded {
                entry.value().push(event.clone());
            }
        }
    }
}
