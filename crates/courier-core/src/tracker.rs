//! Read-status tracking for Courier.

use crate::registry::PresenceRegistry;
use crate::store::{Store, StoreError};
use courier_protocol::ServerEvent;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Bulk-advances messages to `read` and notifies the original sender.
#[derive(Clone)]
pub struct StatusTracker {
    store: Arc<dyn Store>,
    registry: Arc<PresenceRegistry>,
}

impl StatusTracker {
    /// Create a tracker over the given store and registry.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, registry: Arc<PresenceRegistry>) -> Self {
        Self { store, registry }
    }

    /// Mark every unread message from `other_id` to `viewer_id` as read.
    ///
    /// If anything changed and the original sender is reachable, they
    /// receive a `messages_read` receipt. Fire-and-forget toward the
    /// caller: no acknowledgment, and a repeat call with nothing newly
    /// unread updates zero rows and succeeds silently.
    ///
    /// # Errors
    ///
    /// Returns a store error if the bulk update fails.
    pub async fn mark_read(&self, viewer_id: Uuid, other_id: Uuid) -> Result<u64, StoreError> {
        let count = self.store.mark_conversation_read(viewer_id, other_id).await?;

        if count > 0 {
            debug!(viewer = %viewer_id, sender = %other_id, count, "Messages marked read");
            if let Some(handle) = self.registry.get(other_id) {
                handle.push(ServerEvent::MessagesRead {
                    read_by: viewer_id,
                    count,
                });
            }
        }

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::User;
    use crate::registry::ConnectionHandle;
    use crate::store::{MemoryStore, NewMessage};
    use tokio::sync::mpsc;

    async fn seed_messages(store: &MemoryStore, sender: Uuid, receiver: Uuid, n: usize) {
        for i in 0..n {
            store
                .create_message(NewMessage {
                    sender_id: sender,
                    receiver_id: receiver,
                    content: format!("message {i}"),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_mark_read_notifies_reachable_sender() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(PresenceRegistry::new());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        store.insert_user(User::new(alice, "alice", ""));
        seed_messages(&store, alice, bob, 3).await;

        let (tx, mut alice_rx) = mpsc::unbounded_channel();
        registry.insert(alice, ConnectionHandle::new(tx));

        let tracker = StatusTracker::new(store as Arc<dyn Store>, registry);
        let count = tracker.mark_read(bob, alice).await.unwrap();
        assert_eq!(count, 3);

        assert_eq!(
            alice_rx.try_recv().unwrap(),
            ServerEvent::MessagesRead {
                read_by: bob,
                count: 3
            }
        );
    }

    #[tokio::test]
    async fn test_repeat_mark_read_is_idempotent_and_silent() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(PresenceRegistry::new());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        seed_messages(&store, alice, bob, 2).await;

        let (tx, mut alice_rx) = mpsc::unbounded_channel();
        registry.insert(alice, ConnectionHandle::new(tx));

        let tracker = StatusTracker::new(store as Arc<dyn Store>, registry);
        assert_eq!(tracker.mark_read(bob, alice).await.unwrap(), 2);
        alice_rx.try_recv().unwrap();

        // Nothing newly unread: zero rows, no receipt.
        assert_eq!(tracker.mark_read(bob, alice).await.unwrap(), 0);
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_mark_read_with_offline_sender_still_updates() {
        let store = Arc::new(MemoryStore::new());
        let registry = Arc::new(PresenceRegistry::new());
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        seed_messages(&store, alice, bob, 1).await;

        let tracker = StatusTracker::new(store.clone() as Arc<dyn Store>, registry);
        assert_eq!(tracker.mark_read(bob, alice).await.unwrap(), 1);

        let history = store.messages_between(alice, bob).await.unwrap();
        assert_eq!(history[0].status, courier_protocol::DeliveryStatus::Read);
    }
}
