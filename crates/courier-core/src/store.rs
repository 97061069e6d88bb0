//! Persistent store seam.
//!
//! Users and messages are owned by an external durable collaborator. The
//! relay core consumes it through the [`Store`] trait so the server can
//! plug in a real database while tests run against [`MemoryStore`].

use crate::model::User;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_protocol::{DeliveryStatus, StoredMessage, UserProfile};
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use uuid::Uuid;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store failed or is unreachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Referenced message does not exist.
    #[error("Message not found: {0}")]
    MessageNotFound(Uuid),

    /// Referenced user does not exist.
    #[error("User not found: {0}")]
    UserNotFound(Uuid),
}

/// A message about to be persisted.
///
/// The sender is always the authenticated user identity, never a transient
/// connection id; persisted records must stay meaningful across reconnects.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub receiver_id: Uuid,
    pub content: String,
}

/// Durable user and message records.
///
/// All status mutations go through this trait and are forward-only along
/// `sent -> delivered -> read`; implementations must never let a status
/// regress.
#[async_trait]
pub trait Store: Send + Sync {
    /// Persist a new message with `status = sent`, assigning its identity
    /// and creation timestamp.
    async fn create_message(&self, new: NewMessage) -> Result<StoredMessage, StoreError>;

    /// Advance a message's status.
    ///
    /// Returns `true` if the row advanced; a transition that would not move
    /// forward is a no-op returning `false`.
    async fn update_status(&self, id: Uuid, status: DeliveryStatus) -> Result<bool, StoreError>;

    /// Set every not-yet-read message from `other_id` to `viewer_id` to
    /// `read`. Returns the number of rows changed.
    async fn mark_conversation_read(
        &self,
        viewer_id: Uuid,
        other_id: Uuid,
    ) -> Result<u64, StoreError>;

    /// Persist a user's online flag and last-seen timestamp.
    async fn set_presence(
        &self,
        user_id: Uuid,
        online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Create a user record if none exists yet; an existing record is
    /// left untouched. Lets a freshly authenticated identity connect
    /// before the account collaborator has provisioned a profile.
    async fn ensure_user(&self, user: User) -> Result<(), StoreError>;

    /// Profile summary for message enrichment.
    async fn user_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError>;

    /// All messages between two users, oldest first. Read-only: history
    /// retrieval never sets `read`.
    async fn messages_between(&self, a: Uuid, b: Uuid) -> Result<Vec<StoredMessage>, StoreError>;
}

/// In-memory store.
///
/// The single-process default and the test double for the relay core.
#[derive(Debug, Default)]
pub struct MemoryStore {
    users: DashMap<Uuid, User>,
    messages: Mutex<Vec<StoredMessage>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user record.
    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    /// Test hook: make subsequent writes fail with
    /// [`StoreError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            Err(StoreError::Unavailable("write failure injected".into()))
        } else {
            Ok(())
        }
    }

    fn lock_messages(&self) -> std::sync::MutexGuard<'_, Vec<StoredMessage>> {
        // Poisoning only happens if a test panicked while holding the lock.
        self.messages
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_message(&self, new: NewMessage) -> Result<StoredMessage, StoreError> {
        self.check_writable()?;

        let message = StoredMessage {
            id: Uuid::new_v4(),
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            content: new.content,
            status: DeliveryStatus::Sent,
            created_at: Utc::now(),
        };

        self.lock_messages().push(message.clone());
        Ok(message)
    }

    async fn update_status(&self, id: Uuid, status: DeliveryStatus) -> Result<bool, StoreError> {
        self.check_writable()?;

        let mut messages = self.lock_messages();
        let message = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(StoreError::MessageNotFound(id))?;

        if message.status.can_advance_to(status) {
            message.status = status;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn mark_conversation_read(
        &self,
        viewer_id: Uuid,
        other_id: Uuid,
    ) -> Result<u64, StoreError> {
        self.check_writable()?;

        let mut count = 0;
        for message in self.lock_messages().iter_mut() {
            if message.sender_id == other_id
                && message.receiver_id == viewer_id
                && message.status != DeliveryStatus::Read
            {
                message.status = DeliveryStatus::Read;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn set_presence(
        &self,
        user_id: Uuid,
        online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check_writable()?;

        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound(user_id))?;
        user.is_online = online;
        user.last_seen = last_seen;
        Ok(())
    }

    async fn ensure_user(&self, user: User) -> Result<(), StoreError> {
        self.check_writable()?;
        self.users.entry(user.id).or_insert(user);
        Ok(())
    }

    async fn user_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.users.get(&user_id).map(|user| user.profile()))
    }

    async fn messages_between(&self, a: Uuid, b: Uuid) -> Result<Vec<StoredMessage>, StoreError> {
        let mut messages: Vec<StoredMessage> = self
            .lock_messages()
            .iter()
            .filter(|m| {
                (m.sender_id == a && m.receiver_id == b)
                    || (m.sender_id == b && m.receiver_id == a)
            })
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str) -> User {
        User::new(Uuid::new_v4(), name, format!("https://avatars.example/{name}"))
    }

    #[tokio::test]
    async fn test_create_message_starts_sent() {
        let store = MemoryStore::new();
        let message = store
            .create_message(NewMessage {
                sender_id: Uuid::new_v4(),
                receiver_id: Uuid::new_v4(),
                content: "hi".into(),
            })
            .await
            .unwrap();

        assert_eq!(message.status, DeliveryStatus::Sent);
        assert_eq!(message.content, "hi");
    }

    #[tokio::test]
    async fn test_update_status_never_regresses() {
        let store = MemoryStore::new();
        let message = store
            .create_message(NewMessage {
                sender_id: Uuid::new_v4(),
                receiver_id: Uuid::new_v4(),
                content: "hi".into(),
            })
            .await
            .unwrap();

        assert!(store
            .update_status(message.id, DeliveryStatus::Read)
            .await
            .unwrap());

        // Read is terminal; attempts to move backward are no-ops.
        assert!(!store
            .update_status(message.id, DeliveryStatus::Delivered)
            .await
            .unwrap());
        assert!(!store
            .update_status(message.id, DeliveryStatus::Sent)
            .await
            .unwrap());

        let unknown = store
            .update_status(Uuid::new_v4(), DeliveryStatus::Read)
            .await;
        assert!(matches!(unknown, Err(StoreError::MessageNotFound(_))));
    }

    #[tokio::test]
    async fn test_mark_conversation_read_is_directional() {
        let store = MemoryStore::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        for _ in 0..2 {
            store
                .create_message(NewMessage {
                    sender_id: alice,
                    receiver_id: bob,
                    content: "a->b".into(),
                })
                .await
                .unwrap();
        }
        store
            .create_message(NewMessage {
                sender_id: bob,
                receiver_id: alice,
                content: "b->a".into(),
            })
            .await
            .unwrap();

        // Bob reads Alice's messages; the opposite direction is untouched.
        assert_eq!(store.mark_conversation_read(bob, alice).await.unwrap(), 2);
        assert_eq!(store.mark_conversation_read(bob, alice).await.unwrap(), 0);

        let history = store.messages_between(alice, bob).await.unwrap();
        let unread: Vec<_> = history
            .iter()
            .filter(|m| m.status != DeliveryStatus::Read)
            .collect();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].sender_id, bob);
    }

    #[tokio::test]
    async fn test_set_presence_updates_user() {
        let store = MemoryStore::new();
        let alice = user("alice");
        let id = alice.id;
        store.insert_user(alice);

        let now = Utc::now();
        store.set_presence(id, true, now).await.unwrap();

        let profile = store.user_profile(id).await.unwrap().unwrap();
        assert_eq!(profile.username, "alice");

        let missing = store.set_presence(Uuid::new_v4(), true, now).await;
        assert!(matches!(missing, Err(StoreError::UserNotFound(_))));
    }

    #[tokio::test]
    async fn test_ensure_user_never_overwrites() {
        let store = MemoryStore::new();
        let alice = user("alice");
        let id = alice.id;

        store.ensure_user(alice).await.unwrap();
        // A later ensure with a placeholder profile must not clobber the
        // provisioned record.
        store
            .ensure_user(User::new(id, id.to_string(), ""))
            .await
            .unwrap();

        let profile = store.user_profile(id).await.unwrap().unwrap();
        assert_eq!(profile.username, "alice");
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);

        let result = store
            .create_message(NewMessage {
                sender_id: Uuid::new_v4(),
                receiver_id: Uuid::new_v4(),
                content: "hi".into(),
            })
            .await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        store.set_fail_writes(false);
        let result = store
            .create_message(NewMessage {
                sender_id: Uuid::new_v4(),
                receiver_id: Uuid::new_v4(),
                content: "hi".into(),
            })
            .await;
        assert!(result.is_ok());
    }
}
