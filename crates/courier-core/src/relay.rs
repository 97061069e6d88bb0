//! Message relay for Courier.
//!
//! The relay persists outgoing messages and attempts best-effort synchronous
//! delivery to a reachable receiver, advancing the delivery status when the
//! push lands. An unreachable receiver is not an error: the message stays
//! `sent` and the receiver observes it later through history retrieval.

use crate::registry::PresenceRegistry;
use crate::store::{NewMessage, Store, StoreError};
use courier_protocol::{DeliveryStatus, PopulatedMessage, ServerEvent, UserProfile};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};
use uuid::Uuid;

/// Relay errors, reported to the sender in the acknowledgment.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Message content is empty or whitespace.
    #[error("Content is empty")]
    EmptyContent,

    /// No receiver was named.
    #[error("Receiver is required")]
    MissingReceiver,

    /// Sender or receiver has no user record.
    #[error("Unknown user: {0}")]
    UnknownUser(Uuid),

    /// The store failed while persisting.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Persists and relays chat messages between users.
#[derive(Clone)]
pub struct MessageRelay {
    store: Arc<dyn Store>,
    registry: Arc<PresenceRegistry>,
}

impl MessageRelay {
    /// Create a relay over the given store and registry.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, registry: Arc<PresenceRegistry>) -> Self {
        Self { store, registry }
    }

    /// Relay a message from `sender_id` to `receiver_id`.
    ///
    /// Validates, persists with `status = sent`, pushes to the receiver if
    /// reachable (advancing to `delivered`), and returns the message
    /// reflecting the final persisted status. The caller acknowledges the
    /// result to the sender's connection only.
    ///
    /// # Errors
    ///
    /// Returns a validation error before anything is persisted, or a store
    /// error if persistence fails.
    pub async fn send(
        &self,
        sender_id: Uuid,
        receiver_id: Option<Uuid>,
        content: &str,
    ) -> Result<PopulatedMessage, RelayError> {
        let receiver_id = receiver_id.ok_or(RelayError::MissingReceiver)?;
        if content.trim().is_empty() {
            return Err(RelayError::EmptyContent);
        }

        // Resolve both profiles before persisting: a failure reported to
        // the sender must never leave a half-sent record behind.
        let sender = self.profile(sender_id).await?;
        let receiver = self.profile(receiver_id).await?;

        let stored = self
            .store
            .create_message(NewMessage {
                sender_id,
                receiver_id,
                content: content.to_string(),
            })
            .await?;

        let mut message = PopulatedMessage::new(stored, sender, receiver);

        if let Some(handle) = self.registry.get(receiver_id) {
            if handle.push(ServerEvent::ReceiveMessage(message.clone())) {
                // The row may have raced past delivered already (a
                // mark-read landing first); only report what actually
                // persisted.
                if self
                    .store
                    .update_status(message.id, DeliveryStatus::Delivered)
                    .await?
                {
                    message.status = DeliveryStatus::Delivered;
                    debug!(message = %message.id, receiver = %receiver_id, "Message delivered");
                }
            } else {
                // Receiver raced away between lookup and push: deferred
                // delivery, the message stays at sent.
                trace!(message = %message.id, receiver = %receiver_id, "Push failed, delivery deferred");
            }
        } else {
            trace!(message = %message.id, receiver = %receiver_id, "Receiver offline, delivery deferred");
        }

        Ok(message)
    }

    async fn profile(&self, user_id: Uuid) -> Result<UserProfile, RelayError> {
        self.store
            .user_profile(user_id)
            .await?
            .ok_or(RelayError::UnknownUser(user_id))
    }
}
