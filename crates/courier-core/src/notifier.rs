//! Typing indicators for Courier.
//!
//! Typing signals are transient: nothing is persisted, nothing is queued or
//! retried, and an unreachable receiver means the signal is simply dropped.

use crate::registry::PresenceRegistry;
use courier_protocol::ServerEvent;
use std::sync::Arc;
use uuid::Uuid;

/// Stateless pass-through of typing / stop-typing signals.
#[derive(Clone)]
pub struct TypingNotifier {
    registry: Arc<PresenceRegistry>,
}

impl TypingNotifier {
    /// Create a notifier over the given registry.
    #[must_use]
    pub fn new(registry: Arc<PresenceRegistry>) -> Self {
        Self { registry }
    }

    /// Tell `receiver_id` that `sender_id` is composing a message.
    pub fn typing(&self, sender_id: Uuid, receiver_id: Uuid) {
        self.relay_signal(receiver_id, ServerEvent::UserTyping { user_id: sender_id });
    }

    /// Tell `receiver_id` that `sender_id` stopped composing.
    pub fn stop_typing(&self, sender_id: Uuid, receiver_id: Uuid) {
        self.relay_signal(
            receiver_id,
            ServerEvent::UserStopTyping { user_id: sender_id },
        );
    }

    fn relay_signal(&self, receiver_id: Uuid, event: ServerEvent) {
        if let Some(handle) = self.registry.get(receiver_id) {
            handle.push(event);
        }
    }
}
