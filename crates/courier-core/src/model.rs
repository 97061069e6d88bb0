//! Domain records owned by the persistent store.

use chrono::{DateTime, Utc};
use courier_protocol::UserProfile;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registered user.
///
/// `is_online` and `last_seen` are mutated only by the presence
/// registration path on connect and disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub avatar: String,
    pub is_online: bool,
    pub last_seen: DateTime<Utc>,
}

impl User {
    /// Create an offline user record.
    #[must_use]
    pub fn new(id: Uuid, username: impl Into<String>, avatar: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
            avatar: avatar.into(),
            is_online: false,
            last_seen: Utc::now(),
        }
    }

    /// Profile summary for message enrichment.
    #[must_use]
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            username: self.username.clone(),
            avatar: self.avatar.clone(),
        }
    }
}
