//! Postgres-backed store.
//!
//! Implements the [`Store`] seam over sqlx. The forward-only status
//! discipline is expressed in SQL so that concurrent writers cannot
//! regress a row regardless of interleaving.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{NewMessage, Store, StoreError};
use courier_protocol::{DeliveryStatus, StoredMessage, UserProfile};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::info;
use uuid::Uuid;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id         UUID PRIMARY KEY,
    username   TEXT NOT NULL,
    avatar     TEXT NOT NULL DEFAULT '',
    is_online  BOOLEAN NOT NULL DEFAULT FALSE,
    last_seen  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE TABLE IF NOT EXISTS messages (
    id          UUID PRIMARY KEY,
    sender_id   UUID NOT NULL REFERENCES users(id),
    receiver_id UUID NOT NULL REFERENCES users(id),
    content     TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'sent',
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages (sender_id, receiver_id, created_at);
"#;

/// Store backed by a Postgres connection pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to Postgres and ensure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot be established or the schema
    /// statements fail.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(backend)?;

        sqlx::raw_sql(SCHEMA).execute(&pool).await.map_err(backend)?;

        info!("Connected to Postgres store");
        Ok(Self { pool })
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn row_to_message(row: &PgRow) -> Result<StoredMessage, StoreError> {
    let status: String = row.get("status");
    let status = DeliveryStatus::parse(&status)
        .ok_or_else(|| StoreError::Unavailable(format!("unknown status in store: {status}")))?;

    Ok(StoredMessage {
        id: row.get("id"),
        sender_id: row.get("sender_id"),
        receiver_id: row.get("receiver_id"),
        content: row.get("content"),
        status,
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl Store for PgStore {
    async fn create_message(&self, new: NewMessage) -> Result<StoredMessage, StoreError> {
        let message = StoredMessage {
            id: Uuid::new_v4(),
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            content: new.content,
            status: DeliveryStatus::Sent,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO messages (id, sender_id, receiver_id, content, status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(message.id)
        .bind(message.sender_id)
        .bind(message.receiver_id)
        .bind(&message.content)
        .bind(message.status.as_str())
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(message)
    }

    async fn update_status(&self, id: Uuid, status: DeliveryStatus) -> Result<bool, StoreError> {
        // The WHERE clause encodes the legal forward transitions; anything
        // else matches zero rows.
        let result = sqlx::query(
            "UPDATE messages SET status = $2 \
             WHERE id = $1 \
               AND ((status = 'sent' AND $2 IN ('delivered', 'read')) \
                 OR (status = 'delivered' AND $2 = 'read'))",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        let exists = sqlx::query("SELECT 1 FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?
            .is_some();

        if exists {
            Ok(false)
        } else {
            Err(StoreError::MessageNotFound(id))
        }
    }

    async fn mark_conversation_read(
        &self,
        viewer_id: Uuid,
        other_id: Uuid,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE messages SET status = 'read' \
             WHERE sender_id = $1 AND receiver_id = $2 AND status <> 'read'",
        )
        .bind(other_id)
        .bind(viewer_id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected())
    }

    async fn set_presence(
        &self,
        user_id: Uuid,
        online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE users SET is_online = $2, last_seen = $3 WHERE id = $1")
            .bind(user_id)
            .bind(online)
            .bind(last_seen)
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound(user_id));
        }
        Ok(())
    }

    async fn ensure_user(&self, user: courier_core::User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, username, avatar, is_online, last_seen) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.avatar)
        .bind(user.is_online)
        .bind(user.last_seen)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    async fn user_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query("SELECT id, username, avatar FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        Ok(row.map(|row| UserProfile {
            id: row.get("id"),
            username: row.get("username"),
            avatar: row.get("avatar"),
        }))
    }

    async fn messages_between(&self, a: Uuid, b: Uuid) -> Result<Vec<StoredMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, sender_id, receiver_id, content, status, created_at FROM messages \
             WHERE (sender_id = $1 AND receiver_id = $2) \
                OR (sender_id = $2 AND receiver_id = $1) \
             ORDER BY created_at ASC",
        )
        .bind(a)
        .bind(b)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter().map(row_to_message).collect()
    }
}
