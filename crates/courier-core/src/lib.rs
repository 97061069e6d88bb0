//! # courier-core
//!
//! Presence tracking and message relaying for the Courier realtime chat
//! server.
//!
//! This crate provides the concurrent core of the system:
//!
//! - **Registry** - Maps each reachable user to their live connection
//! - **Store** - Trait over the durable user/message collaborator
//! - **Relay** - Persists messages and attempts synchronous delivery
//! - **Tracker** - Bulk read transitions and read receipts
//! - **Notifier** - Ephemeral typing indicators
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  Connection │────▶│    Relay    │────▶│    Store    │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        │                   │
//!        │                   ▼
//!        │            ┌─────────────┐
//!        └───────────▶│  Registry   │
//!                     └─────────────┘
//! ```
//!
//! The registry is the only state shared across connections; everything
//! else is either persisted through the [`Store`] seam or kept on the
//! connection's own task.

pub mod model;
pub mod notifier;
pub mod registry;
pub mod relay;
pub mod store;
pub mod tracker;

pub use model::User;
pub use notifier::TypingNotifier;
pub use registry::{ConnectionHandle, ConnectionId, PresenceRegistry};
pub use relay::{MessageRelay, RelayError};
pub use store::{MemoryStore, NewMessage, Store, StoreError};
pub use tracker::StatusTracker;
