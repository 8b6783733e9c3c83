//! Core type definitions for the showcase sync layer.
//!
//! This crate defines the small, dependency-free types shared by every
//! other crate in the workspace:
//! - Identifiers for queued requests, background tasks, optimistic updates,
//!   offline actions and browser tabs (UUID v7)
//! - Epoch-millisecond timestamps and an injectable clock
//! - The backend entity kinds and the opaque user identity
//!
//! Nothing in here knows about caching, queues or the remote backend.

mod entity;
mod ids;
mod timestamp;

pub use entity::{EntityKind, Identity, Role};
pub use ids::{ActionId, RequestId, TabId, TaskId, UpdateId};
pub use timestamp::{Clock, ManualClock, SystemClock, Timestamp};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("unknown entity kind: {0}")]
    UnknownEntity(String),

    #[error("unknown role: {0}")]
    UnknownRole(String),
}
