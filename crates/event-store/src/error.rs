use thiserror::Error;

use crate::{StreamId, Version};

/// Errors that can occur when interacting with the event store.
#[derive(Debug, Error)]
pub enum EventStoreError {
    /// The expected version did not match the actual version on append.
    #[error("version conflict on stream {stream_id}: expected {expected}, found {actual}")]
    VersionConflict {
        stream_id: StreamId,
        expected: Version,
        actual: Version,
    },

    /// The events being appended are malformed (empty batch, mixed
    /// streams, or non-sequential versions).
    #[error("invalid append: {0}")]
    InvalidAppend(String),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for event store operations.
pub type Result<T> = std::result::Result<T, EventStoreError>;
