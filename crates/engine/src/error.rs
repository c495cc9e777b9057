//! Engine error types.

use common::OrderId;
use thiserror::Error;

/// Errors returned by the saga engine's public operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A saga already exists for this order id.
    #[error("order {0} already exists")]
    AlreadyExists(OrderId),

    /// No saga is known for this order id.
    #[error("order {0} not found")]
    NotFound(OrderId),

    /// The saga exists but no driver is running it in this process.
    #[error("order {0} is not running")]
    NotRunning(OrderId),

    /// The start request was malformed.
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    #[error("event store error: {0}")]
    EventStore(#[from] event_store::EventStoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
