use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{EventEnvelope, EventStoreError, Result, StreamId, Version};

/// Options for appending events to the store.
#[derive(Debug, Clone, Default)]
pub struct AppendOptions {
    /// Expected version of the stream for optimistic concurrency control.
    /// If None, no version check is performed (use with caution).
    pub expected_version: Option<Version>,
}

impl AppendOptions {
    /// Creates options with no version check.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates options expecting the stream to be at a specific version.
    pub fn expect_version(version: Version) -> Self {
        Self {
            expected_version: Some(version),
        }
    }

    /// Creates options expecting the stream to not exist yet.
    pub fn expect_new() -> Self {
        Self {
            expected_version: Some(Version::initial()),
        }
    }
}

/// A stream of event envelopes.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<EventEnvelope>> + Send>>;

/// Core trait for event store implementations.
///
/// All implementations must be thread-safe (Send + Sync). Appends to a
/// single stream are atomic and version-checked; there is no cross-stream
/// coordination.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends events to the store.
    ///
    /// Events are appended atomically. If `options.expected_version` is
    /// set, the operation fails with `VersionConflict` when the current
    /// stream version doesn't match.
    ///
    /// Returns the new version of the stream after appending.
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version>;

    /// Retrieves all events for a stream, in version order.
    async fn events_for_stream(&self, stream_id: &StreamId) -> Result<Vec<EventEnvelope>>;

    /// Retrieves events by type across all streams, in timestamp order.
    async fn events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>>;

    /// Streams every stored event in insertion order.
    async fn stream_all_events(&self) -> Result<EventStream>;

    /// Gets the current version of a stream.
    ///
    /// Returns None if the stream doesn't exist.
    async fn stream_version(&self, stream_id: &StreamId) -> Result<Option<Version>>;

    /// Lists the IDs of all streams of the given type.
    ///
    /// Used on restart to enumerate instances that may need resuming.
    async fn list_streams(&self, stream_type: &str) -> Result<Vec<StreamId>>;
}

/// Extension trait providing convenience methods for event stores.
#[async_trait]
pub trait EventStoreExt: EventStore {
    /// Appends a single event to the store.
    async fn append_event(&self, event: EventEnvelope, options: AppendOptions) -> Result<Version> {
        self.append(vec![event], options).await
    }

    /// Checks if a stream exists (has any events).
    async fn stream_exists(&self, stream_id: &StreamId) -> Result<bool> {
        Ok(self.stream_version(stream_id).await?.is_some())
    }
}

// Blanket implementation for all EventStore implementations
impl<T: EventStore + ?Sized> EventStoreExt for T {}

/// Validates a batch of events before appending.
pub fn validate_events_for_append(events: &[EventEnvelope]) -> Result<()> {
    if events.is_empty() {
        return Err(EventStoreError::InvalidAppend(
            "cannot append empty event list".to_string(),
        ));
    }

    let first = &events[0];
    let mut expected_version = first.version;
    for event in events.iter().skip(1) {
        if event.stream_id != first.stream_id {
            return Err(EventStoreError::InvalidAppend(
                "all events must belong to the same stream".to_string(),
            ));
        }
        expected_version = expected_version.next();
        if event.version != expected_version {
            return Err(EventStoreError::InvalidAppend(format!(
                "event versions must be sequential: expected {}, got {}",
                expected_version, event.version
            )));
        }
    }

    Ok(())
}
