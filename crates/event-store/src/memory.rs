use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    EventEnvelope, EventStoreError, Result, StreamId, Version,
    store::{AppendOptions, EventStore, EventStream, validate_events_for_append},
};

/// In-memory event store.
///
/// Keeps all events in insertion order behind an async lock. Serves both
/// as the reference implementation of the `EventStore` contract and as
/// the test double for the engine.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    events: Arc<RwLock<Vec<EventEnvelope>>>,
}

impl InMemoryEventStore {
    /// Creates a new empty in-memory event store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of events stored.
    pub async fn event_count(&self) -> usize {
        self.events.read().await.len()
    }

    /// Clears all events.
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(&self, events: Vec<EventEnvelope>, options: AppendOptions) -> Result<Version> {
        validate_events_for_append(&events)?;

        let stream_id = events[0].stream_id.clone();

        let mut store = self.events.write().await;

        let current_version = store
            .iter()
            .filter(|e| e.stream_id == stream_id)
            .map(|e| e.version)
            .max()
            .unwrap_or(Version::initial());

        // Expected-version check stands in for a unique constraint on
        // (stream_id, version).
        if let Some(expected) = options.expected_version
            && current_version != expected
        {
            return Err(EventStoreError::VersionConflict {
                stream_id,
                expected,
                actual: current_version,
            });
        }

        if events[0].version <= current_version && current_version != Version::initial() {
            return Err(EventStoreError::VersionConflict {
                stream_id,
                expected: options.expected_version.unwrap_or(current_version),
                actual: current_version,
            });
        }

        let last_version = events
            .last()
            .map(|e| e.version)
            .unwrap_or(Version::initial());
        store.extend(events);

        Ok(last_version)
    }

    async fn events_for_stream(&self, stream_id: &StreamId) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| &e.stream_id == stream_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| e.version);
        Ok(events)
    }

    async fn events_by_type(&self, event_type: &str) -> Result<Vec<EventEnvelope>> {
        let store = self.events.read().await;
        let mut events: Vec<_> = store
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(events)
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream;

        let store = self.events.read().await;
        let events = store.clone();

        let stream = stream::iter(events.into_iter().map(Ok));
        Ok(Box::pin(stream))
    }

    async fn stream_version(&self, stream_id: &StreamId) -> Result<Option<Version>> {
        let store = self.events.read().await;
        let version = store
            .iter()
            .filter(|e| &e.stream_id == stream_id)
            .map(|e| e.version)
            .max();
        Ok(version)
    }

    async fn list_streams(&self, stream_type: &str) -> Result<Vec<StreamId>> {
        let store = self.events.read().await;
        let mut ids: Vec<StreamId> = Vec::new();
        for event in store.iter() {
            if event.stream_type == stream_type && !ids.contains(&event.stream_id) {
                ids.push(event.stream_id.clone());
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EventStoreExt;

    fn create_test_event(stream_id: &str, version: Version, event_type: &str) -> EventEnvelope {
        EventEnvelope::builder()
            .stream_id(StreamId::new(stream_id))
            .stream_type("OrderSaga")
            .event_type(event_type)
            .version(version)
            .payload_raw(serde_json::json!({"test": true}))
            .build()
    }

    #[tokio::test]
    async fn append_single_event() {
        let store = InMemoryEventStore::new();
        let event = create_test_event("order-1", Version::first(), "TestEvent");

        let version = store
            .append(vec![event], AppendOptions::expect_new())
            .await
            .unwrap();
        assert_eq!(version, Version::first());

        let events = store
            .events_for_stream(&StreamId::new("order-1"))
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn append_multiple_events() {
        let store = InMemoryEventStore::new();

        let events = vec![
            create_test_event("order-1", Version::new(1), "Event1"),
            create_test_event("order-1", Version::new(2), "Event2"),
            create_test_event("order-1", Version::new(3), "Event3"),
        ];

        let version = store
            .append(events, AppendOptions::expect_new())
            .await
            .unwrap();
        assert_eq!(version, Version::new(3));
    }

    #[tokio::test]
    async fn conflict_on_wrong_expected_version() {
        let store = InMemoryEventStore::new();

        let event1 = create_test_event("order-1", Version::first(), "Event1");
        store
            .append(vec![event1], AppendOptions::expect_new())
            .await
            .unwrap();

        let event2 = create_test_event("order-1", Version::new(2), "Event2");
        let result = store
            .append(
                vec![event2],
                AppendOptions::expect_version(Version::initial()),
            )
            .await;

        assert!(matches!(
            result,
            Err(EventStoreError::VersionConflict { .. })
        ));
    }

    #[tokio::test]
    async fn append_with_correct_expected_version() {
        let store = InMemoryEventStore::new();

        let event1 = create_test_event("order-1", Version::first(), "Event1");
        store
            .append(vec![event1], AppendOptions::expect_new())
            .await
            .unwrap();

        let event2 = create_test_event("order-1", Version::new(2), "Event2");
        let result = store
            .append(
                vec![event2],
                AppendOptions::expect_version(Version::first()),
            )
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn duplicate_start_is_a_conflict() {
        let store = InMemoryEventStore::new();

        let event1 = create_test_event("order-1", Version::first(), "SagaStarted");
        store
            .append(vec![event1], AppendOptions::expect_new())
            .await
            .unwrap();

        // A second writer racing to create the same stream loses.
        let event2 = create_test_event("order-1", Version::first(), "SagaStarted");
        let result = store
            .append(vec![event2], AppendOptions::expect_new())
            .await;
        assert!(matches!(
            result,
            Err(EventStoreError::VersionConflict { .. })
        ));
    }

    #[tokio::test]
    async fn rejects_empty_batch() {
        let store = InMemoryEventStore::new();
        let result = store.append(vec![], AppendOptions::new()).await;
        assert!(matches!(result, Err(EventStoreError::InvalidAppend(_))));
    }

    #[tokio::test]
    async fn rejects_mixed_streams() {
        let store = InMemoryEventStore::new();
        let events = vec![
            create_test_event("order-1", Version::new(1), "Event1"),
            create_test_event("order-2", Version::new(2), "Event2"),
        ];
        let result = store.append(events, AppendOptions::new()).await;
        assert!(matches!(result, Err(EventStoreError::InvalidAppend(_))));
    }

    #[tokio::test]
    async fn events_by_type() {
        let store = InMemoryEventStore::new();

        store
            .append(
                vec![create_test_event("o1", Version::first(), "SagaStarted")],
                AppendOptions::new(),
            )
            .await
            .unwrap();
        store
            .append(
                vec![create_test_event("o2", Version::first(), "SagaCancelled")],
                AppendOptions::new(),
            )
            .await
            .unwrap();
        store
            .append(
                vec![create_test_event("o1", Version::new(2), "SagaCancelled")],
                AppendOptions::new(),
            )
            .await
            .unwrap();

        let started = store.events_by_type("SagaStarted").await.unwrap();
        assert_eq!(started.len(), 1);

        let cancelled = store.events_by_type("SagaCancelled").await.unwrap();
        assert_eq!(cancelled.len(), 2);
    }

    #[tokio::test]
    async fn stream_version_and_exists() {
        let store = InMemoryEventStore::new();
        let stream = StreamId::new("order-1");

        assert!(store.stream_version(&stream).await.unwrap().is_none());
        assert!(!store.stream_exists(&stream).await.unwrap());

        let events = vec![
            create_test_event("order-1", Version::new(1), "Event1"),
            create_test_event("order-1", Version::new(2), "Event2"),
        ];
        store.append(events, AppendOptions::new()).await.unwrap();

        assert_eq!(
            store.stream_version(&stream).await.unwrap(),
            Some(Version::new(2))
        );
        assert!(store.stream_exists(&stream).await.unwrap());
    }

    #[tokio::test]
    async fn list_streams_by_type() {
        let store = InMemoryEventStore::new();

        store
            .append(
                vec![create_test_event("o1", Version::first(), "SagaStarted")],
                AppendOptions::new(),
            )
            .await
            .unwrap();
        store
            .append(
                vec![create_test_event("o2", Version::first(), "SagaStarted")],
                AppendOptions::new(),
            )
            .await
            .unwrap();

        let other = EventEnvelope::builder()
            .stream_id(StreamId::new("x"))
            .stream_type("Other")
            .event_type("E")
            .version(Version::first())
            .payload_raw(serde_json::json!({}))
            .build();
        store
            .append(vec![other], AppendOptions::new())
            .await
            .unwrap();

        let streams = store.list_streams("OrderSaga").await.unwrap();
        assert_eq!(streams, vec![StreamId::new("o1"), StreamId::new("o2")]);
    }

    #[tokio::test]
    async fn stream_all_events() {
        use futures_util::StreamExt;

        let store = InMemoryEventStore::new();
        store
            .append(
                vec![create_test_event("o1", Version::first(), "Event1")],
                AppendOptions::new(),
            )
            .await
            .unwrap();
        store
            .append(
                vec![create_test_event("o2", Version::first(), "Event2")],
                AppendOptions::new(),
            )
            .await
            .unwrap();

        let stream = store.stream_all_events().await.unwrap();
        let events: Vec<_> = stream.collect().await;
        assert_eq!(events.len(), 2);
    }
}
