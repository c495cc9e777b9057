//! Append-only event journal.
//!
//! The engine persists every phase transition and decision as an event;
//! on restart an instance is reconstructed by folding its stream. Streams
//! are keyed by caller-supplied IDs (the order id) and appends use
//! optimistic concurrency via an expected-version check, standing in for
//! a unique constraint on `(stream_id, version)`.

pub mod error;
pub mod event;
pub mod memory;
pub mod store;

pub use error::{EventStoreError, Result};
pub use event::{DomainEvent, EventEnvelope, EventEnvelopeBuilder, EventId, StreamId, Version};
pub use memory::InMemoryEventStore;
pub use store::{AppendOptions, EventStore, EventStoreExt, EventStream};
