//! Event-sourced saga engine for order fulfillment.
//!
//! An order saga walks receive, validate, approval, payment, shipping
//! and mark-shipped, journaling every transition to the event store.
//! Operators steer running sagas with signals; a restarted process
//! recovers by folding each journal and resuming its driver.

pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod fulfillment;
pub mod instance;
pub mod ledger;
pub mod phase;
pub mod search;
pub mod shipping;
pub mod signal;
pub mod steps;

pub use config::EngineConfig;
pub use engine::{SagaEngine, SagaOutcome, StartOrder};
pub use error::{EngineError, Result};
pub use events::OrderSagaEvent;
pub use instance::{SagaInstance, SagaStatus};
pub use ledger::{ChargeRecord, ChargeStatus, IdempotencyLedger, InMemoryLedger};
pub use phase::{OrderPhase, ShippingPhase};
pub use search::{OrderFilter, OrderSummary, SearchAttributes, SearchIndex};
pub use shipping::{ShippingAttempt, ShippingSaga};
pub use signal::{Signal, SignalKind, SignalMailbox};
pub use steps::{FulfillmentOps, InMemoryFulfillmentOps, StepError, StepExecutor};
