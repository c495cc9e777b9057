//! Shipping sub-saga.
//!
//! One attempt walks PREPARING then DISPATCHING to DONE. Retrying a
//! failed attempt is the parent saga's job; this module only runs a
//! single attempt to completion or first failure.

use std::sync::Arc;

use common::OrderPayload;
use tracing::{info, warn};

use crate::fulfillment::{self, STEP_DISPATCH, STEP_PREPARE};
use crate::phase::ShippingPhase;
use crate::steps::{FulfillmentOps, StepError, StepExecutor};

/// Outcome of one shipping attempt.
#[derive(Debug, Clone)]
pub struct ShippingAttempt {
    /// Identifier of the attempt, e.g. `order-42-shipping-2`.
    pub attempt_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Phase the attempt reached. `Done` means the carrier has the
    /// package.
    pub phase: ShippingPhase,
    /// Error that stopped the attempt, if it did not reach `Done`.
    pub error: Option<StepError>,
}

impl ShippingAttempt {
    /// Returns true if the carrier was dispatched.
    pub fn succeeded(&self) -> bool {
        self.phase == ShippingPhase::Done
    }
}

/// Runs shipping attempts against the fulfillment operations.
pub struct ShippingSaga {
    executor: StepExecutor,
    ops: Arc<dyn FulfillmentOps>,
}

impl ShippingSaga {
    pub fn new(executor: StepExecutor, ops: Arc<dyn FulfillmentOps>) -> Self {
        Self { executor, ops }
    }

    /// Runs one attempt for the given order payload.
    #[tracing::instrument(skip(self, payload), fields(order_id = %payload.order_id))]
    pub async fn run(&self, payload: &OrderPayload, attempt: u32) -> ShippingAttempt {
        let attempt_id = fulfillment::shipping_attempt_id(&payload.order_id, attempt);
        let mut outcome = ShippingAttempt {
            attempt_id,
            attempt,
            phase: ShippingPhase::Preparing,
            error: None,
        };

        if let Err(error) = self
            .executor
            .run(STEP_PREPARE, || self.ops.prepare_package(payload))
            .await
        {
            warn!(attempt_id = %outcome.attempt_id, %error, "package preparation failed");
            outcome.error = Some(error);
            return outcome;
        }

        outcome.phase = ShippingPhase::Dispatching;
        if let Err(error) = self
            .executor
            .run(STEP_DISPATCH, || self.ops.dispatch_carrier(payload))
            .await
        {
            warn!(attempt_id = %outcome.attempt_id, %error, "carrier dispatch failed");
            outcome.error = Some(error);
            return outcome;
        }

        outcome.phase = ShippingPhase::Done;
        info!(attempt_id = %outcome.attempt_id, "carrier dispatched");
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderId, OrderItem};
    use std::time::Duration;

    use crate::steps::InMemoryFulfillmentOps;

    fn saga(ops: &InMemoryFulfillmentOps) -> ShippingSaga {
        ShippingSaga::new(
            StepExecutor::new(Duration::from_secs(4), 3, Duration::from_millis(100)),
            Arc::new(ops.clone()),
        )
    }

    fn payload() -> OrderPayload {
        OrderPayload::new(OrderId::new("order-42"), vec![OrderItem::new("ABC", 1)])
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_walks_both_phases() {
        let ops = InMemoryFulfillmentOps::new();
        let outcome = saga(&ops).run(&payload(), 1).await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.attempt_id, "order-42-shipping-1");
        assert_eq!(ops.call_count(STEP_PREPARE).await, 1);
        assert_eq!(ops.call_count(STEP_DISPATCH).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn prepare_failure_stops_the_attempt() {
        let ops = InMemoryFulfillmentOps::new();
        ops.set_fail_times(STEP_PREPARE, 10).await;

        let outcome = saga(&ops).run(&payload(), 2).await;
        assert!(!outcome.succeeded());
        assert_eq!(outcome.phase, ShippingPhase::Preparing);
        assert!(outcome.error.is_some());
        assert_eq!(ops.call_count(STEP_DISPATCH).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_failure_stops_after_prepare() {
        let ops = InMemoryFulfillmentOps::new();
        ops.set_fail_times(STEP_DISPATCH, 10).await;

        let outcome = saga(&ops).run(&payload(), 1).await;
        assert!(!outcome.succeeded());
        assert_eq!(outcome.phase, ShippingPhase::Dispatching);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_inside_an_attempt_are_retried() {
        let ops = InMemoryFulfillmentOps::new();
        ops.set_fail_times(STEP_DISPATCH, 2).await;

        let outcome = saga(&ops).run(&payload(), 1).await;
        assert!(outcome.succeeded());
        assert_eq!(ops.call_count(STEP_DISPATCH).await, 3);
    }
}
