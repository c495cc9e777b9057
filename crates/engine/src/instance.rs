//! Saga instance state, folded from the event stream.
//!
//! The instance is never stored directly. It is rebuilt by applying the
//! stream's events in order, which is also how a restarted process
//! figures out where to resume.

use common::{Address, CustomerId, Money, OrderId, OrderItem, OrderPayload, PaymentId, Priority};
use event_store::{EventEnvelope, Version};
use serde::Serialize;

use crate::events::{OrderSagaEvent, PaymentChargedData, SignalRejectedData};
use crate::phase::OrderPhase;

/// Current state of one order saga.
#[derive(Debug, Clone, Default)]
pub struct SagaInstance {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub customer_id: CustomerId,
    pub customer_name: String,
    pub order_total: Money,
    pub priority: Priority,
    pub phase: OrderPhase,
    pub items: Vec<OrderItem>,
    pub address_override: Option<Address>,
    pub approved: bool,
    pub cancel_requested: bool,
    pub rejected_signals: Vec<SignalRejectedData>,
    pub shipping_attempts: u32,
    pub carrier_dispatched: bool,
    pub charge: Option<PaymentChargedData>,
    pub last_error: Option<String>,
    pub version: Version,
}

impl SagaInstance {
    /// Rebuilds an instance from its journaled events.
    ///
    /// Returns None for an empty stream.
    pub fn fold(envelopes: &[EventEnvelope]) -> Result<Option<Self>, serde_json::Error> {
        if envelopes.is_empty() {
            return Ok(None);
        }

        let mut instance = SagaInstance::default();
        for envelope in envelopes {
            let event: OrderSagaEvent = serde_json::from_value(envelope.payload.clone())?;
            instance.apply(&event);
            instance.version = envelope.version;
        }
        Ok(Some(instance))
    }

    /// Applies a single event to the state.
    pub fn apply(&mut self, event: &OrderSagaEvent) {
        match event {
            OrderSagaEvent::SagaStarted(data) => {
                self.order_id = data.order_id.clone();
                self.payment_id = data.payment_id.clone();
                self.customer_id = data.customer_id.clone();
                self.customer_name = data.customer_name.clone();
                self.order_total = data.order_total;
                self.priority = data.priority;
            }
            OrderSagaEvent::PhaseEntered(data) => {
                self.phase = data.phase;
            }
            OrderSagaEvent::OrderReceived(data) => {
                self.items = data.items.clone();
            }
            OrderSagaEvent::OrderValidated => {}
            OrderSagaEvent::ApprovalGranted(_) => {
                self.approved = true;
            }
            OrderSagaEvent::ApprovalTimedOut(_) => {
                self.last_error = Some("approval timed out".to_string());
            }
            OrderSagaEvent::CancelRequested(_) => {
                self.cancel_requested = true;
            }
            OrderSagaEvent::AddressUpdated(data) => {
                // Last write wins.
                self.address_override = Some(data.address.clone());
            }
            OrderSagaEvent::SignalRejected(data) => {
                self.rejected_signals.push(data.clone());
            }
            OrderSagaEvent::PaymentCharged(data) => {
                self.charge = Some(data.clone());
            }
            OrderSagaEvent::ShippingAttemptStarted(data) => {
                self.shipping_attempts = self.shipping_attempts.max(data.attempt);
            }
            OrderSagaEvent::ShippingAttemptFailed(data) => {
                self.last_error = Some(data.error.clone());
            }
            OrderSagaEvent::CarrierDispatched(_) => {
                // Recovery must not run another attempt after this.
                self.carrier_dispatched = true;
                self.last_error = None;
            }
            OrderSagaEvent::ShippingExhausted(data) => {
                self.phase = OrderPhase::ShippingFailed;
                self.last_error = Some(format!("shipping failed after {} attempts", data.attempts));
            }
            OrderSagaEvent::OrderShipped => {}
            OrderSagaEvent::SagaCompleted(_) => {
                self.phase = OrderPhase::Completed;
            }
            OrderSagaEvent::SagaCancelled(_) => {
                self.phase = OrderPhase::Cancelled;
            }
            OrderSagaEvent::SagaFailed(data) => {
                self.phase = OrderPhase::Failed;
                self.last_error = Some(data.reason.clone());
            }
        }
    }

    /// Builds the payload passed to the fulfillment steps, with the
    /// address override applied when one was accepted.
    pub fn payload(&self) -> OrderPayload {
        OrderPayload {
            order_id: self.order_id.clone(),
            items: self.items.clone(),
            shipping_address: self.address_override.clone(),
        }
    }

    /// Snapshot returned by the engine's status query.
    pub fn status(&self) -> SagaStatus {
        SagaStatus {
            order_id: self.order_id.clone(),
            payment_id: self.payment_id.clone(),
            phase: self.phase,
            approved: self.approved,
            cancel_requested: self.cancel_requested,
            address_override: self.address_override.clone(),
            charge: self.charge.clone(),
            shipping_attempts: self.shipping_attempts,
            rejected_signals: self.rejected_signals.clone(),
            last_error: self.last_error.clone(),
        }
    }
}

/// Caller-facing view of a saga instance.
#[derive(Debug, Clone, Serialize)]
pub struct SagaStatus {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub phase: OrderPhase,
    pub approved: bool,
    pub cancel_requested: bool,
    pub address_override: Option<Address>,
    pub charge: Option<PaymentChargedData>,
    pub shipping_attempts: u32,
    pub rejected_signals: Vec<SignalRejectedData>,
    pub last_error: Option<String>,
}
