//! Order saga domain events.
//!
//! Every phase transition and every decision the engine makes is recorded
//! as one of these events on the order's stream. Folding the stream
//! reconstructs the instance after a restart.

use chrono::{DateTime, Utc};
use common::{Address, CustomerId, Money, OrderId, OrderItem, PaymentId, Priority};
use event_store::DomainEvent;
use serde::{Deserialize, Serialize};

use crate::ledger::ChargeStatus;
use crate::phase::OrderPhase;
use crate::signal::SignalKind;

/// Events that can occur during an order saga.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OrderSagaEvent {
    /// Saga instance created; carries the filterable start attributes.
    SagaStarted(SagaStartedData),

    /// The saga moved to a new (non-terminal) phase.
    PhaseEntered(PhaseEnteredData),

    /// The receive step completed and produced the order payload.
    OrderReceived(OrderReceivedData),

    /// The validate step accepted the order payload.
    OrderValidated,

    /// An operator approved the order.
    ApprovalGranted(TimestampData),

    /// The approval window elapsed with no decision (terminal failure,
    /// distinct from cancellation).
    ApprovalTimedOut(TimestampData),

    /// A cancel signal was accepted in a cancellable phase.
    CancelRequested(TimestampData),

    /// An address-update signal was accepted (last write wins).
    AddressUpdated(AddressUpdatedData),

    /// A signal arrived in a phase where it is not applicable; recorded
    /// for the status query, never surfaced as a caller error.
    SignalRejected(SignalRejectedData),

    /// Payment was charged (or an existing charge record was reused).
    PaymentCharged(PaymentChargedData),

    /// A shipping sub-saga attempt started.
    ShippingAttemptStarted(ShippingAttemptData),

    /// A shipping sub-saga attempt failed.
    ShippingAttemptFailed(ShippingAttemptFailedData),

    /// The carrier was dispatched by a shipping attempt.
    CarrierDispatched(ShippingAttemptData),

    /// Every shipping attempt failed (terminal).
    ShippingExhausted(ShippingExhaustedData),

    /// The mark-shipped step completed.
    OrderShipped,

    /// Saga completed successfully (terminal).
    SagaCompleted(TimestampData),

    /// Saga cancelled by an operator (terminal).
    SagaCancelled(TimestampData),

    /// Saga failed (terminal).
    SagaFailed(SagaFailedData),
}

impl DomainEvent for OrderSagaEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderSagaEvent::SagaStarted(_) => "SagaStarted",
            OrderSagaEvent::PhaseEntered(_) => "PhaseEntered",
            OrderSagaEvent::OrderReceived(_) => "OrderReceived",
            OrderSagaEvent::OrderValidated => "OrderValidated",
            OrderSagaEvent::ApprovalGranted(_) => "ApprovalGranted",
            OrderSagaEvent::ApprovalTimedOut(_) => "ApprovalTimedOut",
            OrderSagaEvent::CancelRequested(_) => "CancelRequested",
            OrderSagaEvent::AddressUpdated(_) => "AddressUpdated",
            OrderSagaEvent::SignalRejected(_) => "SignalRejected",
            OrderSagaEvent::PaymentCharged(_) => "PaymentCharged",
            OrderSagaEvent::ShippingAttemptStarted(_) => "ShippingAttemptStarted",
            OrderSagaEvent::ShippingAttemptFailed(_) => "ShippingAttemptFailed",
            OrderSagaEvent::CarrierDispatched(_) => "CarrierDispatched",
            OrderSagaEvent::ShippingExhausted(_) => "ShippingExhausted",
            OrderSagaEvent::OrderShipped => "OrderShipped",
            OrderSagaEvent::SagaCompleted(_) => "SagaCompleted",
            OrderSagaEvent::SagaCancelled(_) => "SagaCancelled",
            OrderSagaEvent::SagaFailed(_) => "SagaFailed",
        }
    }
}

/// Data for SagaStarted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStartedData {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub customer_id: CustomerId,
    pub customer_name: String,
    pub order_total: Money,
    pub priority: Priority,
    pub started_at: DateTime<Utc>,
}

/// Data for PhaseEntered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseEnteredData {
    pub phase: OrderPhase,
}

/// Data for OrderReceived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceivedData {
    pub items: Vec<OrderItem>,
}

/// Timestamp-only event data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampData {
    pub at: DateTime<Utc>,
}

/// Data for AddressUpdated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressUpdatedData {
    pub address: Address,
}

/// Data for SignalRejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalRejectedData {
    /// What kind of signal was rejected.
    pub kind: SignalKind,
    /// The phase the saga was in when the signal was drained.
    pub phase: OrderPhase,
}

/// Data for PaymentCharged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentChargedData {
    pub payment_id: PaymentId,
    pub status: ChargeStatus,
    pub amount: Money,
}

/// Data for shipping attempt start/success events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingAttemptData {
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Data for ShippingAttemptFailed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingAttemptFailedData {
    pub attempt: u32,
    pub error: String,
}

/// Data for ShippingExhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingExhaustedData {
    pub attempts: u32,
}

/// Data for SagaFailed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaFailedData {
    pub reason: String,
    pub failed_at: DateTime<Utc>,
}

// Convenience constructors
impl OrderSagaEvent {
    /// Creates a SagaStarted event.
    pub fn saga_started(
        order_id: OrderId,
        payment_id: PaymentId,
        customer_id: CustomerId,
        customer_name: impl Into<String>,
        order_total: Money,
        priority: Priority,
    ) -> Self {
        OrderSagaEvent::SagaStarted(SagaStartedData {
            order_id,
            payment_id,
            customer_id,
            customer_name: customer_name.into(),
            order_total,
            priority,
            started_at: Utc::now(),
        })
    }

    /// Creates a PhaseEntered event.
    pub fn phase_entered(phase: OrderPhase) -> Self {
        OrderSagaEvent::PhaseEntered(PhaseEnteredData { phase })
    }

    /// Creates an OrderReceived event.
    pub fn order_received(items: Vec<OrderItem>) -> Self {
        OrderSagaEvent::OrderReceived(OrderReceivedData { items })
    }

    /// Creates an ApprovalGranted event.
    pub fn approval_granted() -> Self {
        OrderSagaEvent::ApprovalGranted(TimestampData { at: Utc::now() })
    }

    /// Creates an ApprovalTimedOut event.
    pub fn approval_timed_out() -> Self {
        OrderSagaEvent::ApprovalTimedOut(TimestampData { at: Utc::now() })
    }

    /// Creates a CancelRequested event.
    pub fn cancel_requested() -> Self {
        OrderSagaEvent::CancelRequested(TimestampData { at: Utc::now() })
    }

    /// Creates an AddressUpdated event.
    pub fn address_updated(address: Address) -> Self {
        OrderSagaEvent::AddressUpdated(AddressUpdatedData { address })
    }

    /// Creates a SignalRejected event.
    pub fn signal_rejected(kind: SignalKind, phase: OrderPhase) -> Self {
        OrderSagaEvent::SignalRejected(SignalRejectedData { kind, phase })
    }

    /// Creates a PaymentCharged event.
    pub fn payment_charged(payment_id: PaymentId, status: ChargeStatus, amount: Money) -> Self {
        OrderSagaEvent::PaymentCharged(PaymentChargedData {
            payment_id,
            status,
            amount,
        })
    }

    /// Creates a ShippingAttemptStarted event.
    pub fn shipping_attempt_started(attempt: u32) -> Self {
        OrderSagaEvent::ShippingAttemptStarted(ShippingAttemptData { attempt })
    }

    /// Creates a ShippingAttemptFailed event.
    pub fn shipping_attempt_failed(attempt: u32, error: impl Into<String>) -> Self {
        OrderSagaEvent::ShippingAttemptFailed(ShippingAttemptFailedData {
            attempt,
            error: error.into(),
        })
    }

    /// Creates a CarrierDispatched event.
    pub fn carrier_dispatched(attempt: u32) -> Self {
        OrderSagaEvent::CarrierDispatched(ShippingAttemptData { attempt })
    }

    /// Creates a ShippingExhausted event.
    pub fn shipping_exhausted(attempts: u32) -> Self {
        OrderSagaEvent::ShippingExhausted(ShippingExhaustedData { attempts })
    }

    /// Creates a SagaCompleted event.
    pub fn saga_completed() -> Self {
        OrderSagaEvent::SagaCompleted(TimestampData { at: Utc::now() })
    }

    /// Creates a SagaCancelled event.
    pub fn saga_cancelled() -> Self {
        OrderSagaEvent::SagaCancelled(TimestampData { at: Utc::now() })
    }

    /// Creates a SagaFailed event.
    pub fn saga_failed(reason: impl Into<String>) -> Self {
        OrderSagaEvent::SagaFailed(SagaFailedData {
            reason: reason.into(),
            failed_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> OrderSagaEvent {
        OrderSagaEvent::saga_started(
            OrderId::new("O-1"),
            PaymentId::new("P-1"),
            CustomerId::new("cust-1"),
            "Ada",
            Money::from_dollars(100),
            Priority::Normal,
        )
    }

    #[test]
    fn event_types() {
        assert_eq!(started().event_type(), "SagaStarted");
        assert_eq!(
            OrderSagaEvent::phase_entered(OrderPhase::Receiving).event_type(),
            "PhaseEntered"
        );
        assert_eq!(
            OrderSagaEvent::order_received(vec![]).event_type(),
            "OrderReceived"
        );
        assert_eq!(OrderSagaEvent::OrderValidated.event_type(), "OrderValidated");
        assert_eq!(
            OrderSagaEvent::approval_granted().event_type(),
            "ApprovalGranted"
        );
        assert_eq!(
            OrderSagaEvent::approval_timed_out().event_type(),
            "ApprovalTimedOut"
        );
        assert_eq!(
            OrderSagaEvent::cancel_requested().event_type(),
            "CancelRequested"
        );
        assert_eq!(
            OrderSagaEvent::signal_rejected(SignalKind::Cancel, OrderPhase::Shipping).event_type(),
            "SignalRejected"
        );
        assert_eq!(
            OrderSagaEvent::shipping_exhausted(3).event_type(),
            "ShippingExhausted"
        );
        assert_eq!(OrderSagaEvent::saga_failed("boom").event_type(), "SagaFailed");
    }

    #[test]
    fn serialization_roundtrip() {
        let events = vec![
            started(),
            OrderSagaEvent::phase_entered(OrderPhase::Validating),
            OrderSagaEvent::order_received(vec![OrderItem::new("ABC", 1)]),
            OrderSagaEvent::OrderValidated,
            OrderSagaEvent::approval_granted(),
            OrderSagaEvent::address_updated(Address::new("456 New St", "Boston", "MA", "02101")),
            OrderSagaEvent::signal_rejected(SignalKind::Cancel, OrderPhase::ChargingPayment),
            OrderSagaEvent::payment_charged(
                PaymentId::new("P-1"),
                ChargeStatus::Charged,
                Money::from_dollars(100),
            ),
            OrderSagaEvent::shipping_attempt_started(1),
            OrderSagaEvent::shipping_attempt_failed(1, "carrier unavailable"),
            OrderSagaEvent::carrier_dispatched(2),
            OrderSagaEvent::shipping_exhausted(3),
            OrderSagaEvent::OrderShipped,
            OrderSagaEvent::saga_completed(),
            OrderSagaEvent::saga_cancelled(),
            OrderSagaEvent::saga_failed("approval timed out"),
        ];

        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let back: OrderSagaEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(event.event_type(), back.event_type());
        }
    }

    #[test]
    fn saga_started_carries_search_attributes() {
        let json = serde_json::to_string(&started()).unwrap();
        let back: OrderSagaEvent = serde_json::from_str(&json).unwrap();

        if let OrderSagaEvent::SagaStarted(data) = back {
            assert_eq!(data.order_id, OrderId::new("O-1"));
            assert_eq!(data.customer_id, CustomerId::new("cust-1"));
            assert_eq!(data.customer_name, "Ada");
            assert_eq!(data.order_total, Money::from_dollars(100));
            assert_eq!(data.priority, Priority::Normal);
        } else {
            panic!("expected SagaStarted event");
        }
    }
}
