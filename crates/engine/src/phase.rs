//! Saga phase state machines.

use serde::{Deserialize, Serialize};

/// The phase of an order saga in its lifecycle.
///
/// Phase transitions:
/// ```text
/// Init ──► Receiving ──► Validating ──► AwaitingApproval ──► ChargingPayment
///                                                                  │
///            Cancelled ◄── (any phase up to AwaitingApproval)      ▼
///                                                              Shipping ──► MarkingShipped ──► Completed
///                                                                  │
///                                                                  └──► ShippingFailed
/// ```
/// `Failed` is reachable from any step that exhausts its retry budget,
/// hits a business rejection, or times out waiting for approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderPhase {
    #[default]
    Init,
    Receiving,
    Validating,
    AwaitingApproval,
    ChargingPayment,
    Shipping,
    MarkingShipped,
    /// All steps completed successfully (terminal).
    Completed,
    /// Cancelled by an operator before payment (terminal).
    Cancelled,
    /// All shipping attempts exhausted (terminal).
    ShippingFailed,
    /// Step failure, business rejection, or approval timeout (terminal).
    Failed,
}

impl OrderPhase {
    /// Returns true if this is a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderPhase::Completed
                | OrderPhase::Cancelled
                | OrderPhase::ShippingFailed
                | OrderPhase::Failed
        )
    }

    /// Returns true if a cancel signal can still be honored.
    ///
    /// Once payment has been charged the order is non-cancellable.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            OrderPhase::Init
                | OrderPhase::Receiving
                | OrderPhase::Validating
                | OrderPhase::AwaitingApproval
        )
    }

    /// Returns true if an address-update signal is accepted in this phase.
    ///
    /// A signal drained before the receive step runs counts as arriving
    /// during it, so `Init` accepts updates too.
    pub fn accepts_address_update(&self) -> bool {
        matches!(
            self,
            OrderPhase::Init
                | OrderPhase::Receiving
                | OrderPhase::Validating
                | OrderPhase::AwaitingApproval
        )
    }

    /// Returns the phase name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderPhase::Init => "INIT",
            OrderPhase::Receiving => "RECEIVING",
            OrderPhase::Validating => "VALIDATING",
            OrderPhase::AwaitingApproval => "AWAITING_APPROVAL",
            OrderPhase::ChargingPayment => "CHARGING_PAYMENT",
            OrderPhase::Shipping => "SHIPPING",
            OrderPhase::MarkingShipped => "MARKING_SHIPPED",
            OrderPhase::Completed => "COMPLETED",
            OrderPhase::Cancelled => "CANCELLED",
            OrderPhase::ShippingFailed => "SHIPPING_FAILED",
            OrderPhase::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for OrderPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The phase of a shipping sub-saga attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShippingPhase {
    #[default]
    Preparing,
    Dispatching,
    Done,
}

impl ShippingPhase {
    /// Returns the phase name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShippingPhase::Preparing => "PREPARING",
            ShippingPhase::Dispatching => "DISPATCHING",
            ShippingPhase::Done => "DONE",
        }
    }
}

impl std::fmt::Display for ShippingPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_phase_is_init() {
        assert_eq!(OrderPhase::default(), OrderPhase::Init);
    }

    #[test]
    fn terminal_phases() {
        assert!(OrderPhase::Completed.is_terminal());
        assert!(OrderPhase::Cancelled.is_terminal());
        assert!(OrderPhase::ShippingFailed.is_terminal());
        assert!(OrderPhase::Failed.is_terminal());

        assert!(!OrderPhase::Init.is_terminal());
        assert!(!OrderPhase::AwaitingApproval.is_terminal());
        assert!(!OrderPhase::Shipping.is_terminal());
    }

    #[test]
    fn cancellable_up_to_and_including_awaiting_approval() {
        assert!(OrderPhase::Init.is_cancellable());
        assert!(OrderPhase::Receiving.is_cancellable());
        assert!(OrderPhase::Validating.is_cancellable());
        assert!(OrderPhase::AwaitingApproval.is_cancellable());

        assert!(!OrderPhase::ChargingPayment.is_cancellable());
        assert!(!OrderPhase::Shipping.is_cancellable());
        assert!(!OrderPhase::MarkingShipped.is_cancellable());
        assert!(!OrderPhase::Completed.is_cancellable());
    }

    #[test]
    fn address_updates_accepted_before_payment() {
        assert!(OrderPhase::Init.accepts_address_update());
        assert!(OrderPhase::Receiving.accepts_address_update());
        assert!(OrderPhase::Validating.accepts_address_update());
        assert!(OrderPhase::AwaitingApproval.accepts_address_update());

        assert!(!OrderPhase::ChargingPayment.accepts_address_update());
        assert!(!OrderPhase::Shipping.accepts_address_update());
    }

    #[test]
    fn display_matches_wire_names() {
        assert_eq!(
            OrderPhase::AwaitingApproval.to_string(),
            "AWAITING_APPROVAL"
        );
        assert_eq!(OrderPhase::ShippingFailed.to_string(), "SHIPPING_FAILED");
        assert_eq!(ShippingPhase::Preparing.to_string(), "PREPARING");
    }

    #[test]
    fn serialization_uses_screaming_snake_case() {
        let json = serde_json::to_string(&OrderPhase::ChargingPayment).unwrap();
        assert_eq!(json, "\"CHARGING_PAYMENT\"");

        let back: OrderPhase = serde_json::from_str(&json).unwrap();
        assert_eq!(back, OrderPhase::ChargingPayment);
    }
}
