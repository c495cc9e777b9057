//! Names and identifiers shared across the order saga.

use common::{OrderId, PaymentId};
use uuid::Uuid;

/// Stream type under which order sagas are journaled.
pub const STREAM_TYPE: &str = "OrderSaga";

pub const STEP_RECEIVE: &str = "receive_order";
pub const STEP_VALIDATE: &str = "validate_order";
pub const STEP_CHARGE: &str = "charge_payment";
pub const STEP_PREPARE: &str = "prepare_package";
pub const STEP_DISPATCH: &str = "dispatch_carrier";
pub const STEP_MARK_SHIPPED: &str = "mark_shipped";

/// Generates a fresh payment token, e.g. `payment-3f2a9c1b`.
pub fn generate_payment_id() -> PaymentId {
    let uuid = Uuid::new_v4().simple().to_string();
    PaymentId::new(format!("payment-{}", &uuid[..8]))
}

/// Identifier for one shipping sub-saga attempt.
pub fn shipping_attempt_id(order_id: &OrderId, attempt: u32) -> String {
    format!("{}-shipping-{}", order_id, attempt)
}
