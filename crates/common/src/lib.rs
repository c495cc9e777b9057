//! Shared value types used across the order fulfillment workspace.

pub mod money;
pub mod order;
pub mod types;

pub use money::Money;
pub use order::{Address, OrderItem, OrderPayload};
pub use types::{CustomerId, OrderId, PaymentId, Priority};
