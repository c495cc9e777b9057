//! Order payload carried through the saga.

use serde::{Deserialize, Serialize};

use crate::types::OrderId;

/// A shipping address, as supplied by an address-update signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub zip_code: String,
    pub country: String,
}

impl Address {
    /// Creates a US address.
    pub fn new(
        street: impl Into<String>,
        city: impl Into<String>,
        state: impl Into<String>,
        zip_code: impl Into<String>,
    ) -> Self {
        Self {
            street: street.into(),
            city: city.into(),
            state: state.into(),
            zip_code: zip_code.into(),
            country: "USA".to_string(),
        }
    }
}

/// A line item in an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Stock keeping unit.
    pub sku: String,
    /// Quantity ordered.
    pub qty: u32,
}

impl OrderItem {
    /// Creates a new order item.
    pub fn new(sku: impl Into<String>, qty: u32) -> Self {
        Self {
            sku: sku.into(),
            qty,
        }
    }
}

/// The in-memory order representation the saga carries between steps.
///
/// Populated by the receive step and enriched with the address override
/// (if one was accepted) before payment and shipping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPayload {
    pub order_id: OrderId,
    pub items: Vec<OrderItem>,
    pub shipping_address: Option<Address>,
}

impl OrderPayload {
    /// Creates a payload with no address override.
    pub fn new(order_id: OrderId, items: Vec<OrderItem>) -> Self {
        Self {
            order_id,
            items,
            shipping_address: None,
        }
    }

    /// Returns true if the order has at least one item.
    pub fn has_items(&self) -> bool {
        !self.items.is_empty()
    }
}
