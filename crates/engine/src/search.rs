//! Filterable start attributes for running and finished sagas.
//!
//! Attributes are published once at start and never change, so the
//! index is a plain map queried with predicate filters.

use std::collections::HashMap;
use std::sync::RwLock;

use common::{CustomerId, Money, OrderId, Priority};
use serde::Serialize;

/// Attributes published when a saga starts.
#[derive(Debug, Clone, Serialize)]
pub struct SearchAttributes {
    pub customer_id: CustomerId,
    pub customer_name: String,
    pub order_total: Money,
    pub priority: Priority,
}

/// One row returned by a query.
#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub customer_name: String,
    pub order_total: Money,
    pub priority: Priority,
}

/// Predicate filter over published attributes. Unset fields match
/// everything.
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub customer_id: Option<CustomerId>,
    pub customer_name: Option<String>,
    pub priority: Option<Priority>,
    pub min_total: Option<Money>,
    pub max_total: Option<Money>,
    pub limit: Option<usize>,
}

impl OrderFilter {
    fn matches(&self, attrs: &SearchAttributes) -> bool {
        if let Some(customer_id) = &self.customer_id
            && &attrs.customer_id != customer_id
        {
            return false;
        }
        if let Some(name) = &self.customer_name
            && &attrs.customer_name != name
        {
            return false;
        }
        if let Some(priority) = self.priority
            && attrs.priority != priority
        {
            return false;
        }
        if let Some(min) = self.min_total
            && attrs.order_total < min
        {
            return false;
        }
        if let Some(max) = self.max_total
            && attrs.order_total > max
        {
            return false;
        }
        true
    }
}

/// In-process index of start attributes, keyed by order id.
#[derive(Default)]
pub struct SearchIndex {
    entries: RwLock<HashMap<OrderId, SearchAttributes>>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes the attributes for an order. Re-publishing (on resume)
    /// overwrites with identical data.
    pub fn publish(&self, order_id: OrderId, attrs: SearchAttributes) {
        self.entries
            .write()
            .expect("search index lock poisoned")
            .insert(order_id, attrs);
    }

    /// Returns the attributes for one order.
    pub fn get(&self, order_id: &OrderId) -> Option<SearchAttributes> {
        self.entries
            .read()
            .expect("search index lock poisoned")
            .get(order_id)
            .cloned()
    }

    /// Returns orders matching the filter, sorted by order id.
    pub fn query(&self, filter: &OrderFilter) -> Vec<OrderSummary> {
        let entries = self.entries.read().expect("search index lock poisoned");
        let mut rows: Vec<OrderSummary> = entries
            .iter()
            .filter(|(_, attrs)| filter.matches(attrs))
            .map(|(order_id, attrs)| OrderSummary {
                order_id: order_id.clone(),
                customer_id: attrs.customer_id.clone(),
                customer_name: attrs.customer_name.clone(),
                order_total: attrs.order_total,
                priority: attrs.priority,
            })
            .collect();
        rows.sort_by(|a, b| a.order_id.as_str().cmp(b.order_id.as_str()));
        if let Some(limit) = filter.limit {
            rows.truncate(limit);
        }
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> SearchIndex {
        let index = SearchIndex::new();
        index.publish(
            OrderId::new("O-1"),
            SearchAttributes {
                customer_id: CustomerId::new("cust-1"),
                customer_name: "Ada".to_string(),
                order_total: Money::from_dollars(100),
                priority: Priority::Normal,
            },
        );
        index.publish(
            OrderId::new("O-2"),
            SearchAttributes {
                customer_id: CustomerId::new("cust-2"),
                customer_name: "Grace".to_string(),
                order_total: Money::from_dollars(750),
                priority: Priority::Urgent,
            },
        );
        index.publish(
            OrderId::new("O-3"),
            SearchAttributes {
                customer_id: CustomerId::new("cust-1"),
                customer_name: "Ada".to_string(),
                order_total: Money::from_dollars(20),
                priority: Priority::High,
            },
        );
        index
    }

    #[test]
    fn empty_filter_matches_everything() {
        let rows = index().query(&OrderFilter::default());
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].order_id, OrderId::new("O-1"));
    }

    #[test]
    fn filter_by_customer() {
        let rows = index().query(&OrderFilter {
            customer_id: Some(CustomerId::new("cust-1")),
            ..Default::default()
        });
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn filter_by_priority_and_total_range() {
        let rows = index().query(&OrderFilter {
            priority: Some(Priority::Urgent),
            ..Default::default()
        });
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].customer_name, "Grace");

        let rows = index().query(&OrderFilter {
            min_total: Some(Money::from_dollars(50)),
            max_total: Some(Money::from_dollars(200)),
            ..Default::default()
        });
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].order_id, OrderId::new("O-1"));
    }

    #[test]
    fn limit_truncates() {
        let rows = index().query(&OrderFilter {
            limit: Some(2),
            ..Default::default()
        });
        assert_eq!(rows.len(), 2);
    }
}
