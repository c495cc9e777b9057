//! Operator signals and the per-instance mailbox.
//!
//! Signals are posted by callers at any time but only take effect when
//! the driver drains the mailbox at a phase checkpoint. Between
//! checkpoints a signal sits in the queue; draining preserves arrival
//! order.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use common::{Address, OrderId};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

/// The kinds of operator signal an order saga accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalKind {
    /// Cancel the order. Honored only before payment is charged.
    Cancel,
    /// Replace the shipping address. Honored only before payment.
    UpdateAddress { address: Address },
    /// Approve the order, releasing it from the approval wait.
    Approve,
}

impl SignalKind {
    /// Returns the signal name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::Cancel => "cancel",
            SignalKind::UpdateAddress { .. } => "update_address",
            SignalKind::Approve => "approve",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A signal queued for a saga instance.
#[derive(Debug, Clone)]
pub struct Signal {
    pub order_id: OrderId,
    pub kind: SignalKind,
    pub enqueued_at: DateTime<Utc>,
}

/// Mailbox holding signals posted to one saga instance.
///
/// `post` never blocks. The driver calls `drain` at checkpoints and
/// `wait_until` while suspended for approval; a permit stored by
/// `notify_one` makes a post that lands between a drain and the
/// following wait visible to that wait.
#[derive(Default)]
pub struct SignalMailbox {
    queue: Mutex<VecDeque<Signal>>,
    notify: Notify,
}

impl SignalMailbox {
    /// Creates an empty mailbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a signal and wakes a suspended driver, if any.
    pub fn post(&self, order_id: OrderId, kind: SignalKind) {
        let signal = Signal {
            order_id,
            kind,
            enqueued_at: Utc::now(),
        };
        self.queue
            .lock()
            .expect("signal mailbox lock poisoned")
            .push_back(signal);
        self.notify.notify_one();
    }

    /// Removes and returns all queued signals in arrival order.
    pub fn drain(&self) -> Vec<Signal> {
        self.queue
            .lock()
            .expect("signal mailbox lock poisoned")
            .drain(..)
            .collect()
    }

    /// Returns the number of queued signals.
    pub fn len(&self) -> usize {
        self.queue
            .lock()
            .expect("signal mailbox lock poisoned")
            .len()
    }

    /// Returns true if no signals are queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Waits until a signal is posted or the deadline passes.
    ///
    /// Returns true if woken by a post, false on deadline.
    pub async fn wait_until(&self, deadline: Instant) -> bool {
        tokio::select! {
            _ = self.notify.notified() => true,
            _ = tokio::time::sleep_until(deadline) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn order() -> OrderId {
        OrderId::new("order-1")
    }

    #[test]
    fn drain_preserves_arrival_order() {
        let mailbox = SignalMailbox::new();
        mailbox.post(
            order(),
            SignalKind::UpdateAddress {
                address: Address::new("456 New St", "Boston", "MA", "02101"),
            },
        );
        mailbox.post(order(), SignalKind::Approve);
        mailbox.post(order(), SignalKind::Cancel);

        let drained = mailbox.drain();
        assert_eq!(drained.len(), 3);
        assert_eq!(drained[0].kind.as_str(), "update_address");
        assert_eq!(drained[1].kind, SignalKind::Approve);
        assert_eq!(drained[2].kind, SignalKind::Cancel);
        assert!(mailbox.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_false_on_deadline() {
        let mailbox = SignalMailbox::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        assert!(!mailbox.wait_until(deadline).await);
    }

    #[tokio::test(start_paused = true)]
    async fn post_before_wait_is_not_lost() {
        let mailbox = SignalMailbox::new();
        mailbox.post(order(), SignalKind::Approve);

        let deadline = Instant::now() + Duration::from_secs(30);
        assert!(mailbox.wait_until(deadline).await);
        assert_eq!(mailbox.drain().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn post_wakes_a_suspended_waiter() {
        use std::sync::Arc;

        let mailbox = Arc::new(SignalMailbox::new());
        let waiter = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move {
                let deadline = Instant::now() + Duration::from_secs(30);
                mailbox.wait_until(deadline).await
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        mailbox.post(order(), SignalKind::Cancel);

        assert!(waiter.await.unwrap());
    }

    #[test]
    fn signal_kind_serialization() {
        let json = serde_json::to_string(&SignalKind::Cancel).unwrap();
        assert_eq!(json, r#"{"kind":"cancel"}"#);

        let update = SignalKind::UpdateAddress {
            address: Address::new("456 New St", "Boston", "MA", "02101"),
        };
        let json = serde_json::to_string(&update).unwrap();
        let back: SignalKind = serde_json::from_str(&json).unwrap();
        assert_eq!(back, update);
    }
}
