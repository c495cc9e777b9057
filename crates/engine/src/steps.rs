//! Fulfillment steps and the retrying step executor.
//!
//! Each saga phase maps to one operation on [`FulfillmentOps`]. The
//! executor wraps every attempt in a timeout and retries transient
//! failures up to a budget; business rejections surface immediately.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Money, OrderId, OrderItem, OrderPayload, PaymentId};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

/// A failure from a single step attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StepError {
    /// Infrastructure hiccup; the attempt may be retried.
    #[error("transient failure: {0}")]
    Transient(String),

    /// The attempt exceeded its per-attempt timeout.
    #[error("step timed out")]
    Timeout,

    /// The business said no. Never retried.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl StepError {
    /// Returns true if another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, StepError::Rejected(_))
    }
}

/// External side effects the saga drives.
#[async_trait]
pub trait FulfillmentOps: Send + Sync {
    /// Fetches the order contents from the upstream system.
    async fn receive_order(&self, order_id: &OrderId) -> Result<Vec<OrderItem>, StepError>;

    /// Checks the order against business rules.
    async fn validate_order(&self, payload: &OrderPayload) -> Result<(), StepError>;

    /// Moves money. Callers must route this through the idempotency
    /// ledger so it runs at most once per payment token.
    async fn charge_payment(
        &self,
        payload: &OrderPayload,
        payment_id: &PaymentId,
        amount: Money,
    ) -> Result<(), StepError>;

    /// Packages the order for dispatch.
    async fn prepare_package(&self, payload: &OrderPayload) -> Result<(), StepError>;

    /// Hands the package to the carrier.
    async fn dispatch_carrier(&self, payload: &OrderPayload) -> Result<(), StepError>;

    /// Records the order as shipped upstream.
    async fn mark_shipped(&self, order_id: &OrderId) -> Result<(), StepError>;
}

/// Runs step attempts under a per-attempt timeout and a retry budget.
#[derive(Debug, Clone)]
pub struct StepExecutor {
    timeout: Duration,
    attempts: u32,
    backoff: Duration,
}

impl StepExecutor {
    /// Creates an executor with the given per-attempt timeout, total
    /// attempt budget (at least 1) and fixed backoff between attempts.
    pub fn new(timeout: Duration, attempts: u32, backoff: Duration) -> Self {
        Self {
            timeout,
            attempts: attempts.max(1),
            backoff,
        }
    }

    /// Runs `f` until it succeeds, rejects, or the budget is exhausted.
    ///
    /// Timeouts count as attempts. Returns the last error when every
    /// attempt failed.
    pub async fn run<T, F, Fut>(&self, step: &str, mut f: F) -> Result<T, StepError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StepError>>,
    {
        let mut last_error = StepError::Transient("no attempts made".to_string());

        for attempt in 1..=self.attempts {
            metrics::counter!("step_attempts_total", "step" => step.to_string()).increment(1);
            match tokio::time::timeout(self.timeout, f()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(error)) if !error.is_retryable() => {
                    warn!(step, attempt, %error, "step rejected");
                    return Err(error);
                }
                Ok(Err(error)) => {
                    warn!(step, attempt, %error, "step attempt failed");
                    last_error = error;
                }
                Err(_) => {
                    warn!(step, attempt, "step attempt timed out");
                    last_error = StepError::Timeout;
                }
            }

            if attempt < self.attempts {
                metrics::counter!("step_retries_total", "step" => step.to_string()).increment(1);
                tokio::time::sleep(self.backoff).await;
            }
        }

        Err(last_error)
    }
}

#[derive(Default)]
struct OpsState {
    /// Remaining scripted transient failures per step.
    fail_times: HashMap<String, u32>,
    /// Steps whose attempts never complete.
    hang: HashMap<String, bool>,
    /// Completed call count per step (hung attempts still count).
    calls: HashMap<String, u32>,
    reject_validation: Option<String>,
    receive_items: Vec<OrderItem>,
}

/// In-memory fulfillment operations with scriptable failures.
///
/// Defaults to succeeding every step and returning a single line item
/// from the receive step.
#[derive(Clone)]
pub struct InMemoryFulfillmentOps {
    state: Arc<RwLock<OpsState>>,
}

impl Default for InMemoryFulfillmentOps {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFulfillmentOps {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(OpsState {
                receive_items: vec![OrderItem::new("ABC", 1)],
                ..Default::default()
            })),
        }
    }

    /// Scripts the next `times` attempts of `step` to fail transiently.
    pub async fn set_fail_times(&self, step: &str, times: u32) {
        self.state
            .write()
            .await
            .fail_times
            .insert(step.to_string(), times);
    }

    /// Makes every attempt of `step` hang until its timeout.
    pub async fn set_hang(&self, step: &str, hang: bool) {
        self.state.write().await.hang.insert(step.to_string(), hang);
    }

    /// Makes validation reject the order with the given reason.
    pub async fn set_reject_validation(&self, reason: &str) {
        self.state.write().await.reject_validation = Some(reason.to_string());
    }

    /// Sets the items the receive step returns.
    pub async fn set_receive_items(&self, items: Vec<OrderItem>) {
        self.state.write().await.receive_items = items;
    }

    /// Returns how many times `step` has been attempted.
    pub async fn call_count(&self, step: &str) -> u32 {
        self.state
            .read()
            .await
            .calls
            .get(step)
            .copied()
            .unwrap_or(0)
    }

    async fn attempt(&self, step: &str) -> Result<(), StepError> {
        let should_hang;
        {
            let mut state = self.state.write().await;
            *state.calls.entry(step.to_string()).or_insert(0) += 1;
            should_hang = state.hang.get(step).copied().unwrap_or(false);

            if !should_hang
                && let Some(remaining) = state.fail_times.get_mut(step)
                && *remaining > 0
            {
                *remaining -= 1;
                return Err(StepError::Transient(format!("{step} unavailable")));
            }
        }

        if should_hang {
            futures_util::future::pending::<()>().await;
        }
        Ok(())
    }
}

#[async_trait]
impl FulfillmentOps for InMemoryFulfillmentOps {
    async fn receive_order(&self, _order_id: &OrderId) -> Result<Vec<OrderItem>, StepError> {
        self.attempt(crate::fulfillment::STEP_RECEIVE).await?;
        Ok(self.state.read().await.receive_items.clone())
    }

    async fn validate_order(&self, payload: &OrderPayload) -> Result<(), StepError> {
        self.attempt(crate::fulfillment::STEP_VALIDATE).await?;
        if let Some(reason) = self.state.read().await.reject_validation.clone() {
            return Err(StepError::Rejected(reason));
        }
        if !payload.has_items() {
            return Err(StepError::Rejected("order has no items".to_string()));
        }
        Ok(())
    }

    async fn charge_payment(
        &self,
        _payload: &OrderPayload,
        _payment_id: &PaymentId,
        _amount: Money,
    ) -> Result<(), StepError> {
        self.attempt(crate::fulfillment::STEP_CHARGE).await
    }

    async fn prepare_package(&self, _payload: &OrderPayload) -> Result<(), StepError> {
        self.attempt(crate::fulfillment::STEP_PREPARE).await
    }

    async fn dispatch_carrier(&self, _payload: &OrderPayload) -> Result<(), StepError> {
        self.attempt(crate::fulfillment::STEP_DISPATCH).await
    }

    async fn mark_shipped(&self, _order_id: &OrderId) -> Result<(), StepError> {
        self.attempt(crate::fulfillment::STEP_MARK_SHIPPED).await
    }
}
