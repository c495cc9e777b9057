//! Idempotency ledger for payment charges.
//!
//! The ledger guarantees at most one successful money movement per
//! payment token. A charge first consults the ledger; an existing
//! record short-circuits the external call and is returned as-is.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{Money, PaymentId};
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::steps::StepError;

/// Outcome recorded for a payment token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChargeStatus {
    Charged,
}

impl ChargeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChargeStatus::Charged => "CHARGED",
        }
    }
}

impl std::fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Durable record of a completed charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRecord {
    pub payment_id: PaymentId,
    pub status: ChargeStatus,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

/// Exactly-once gate in front of the external payment call.
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Looks up the record for a payment token.
    async fn find(&self, payment_id: &PaymentId) -> Option<ChargeRecord>;

    /// Charges a payment token at most once.
    ///
    /// If a record already exists it is returned and `effect` is never
    /// run. Otherwise `effect` performs the external call; only on
    /// success is a record written. A failed effect leaves no record,
    /// so a later retry may charge.
    async fn charge(
        &self,
        payment_id: &PaymentId,
        amount: Money,
        effect: BoxFuture<'_, Result<(), StepError>>,
    ) -> Result<ChargeRecord, StepError>;
}

/// In-memory ledger keyed by payment token.
#[derive(Default)]
pub struct InMemoryLedger {
    // The lock is held across the external effect so two concurrent
    // charges for the same token cannot both run it.
    records: Mutex<HashMap<PaymentId, ChargeRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of recorded charges.
    pub async fn record_count(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl IdempotencyLedger for InMemoryLedger {
    async fn find(&self, payment_id: &PaymentId) -> Option<ChargeRecord> {
        self.records.lock().await.get(payment_id).cloned()
    }

    async fn charge(
        &self,
        payment_id: &PaymentId,
        amount: Money,
        effect: BoxFuture<'_, Result<(), StepError>>,
    ) -> Result<ChargeRecord, StepError> {
        let mut records = self.records.lock().await;

        if let Some(existing) = records.get(payment_id) {
            return Ok(existing.clone());
        }

        effect.await?;

        let record = ChargeRecord {
            payment_id: payment_id.clone(),
            status: ChargeStatus::Charged,
            amount,
            created_at: Utc::now(),
        };
        records.insert(payment_id.clone(), record.clone());
        Ok(record)
    }
}
