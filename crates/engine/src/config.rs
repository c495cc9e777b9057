//! Engine timing and retry configuration.

use std::time::Duration;

/// Timeouts and retry budgets for the saga engine.
///
/// Defaults mirror production behavior; `from_env` lets deployments
/// override individual knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-attempt timeout for each fulfillment step.
    pub step_timeout: Duration,
    /// Attempt budget per fulfillment step.
    pub step_attempts: u32,
    /// Fixed backoff between step attempts.
    pub step_backoff: Duration,
    /// How long an order waits in the approval phase before failing.
    pub approval_timeout: Duration,
    /// Shipping sub-saga attempt budget.
    pub shipping_attempts: u32,
    /// Fixed backoff between shipping attempts.
    pub shipping_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(4),
            step_attempts: 3,
            step_backoff: Duration::from_millis(100),
            approval_timeout: Duration::from_secs(30),
            shipping_attempts: 3,
            shipping_backoff: Duration::from_secs(1),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            step_timeout: env_secs("ENGINE_STEP_TIMEOUT_SECS", defaults.step_timeout),
            step_attempts: env_u32("ENGINE_STEP_ATTEMPTS", defaults.step_attempts),
            step_backoff: env_millis("ENGINE_STEP_BACKOFF_MS", defaults.step_backoff),
            approval_timeout: env_secs("ENGINE_APPROVAL_TIMEOUT_SECS", defaults.approval_timeout),
            shipping_attempts: env_u32("ENGINE_SHIPPING_ATTEMPTS", defaults.shipping_attempts),
            shipping_backoff: env_millis("ENGINE_SHIPPING_BACKOFF_MS", defaults.shipping_backoff),
        }
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_millis(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
