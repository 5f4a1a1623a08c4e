//! Retry, backoff and fee escalation policy for one chain.

use crate::error::{ExecutorError, ExecutorResult};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Doubling stops here; the delay is capped long before this matters.
const MAX_BACKOFF_EXPONENT: u32 = 20;

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_status_poll_interval_ms() -> u64 {
    1_000
}

fn default_fee_bump_multiplier() -> Decimal {
    Decimal::new(11, 1)
}

fn default_fee_bump_cap() -> Decimal {
    Decimal::new(5, 0)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any single retry delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// How often a pending transaction's status is polled.
    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,
    /// Per-attempt fee multiplier growth.
    #[serde(default = "default_fee_bump_multiplier")]
    pub fee_bump_multiplier: Decimal,
    /// Fee multiplier ceiling.
    #[serde(default = "default_fee_bump_cap")]
    pub fee_bump_cap: Decimal,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            status_poll_interval_ms: default_status_poll_interval_ms(),
            fee_bump_multiplier: default_fee_bump_multiplier(),
            fee_bump_cap: default_fee_bump_cap(),
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> ExecutorResult<()> {
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ExecutorError::InvalidConfig(format!(
                "backoff base {}ms exceeds cap {}ms",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if self.status_poll_interval_ms == 0 {
            return Err(ExecutorError::InvalidConfig(
                "status_poll_interval_ms must be > 0".to_string(),
            ));
        }
        if self.fee_bump_multiplier < Decimal::ONE || self.fee_bump_cap < Decimal::ONE {
            return Err(ExecutorError::InvalidConfig(
                "fee bump multiplier and cap must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Delay after zero-based attempt `attempt` failed: `base * 2^attempt`, capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(MAX_BACKOFF_EXPONENT);
        let delay_ms = self
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// `min(fee_bump_multiplier^attempt, fee_bump_cap)`.
    pub fn fee_multiplier(&self, attempt: u32) -> Decimal {
        let mut multiplier = Decimal::ONE;
        for _ in 0..attempt {
            match multiplier.checked_mul(self.fee_bump_multiplier) {
                Some(next) if next < self.fee_bump_cap => multiplier = next,
                _ => return self.fee_bump_cap,
            }
        }
        multiplier.min(self.fee_bump_cap)
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }
}
