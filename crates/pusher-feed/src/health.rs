//! Off-chain subscription health.
//!
//! If no price update arrives for longer than the grace period the feed cache
//! is flagged stale. Chains keep pushing the last cached values; the flag only
//! makes the condition visible in logs and metrics.

use crate::error::{FeedError, FeedResult};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info};

/// Result of a health evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    Unchanged,
    BecameStale { silent_for: Duration },
    Recovered,
}

pub struct FeedHealthMonitor {
    grace_period: Duration,
    /// Time of the last update, or of construction if none arrived yet.
    last_update: Mutex<Instant>,
    stale: AtomicBool,
}

impl FeedHealthMonitor {
    pub fn new(grace_period: Duration) -> Self {
        Self {
            grace_period,
            last_update: Mutex::new(Instant::now()),
            stale: AtomicBool::new(false),
        }
    }

    /// Record that the subscription delivered an update.
    pub fn record_update(&self) {
        *self.last_update.lock() = Instant::now();
    }

    pub fn silent_for(&self) -> Duration {
        self.last_update.lock().elapsed()
    }

    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    /// Re-evaluate staleness, logging once per transition.
    pub fn evaluate(&self) -> HealthTransition {
        let silent_for = self.silent_for();
        let now_stale = silent_for > self.grace_period;
        let was_stale = self.stale.swap(now_stale, Ordering::AcqRel);

        match (was_stale, now_stale) {
            (false, true) => {
                error!(
                    silent_for_secs = silent_for.as_secs(),
                    grace_secs = self.grace_period.as_secs(),
                    "Price service silent beyond grace period; pushing last cached values"
                );
                HealthTransition::BecameStale { silent_for }
            }
            (true, false) => {
                info!("Price service updates resumed");
                HealthTransition::Recovered
            }
            _ => HealthTransition::Unchanged,
        }
    }

    /// `Err(FeedCacheStale)` while the stale flag is set.
    pub fn ensure_fresh(&self) -> FeedResult<()> {
        if self.is_stale() {
            return Err(FeedError::FeedCacheStale {
                silent_for_secs: self.silent_for().as_secs(),
            });
        }
        Ok(())
    }
}
