//! Prometheus metrics for the price pusher.
//!
//! Covers:
//! - Push attempts, successes and failures per chain
//! - Batch sizes and per-feed staleness at push time
//! - On-chain and off-chain publish times per feed
//! - Price service connection and feed cache staleness
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

// ============================================================================
// Submission
// ============================================================================

/// Submission attempts (each resubmission counts).
pub static PUSH_ATTEMPTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pusher_push_attempts_total",
        "Total transaction submission attempts",
        &["chain"]
    )
    .unwrap()
});

/// Confirmed batches.
pub static PUSH_SUCCESS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pusher_push_success_total",
        "Total confirmed price update batches",
        &["chain"]
    )
    .unwrap()
});

/// Failures by kind (transient, permanent, exhausted).
pub static PUSH_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pusher_push_failures_total",
        "Total failed submissions by classification",
        &["chain", "kind"]
    )
    .unwrap()
});

/// Feeds per submitted batch.
pub static BATCH_SIZE: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "pusher_batch_size",
        "Number of feeds per submitted batch",
        &["chain"],
        vec![1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0]
    )
    .unwrap()
});

/// Age of the on-chain value when a push was started.
pub static STALENESS_AT_PUSH_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "pusher_staleness_at_push_seconds",
        "Age of the on-chain price when a push was started",
        &["chain", "feed"],
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 3600.0]
    )
    .unwrap()
});

/// Update decisions by outcome.
pub static DECISIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pusher_decisions_total",
        "Update decisions by outcome",
        &["chain", "outcome"]
    )
    .unwrap()
});

// ============================================================================
// Chain state
// ============================================================================

/// Last observed on-chain publish time.
pub static ON_CHAIN_PUBLISH_TIME: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "pusher_on_chain_publish_time",
        "Publish time of the latest observed on-chain price",
        &["chain", "feed"]
    )
    .unwrap()
});

/// Refresh failures where no read succeeded.
pub static CHAIN_UNREACHABLE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pusher_chain_unreachable_total",
        "Total refreshes where the chain could not be read",
        &["chain"]
    )
    .unwrap()
});

/// Payer balance in the chain's native unit.
pub static WALLET_BALANCE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "pusher_wallet_balance",
        "Payer wallet balance in native units",
        &["chain"]
    )
    .unwrap()
});

// ============================================================================
// Off-chain source
// ============================================================================

/// Latest cached off-chain publish time.
pub static OFF_CHAIN_PUBLISH_TIME: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "pusher_off_chain_publish_time",
        "Publish time of the latest off-chain price",
        &["feed"]
    )
    .unwrap()
});

/// Price updates dropped by the ingestor.
pub static FEED_UPDATES_REJECTED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pusher_feed_updates_rejected_total",
        "Price updates dropped before reaching the cache",
        &["reason"]
    )
    .unwrap()
});

/// 1 while the subscription is silent beyond its grace period.
pub static FEED_CACHE_STALE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "pusher_feed_cache_stale",
        "Off-chain feed cache stale flag (1=stale)"
    )
    .unwrap()
});

/// Price service connection state (1 = connected).
pub static PRICE_SERVICE_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "pusher_price_service_connected",
        "Price service WebSocket connection state (1=connected)"
    )
    .unwrap()
});

/// Price service reconnections.
pub static PRICE_SERVICE_RECONNECTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "pusher_price_service_reconnects_total",
        "Total price service reconnection attempts",
        &["reason"]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn push_attempt(chain: &str) {
        PUSH_ATTEMPTS_TOTAL.with_label_values(&[chain]).inc();
    }

    pub fn push_success(chain: &str) {
        PUSH_SUCCESS_TOTAL.with_label_values(&[chain]).inc();
    }

    /// `kind` is "transient", "permanent" or "exhausted".
    pub fn push_failure(chain: &str, kind: &str) {
        PUSH_FAILURES_TOTAL.with_label_values(&[chain, kind]).inc();
    }

    pub fn batch_size(chain: &str, size: usize) {
        BATCH_SIZE.with_label_values(&[chain]).observe(size as f64);
    }

    pub fn staleness_at_push(chain: &str, feed: &str, age_secs: i64) {
        STALENESS_AT_PUSH_SECONDS
            .with_label_values(&[chain, feed])
            .observe(age_secs.max(0) as f64);
    }

    pub fn decision(chain: &str, outcome: &str) {
        DECISIONS_TOTAL.with_label_values(&[chain, outcome]).inc();
    }

    pub fn on_chain_publish_time(chain: &str, feed: &str, publish_time: i64) {
        ON_CHAIN_PUBLISH_TIME
            .with_label_values(&[chain, feed])
            .set(publish_time as f64);
    }

    pub fn chain_unreachable(chain: &str) {
        CHAIN_UNREACHABLE_TOTAL.with_label_values(&[chain]).inc();
    }

    pub fn wallet_balance(chain: &str, balance: f64) {
        WALLET_BALANCE.with_label_values(&[chain]).set(balance);
    }

    pub fn off_chain_publish_time(feed: &str, publish_time: i64) {
        OFF_CHAIN_PUBLISH_TIME
            .with_label_values(&[feed])
            .set(publish_time as f64);
    }

    pub fn feed_update_rejected(reason: &str) {
        FEED_UPDATES_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn feed_cache_stale(stale: bool) {
        FEED_CACHE_STALE.set(if stale { 1.0 } else { 0.0 });
    }

    pub fn price_service_connected(connected: bool) {
        PRICE_SERVICE_CONNECTED.set(if connected { 1.0 } else { 0.0 });
    }

    pub fn price_service_reconnect(reason: &str) {
        PRICE_SERVICE_RECONNECTS_TOTAL
            .with_label_values(&[reason])
            .inc();
    }

    /// Render every registered metric in the text exposition format.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_counters() {
        let before = PUSH_ATTEMPTS_TOTAL.with_label_values(&["unit-a"]).get();
        Metrics::push_attempt("unit-a");
        Metrics::push_attempt("unit-a");
        assert_eq!(
            PUSH_ATTEMPTS_TOTAL.with_label_values(&["unit-a"]).get(),
            before + 2.0
        );

        Metrics::push_failure("unit-a", "permanent");
        assert!(
            PUSH_FAILURES_TOTAL
                .with_label_values(&["unit-a", "permanent"])
                .get()
                >= 1.0
        );
    }

    #[test]
    fn test_stale_gauge() {
        Metrics::feed_cache_stale(true);
        assert_eq!(FEED_CACHE_STALE.get(), 1.0);
        Metrics::feed_cache_stale(false);
        assert_eq!(FEED_CACHE_STALE.get(), 0.0);
    }

    #[test]
    fn test_gather_text_contains_registered_metric() {
        Metrics::batch_size("unit-b", 3);
        let text = Metrics::gather_text().unwrap();
        assert!(text.contains("pusher_batch_size"));
    }
}
