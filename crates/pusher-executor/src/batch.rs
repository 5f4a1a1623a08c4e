//! Batch planning and the per-chain submission slot.

use pusher_core::{ChainId, FeedId, PriceInfo, SubmitRequest};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

// ============================================================================
// InflightSlot
// ============================================================================

/// Single submission slot for one chain.
///
/// A batch holds the slot from the moment it is planned until its cycle
/// completes. Acquisition is a CAS so a second batch can never start while
/// one is outstanding.
#[derive(Debug, Default)]
pub struct InflightSlot {
    occupied: AtomicBool,
}

impl InflightSlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to take the slot. Returns `false` if it is already held.
    pub fn try_acquire(&self) -> bool {
        self.occupied
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Release the slot. Returns `false` if it was not held.
    pub fn release(&self) -> bool {
        self.occupied
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    #[must_use]
    pub fn is_occupied(&self) -> bool {
        self.occupied.load(Ordering::Acquire)
    }
}

// ============================================================================
// PushBatch
// ============================================================================

/// One feed selected for pushing.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItem {
    pub feed_id: FeedId,
    pub alias: String,
    /// Off-chain value to publish.
    pub price: PriceInfo,
    /// On-chain value at decision time.
    pub on_chain: Option<PriceInfo>,
}

impl BatchItem {
    /// Lowest publish time the chain may hold for this update to apply.
    pub fn min_publish_time(&self) -> i64 {
        self.on_chain
            .map_or(0, |on| on.publish_time.saturating_add(1))
    }

    /// Age of the on-chain value at `now_sec`, if one exists.
    pub fn staleness_secs(&self, now_sec: i64) -> Option<i64> {
        self.on_chain
            .map(|on| now_sec.saturating_sub(on.publish_time).max(0))
    }
}

/// The feeds occupying a chain's submission slot.
#[derive(Debug, Clone, PartialEq)]
pub struct PushBatch {
    /// Per-chain sequence number.
    pub id: u64,
    pub chain_id: ChainId,
    pub items: Vec<BatchItem>,
}

impl PushBatch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn feed_ids(&self) -> Vec<FeedId> {
        self.items.iter().map(|item| item.feed_id).collect()
    }

    /// Comma-separated aliases, for logs.
    pub fn describe(&self) -> String {
        self.items
            .iter()
            .map(|item| item.alias.as_str())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn to_request(&self, attempt: u32, fee_multiplier: Decimal) -> SubmitRequest {
        let mut prices = HashMap::with_capacity(self.items.len());
        let mut min_publish_times = HashMap::with_capacity(self.items.len());
        for item in &self.items {
            prices.insert(item.feed_id, item.price);
            min_publish_times.insert(item.feed_id, item.min_publish_time());
        }
        SubmitRequest {
            feed_ids: self.feed_ids(),
            prices,
            min_publish_times,
            attempt,
            fee_multiplier,
        }
    }
}

/// Split the due set into the chunk submitted now and the remainder.
///
/// Feeds with no on-chain value come first, then the oldest on-chain values.
/// Ties keep their input order, so the plan is deterministic.
pub fn plan_batch(mut due: Vec<BatchItem>, max_batch_size: usize) -> (Vec<BatchItem>, Vec<BatchItem>) {
    due.sort_by_key(|item| item.on_chain.map(|on| on.publish_time));
    let take = max_batch_size.min(due.len());
    let deferred = due.split_off(take);
    (due, deferred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn item(byte: u8, on_chain_time: Option<i64>) -> BatchItem {
        BatchItem {
            feed_id: FeedId::new([byte; 32]),
            alias: format!("FEED{byte}"),
            price: PriceInfo::new(100, 1, 0, 2_000),
            on_chain: on_chain_time.map(|t| PriceInfo::new(99, 1, 0, t)),
        }
    }

    // ========================================================================
    // InflightSlot Tests
    // ========================================================================

    #[test]
    fn test_slot_single_holder() {
        let slot = InflightSlot::new();
        assert!(!slot.is_occupied());
        assert!(slot.try_acquire());
        assert!(!slot.try_acquire());
        assert!(slot.is_occupied());
        assert!(slot.release());
        assert!(!slot.release());
        assert!(slot.try_acquire());
    }

    #[test]
    fn test_slot_concurrent_acquire() {
        use std::sync::Arc;
        use std::thread;

        let slot = Arc::new(InflightSlot::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let slot = Arc::clone(&slot);
                thread::spawn(move || slot.try_acquire())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    // ========================================================================
    // Planning Tests
    // ========================================================================

    #[test]
    fn test_plan_bounds_first_chunk() {
        let due: Vec<_> = (0..7).map(|i| item(i, Some(1_000))).collect();
        let (batch, deferred) = plan_batch(due, 3);
        assert_eq!(batch.len(), 3);
        assert_eq!(deferred.len(), 4);
    }

    #[test]
    fn test_plan_small_set_fits() {
        let due = vec![item(1, Some(1_000)), item(2, None)];
        let (batch, deferred) = plan_batch(due, 10);
        assert_eq!(batch.len(), 2);
        assert!(deferred.is_empty());
    }

    #[test]
    fn test_plan_prioritises_missing_then_oldest() {
        let due = vec![
            item(1, Some(1_500)),
            item(2, Some(1_000)),
            item(3, None),
            item(4, Some(1_000)),
        ];
        let (batch, deferred) = plan_batch(due, 3);
        let order: Vec<_> = batch.iter().map(|i| i.alias.as_str()).collect();
        assert_eq!(order, vec!["FEED3", "FEED2", "FEED4"]);
        assert_eq!(deferred[0].alias, "FEED1");
    }

    // ========================================================================
    // PushBatch Tests
    // ========================================================================

    #[test]
    fn test_request_carries_publish_time_guard() {
        let batch = PushBatch {
            id: 1,
            chain_id: ChainId::new("evm-1"),
            items: vec![item(1, Some(1_000)), item(2, None)],
        };
        let request = batch.to_request(2, dec!(1.21));

        assert_eq!(request.len(), 2);
        assert_eq!(request.attempt, 2);
        assert_eq!(request.fee_multiplier, dec!(1.21));
        assert_eq!(request.min_publish_times[&FeedId::new([1; 32])], 1_001);
        assert_eq!(request.min_publish_times[&FeedId::new([2; 32])], 0);
        assert_eq!(request.prices[&FeedId::new([1; 32])].publish_time, 2_000);
        assert_eq!(batch.describe(), "FEED1,FEED2");
    }

    #[test]
    fn test_staleness_never_negative() {
        let fresh = item(1, Some(1_000));
        assert_eq!(fresh.staleness_secs(1_030), Some(30));
        assert_eq!(fresh.staleness_secs(900), Some(0));
        assert_eq!(item(2, None).staleness_secs(1_030), None);
    }
}
