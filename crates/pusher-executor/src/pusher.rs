//! Chain pusher: per-feed state and the single in-flight slot for one chain.
//!
//! The pusher never performs I/O. `plan` turns a tick's due set into at most
//! one `SubmissionCycle`; `complete` folds the cycle's outcome back into the
//! feed table. Both run on the owning chain task only.

use crate::batch::{plan_batch, BatchItem, InflightSlot, PushBatch};
use crate::cycle::{CycleOutcome, CycleState, SubmissionCycle};
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use pusher_core::{ChainTarget, FeedId, PriceInfo};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Per-feed state owned by one chain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedState {
    pub last_on_chain: Option<PriceInfo>,
    pub last_push_attempt_at: Option<DateTime<Utc>>,
    pub in_flight: bool,
}

/// Observable phase of a chain pusher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PusherState {
    Idle,
    InFlight { batch_id: u64, cycle: CycleState },
}

/// What a tick produced.
pub enum TickPlan {
    /// A batch already holds the slot; the tick is skipped.
    InFlight,
    /// Nothing is due.
    Idle,
    /// Drive this cycle; `deferred` feeds wait for a later tick.
    Submit {
        cycle: SubmissionCycle,
        deferred: usize,
    },
}

struct InFlightBatch {
    batch_id: u64,
    feed_ids: Vec<FeedId>,
    cycle: watch::Receiver<CycleState>,
}

pub struct ChainPusher {
    target: ChainTarget,
    policy: RetryPolicy,
    feeds: HashMap<FeedId, FeedState>,
    slot: InflightSlot,
    current: Option<InFlightBatch>,
    next_batch_id: u64,
}

impl ChainPusher {
    pub fn new(target: ChainTarget, policy: RetryPolicy) -> Self {
        Self {
            target,
            policy,
            feeds: HashMap::new(),
            slot: InflightSlot::new(),
            current: None,
            next_batch_id: 1,
        }
    }

    pub fn target(&self) -> &ChainTarget {
        &self.target
    }

    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.slot.is_occupied()
    }

    pub fn state(&self) -> PusherState {
        match &self.current {
            Some(current) => PusherState::InFlight {
                batch_id: current.batch_id,
                cycle: current.cycle.borrow().clone(),
            },
            None => PusherState::Idle,
        }
    }

    pub fn feed_state(&self, feed_id: &FeedId) -> Option<&FeedState> {
        self.feeds.get(feed_id)
    }

    pub fn last_on_chain(&self, feed_id: &FeedId) -> Option<PriceInfo> {
        self.feeds.get(feed_id).and_then(|s| s.last_on_chain)
    }

    /// Record a value the chain holds. Publish times never go backwards.
    pub fn observe_on_chain(&mut self, feed_id: FeedId, info: PriceInfo) {
        let state = self.feeds.entry(feed_id).or_default();
        match state.last_on_chain {
            Some(current) if current.publish_time > info.publish_time => {}
            _ => state.last_on_chain = Some(info),
        }
    }

    /// Turn the due set into at most one submission cycle.
    pub fn plan(&mut self, due: Vec<BatchItem>, now: DateTime<Utc>) -> TickPlan {
        if self.is_in_flight() {
            return TickPlan::InFlight;
        }
        if due.is_empty() {
            return TickPlan::Idle;
        }
        if !self.slot.try_acquire() {
            return TickPlan::InFlight;
        }

        let max_batch_size = self.target.max_batch_size.max(1) as usize;
        let (items, deferred) = plan_batch(due, max_batch_size);
        for item in &items {
            let state = self.feeds.entry(item.feed_id).or_default();
            state.in_flight = true;
            state.last_push_attempt_at = Some(now);
        }

        let batch = PushBatch {
            id: self.next_batch_id,
            chain_id: self.target.chain_id.clone(),
            items,
        };
        self.next_batch_id += 1;

        let cycle = SubmissionCycle::new(
            batch,
            self.target.max_attempts(),
            Duration::from_secs(u64::from(self.target.confirmation_timeout_sec)),
            self.policy.clone(),
        );
        self.current = Some(InFlightBatch {
            batch_id: cycle.batch().id,
            feed_ids: cycle.batch().feed_ids(),
            cycle: cycle.subscribe(),
        });
        debug!(
            chain = %self.target.chain_id,
            batch_id = cycle.batch().id,
            batch_size = cycle.batch().len(),
            deferred = deferred.len(),
            "Batch planned"
        );

        TickPlan::Submit {
            cycle,
            deferred: deferred.len(),
        }
    }

    /// Apply a finished cycle. Returns the values now known to be on chain.
    pub fn complete(&mut self, outcome: &CycleOutcome) -> Vec<(FeedId, PriceInfo)> {
        let matches_current = self
            .current
            .as_ref()
            .is_some_and(|current| current.batch_id == outcome.batch.id);
        if !matches_current {
            warn!(
                chain = %self.target.chain_id,
                batch_id = outcome.batch.id,
                "Completion for unknown batch ignored"
            );
            return Vec::new();
        }

        if let Some(current) = self.current.take() {
            for feed_id in &current.feed_ids {
                if let Some(state) = self.feeds.get_mut(feed_id) {
                    state.in_flight = false;
                }
            }
        }
        self.slot.release();

        if !outcome.is_confirmed() {
            return Vec::new();
        }
        let confirmed: Vec<_> = outcome
            .batch
            .items
            .iter()
            .map(|item| (item.feed_id, item.price))
            .collect();
        for (feed_id, info) in &confirmed {
            self.observe_on_chain(*feed_id, *info);
        }
        confirmed
    }
}
