//! Per-chain tick loop.
//!
//! Each configured chain runs one `ChainScheduler` on its own task. A tick
//! refreshes the on-chain tracker, evaluates every feed against the shared
//! feed cache and hands the due set to the chain pusher, which starts at most
//! one submission cycle. The cycle runs on a separate task and reports back
//! through a channel, so the loop stays responsive to shutdown while a
//! transaction is confirming. Chain reads made on the loop itself race the
//! shutdown token and are abandoned when it fires.

use crate::batch::BatchItem;
use crate::cycle::CycleOutcome;
use crate::error::{ExecutorError, ExecutorResult};
use crate::pusher::{ChainPusher, PusherState, TickPlan};
use crate::retry::RetryPolicy;
use chrono::{DateTime, Utc};
use pusher_core::{ChainId, ChainTarget, Clock, DynChainAdapter, FeedId, PriceFeedConfig, SystemClock};
use pusher_detector::{Decision, DecisionEngine, SkipReason};
use pusher_feed::{FeedCacheHandle, OnChainTracker};
use pusher_telemetry::Metrics;
use rust_decimal::prelude::ToPrimitive;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long shutdown waits for a cancelled cycle to report back.
const CYCLE_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Nominal time between ticks.
    pub tick_interval: Duration,
    /// Ceiling for the tick interval while the chain is unreachable.
    pub max_tick_backoff: Duration,
    /// Timeout for on-chain reads.
    pub read_timeout: Duration,
    /// Wallet balance polling, if enabled.
    pub balance_poll_interval: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_tick_backoff: Duration::from_secs(30),
            read_timeout: pusher_feed::DEFAULT_READ_TIMEOUT,
            balance_poll_interval: None,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> ExecutorResult<()> {
        if self.tick_interval.is_zero() {
            return Err(ExecutorError::InvalidConfig(
                "tick interval must be > 0".to_string(),
            ));
        }
        if self.read_timeout.is_zero() {
            return Err(ExecutorError::InvalidConfig(
                "read timeout must be > 0".to_string(),
            ));
        }
        if matches!(self.balance_poll_interval, Some(i) if i.is_zero()) {
            return Err(ExecutorError::InvalidConfig(
                "balance poll interval must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickReport {
    /// A batch was already in flight.
    InFlight,
    /// The chain could not be read; the interval was stretched.
    Unreachable,
    /// Every feed is fresh.
    Idle,
    /// Shutdown fired during the on-chain read.
    Cancelled,
    Submitted { batch_size: usize, deferred: usize },
}

pub struct ChainScheduler {
    chain_id: ChainId,
    adapter: DynChainAdapter,
    tracker: OnChainTracker,
    pusher: ChainPusher,
    cache: FeedCacheHandle,
    feeds: Vec<PriceFeedConfig>,
    feed_ids: Vec<FeedId>,
    engine: DecisionEngine,
    /// When low confidence first held back a feed that has no on-chain value.
    held_since: HashMap<FeedId, i64>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,
    effective_interval: Duration,
    completion_tx: mpsc::Sender<CycleOutcome>,
    completion_rx: mpsc::Receiver<CycleOutcome>,
    cycle_task: Option<JoinHandle<()>>,
    cycle_shutdown: CancellationToken,
}

impl ChainScheduler {
    pub fn new(
        adapter: DynChainAdapter,
        target: ChainTarget,
        policy: RetryPolicy,
        config: SchedulerConfig,
        feeds: Vec<PriceFeedConfig>,
        cache: FeedCacheHandle,
        engine: DecisionEngine,
    ) -> Self {
        let (completion_tx, completion_rx) = mpsc::channel(4);
        let feed_ids = feeds.iter().map(|f| f.feed_id).collect();
        Self {
            chain_id: target.chain_id.clone(),
            tracker: OnChainTracker::new(Arc::clone(&adapter), config.read_timeout),
            adapter,
            pusher: ChainPusher::new(target, policy),
            cache,
            feeds,
            feed_ids,
            engine,
            held_since: HashMap::new(),
            clock: Arc::new(SystemClock),
            effective_interval: config.tick_interval,
            config,
            completion_tx,
            completion_rx,
            cycle_task: None,
            cycle_shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    pub fn pusher(&self) -> &ChainPusher {
        &self.pusher
    }

    pub fn state(&self) -> PusherState {
        self.pusher.state()
    }

    /// Current tick interval, including unreachable back-off.
    pub fn effective_interval(&self) -> Duration {
        self.effective_interval
    }

    /// Run until `shutdown` fires.
    pub async fn run(mut self, shutdown: CancellationToken) {
        self.cycle_shutdown = shutdown.child_token();
        info!(
            chain = %self.chain_id,
            feeds = self.feeds.len(),
            tick_ms = self.config.tick_interval.as_millis() as u64,
            "Chain scheduler started"
        );

        let mut next_tick = Instant::now();
        let mut next_balance_poll = self.config.balance_poll_interval.map(|_| Instant::now());

        loop {
            let balance_at = next_balance_poll.unwrap_or_else(|| Instant::now() + Duration::from_secs(3_600));
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                Some(outcome) = self.completion_rx.recv() => self.on_completion(outcome),
                () = tokio::time::sleep_until(next_tick) => {
                    let report = self.tick().await;
                    debug!(chain = %self.chain_id, ?report, "Tick finished");
                    next_tick = Instant::now() + self.effective_interval;
                }
                () = tokio::time::sleep_until(balance_at), if next_balance_poll.is_some() => {
                    self.poll_balance().await;
                    next_balance_poll = self.config.balance_poll_interval.map(|i| Instant::now() + i);
                }
            }
        }

        self.shutdown().await;
    }

    /// One refresh, decide, plan pass.
    pub async fn tick(&mut self) -> TickReport {
        if self.pusher.is_in_flight() {
            debug!(chain = %self.chain_id, "Batch in flight, skipping tick");
            return TickReport::InFlight;
        }

        let read = tokio::select! {
            biased;
            () = self.cycle_shutdown.cancelled() => {
                debug!(chain = %self.chain_id, "On-chain refresh abandoned for shutdown");
                return TickReport::Cancelled;
            }
            read = self.tracker.refresh(&self.feed_ids) => read,
        };

        match read {
            Ok(observed) => {
                self.effective_interval = self.config.tick_interval;
                for (feed_id, info) in observed {
                    self.pusher.observe_on_chain(feed_id, info);
                }
                for feed in &self.feeds {
                    if let Some(on) = self.pusher.last_on_chain(&feed.feed_id) {
                        Metrics::on_chain_publish_time(self.chain_id.as_str(), &feed.alias, on.publish_time);
                    }
                }
            }
            Err(e) => {
                Metrics::chain_unreachable(self.chain_id.as_str());
                let ceiling = self.config.max_tick_backoff.max(self.config.tick_interval);
                self.effective_interval = self.effective_interval.saturating_mul(2).min(ceiling);
                warn!(
                    chain = %self.chain_id,
                    error = %e,
                    next_tick_ms = self.effective_interval.as_millis() as u64,
                    "On-chain refresh failed, backing off"
                );
                return TickReport::Unreachable;
            }
        }

        let due = self.collect_due();
        let now = DateTime::<Utc>::from_timestamp_millis(self.clock.now_ms() as i64)
            .unwrap_or_else(Utc::now);

        match self.pusher.plan(due, now) {
            TickPlan::InFlight => TickReport::InFlight,
            TickPlan::Idle => TickReport::Idle,
            TickPlan::Submit { cycle, deferred } => {
                let batch_size = cycle.batch().len();
                let chain = self.chain_id.as_str();
                Metrics::batch_size(chain, batch_size);
                let now_sec = self.clock.now_unix_sec();
                for item in &cycle.batch().items {
                    if let Some(age) = item.staleness_secs(now_sec) {
                        Metrics::staleness_at_push(chain, &item.alias, age);
                    }
                }
                if deferred > 0 {
                    debug!(chain = %self.chain_id, deferred, "Due feeds deferred to a later tick");
                }

                let adapter = Arc::clone(&self.adapter);
                let tx = self.completion_tx.clone();
                let shutdown = self.cycle_shutdown.clone();
                let chain_id = self.chain_id.clone();
                self.cycle_task = Some(tokio::spawn(async move {
                    let outcome = cycle.drive(adapter.as_ref(), &shutdown).await;
                    if tx.send(outcome).await.is_err() {
                        debug!(chain = %chain_id, "Scheduler gone before cycle completed");
                    }
                }));

                TickReport::Submitted {
                    batch_size,
                    deferred,
                }
            }
        }
    }

    /// Wait for the in-flight cycle to finish and apply it.
    pub async fn wait_for_completion(&mut self) -> Option<CycleOutcome> {
        if !self.pusher.is_in_flight() {
            return None;
        }
        let outcome = self.completion_rx.recv().await?;
        self.on_completion(outcome.clone());
        Some(outcome)
    }

    fn collect_due(&mut self) -> Vec<BatchItem> {
        let chain = self.chain_id.as_str();
        let now_sec = self.clock.now_unix_sec();
        let mut due = Vec::new();
        for feed in &self.feeds {
            let Some(off_chain) = self.cache.get(&feed.feed_id) else {
                debug!(chain = %chain, feed = %feed.alias, "No off-chain price yet");
                continue;
            };
            let on_chain = self.pusher.last_on_chain(&feed.feed_id);
            let held_secs = match on_chain {
                Some(_) => None,
                None => self
                    .held_since
                    .get(&feed.feed_id)
                    .map(|since| now_sec.saturating_sub(*since)),
            };
            let decision = self
                .engine
                .evaluate_held(&off_chain, on_chain.as_ref(), feed, held_secs);
            if matches!(decision, Decision::Skip(SkipReason::LowConfidence { .. })) {
                self.held_since.entry(feed.feed_id).or_insert(now_sec);
            } else {
                self.held_since.remove(&feed.feed_id);
            }
            Metrics::decision(chain, decision.label());
            debug!(chain = %chain, feed = %feed.alias, %decision, "Evaluated feed");

            if decision.is_push() {
                due.push(BatchItem {
                    feed_id: feed.feed_id,
                    alias: feed.alias.clone(),
                    price: off_chain,
                    on_chain,
                });
            }
        }
        due
    }

    fn on_completion(&mut self, outcome: CycleOutcome) {
        self.cycle_task = None;
        let aliases: HashMap<FeedId, &str> = self
            .feeds
            .iter()
            .map(|f| (f.feed_id, f.alias.as_str()))
            .collect();

        for (feed_id, info) in self.pusher.complete(&outcome) {
            if let Some(alias) = aliases.get(&feed_id) {
                Metrics::on_chain_publish_time(self.chain_id.as_str(), alias, info.publish_time);
            }
        }
    }

    async fn poll_balance(&self) {
        let read = tokio::time::timeout(self.tracker.read_timeout(), self.adapter.balance());
        let read = tokio::select! {
            biased;
            () = self.cycle_shutdown.cancelled() => {
                debug!(chain = %self.chain_id, "Balance read abandoned for shutdown");
                return;
            }
            read = read => read,
        };
        match read {
            Ok(Ok(Some(balance))) => {
                if let Some(value) = balance.to_f64() {
                    Metrics::wallet_balance(self.chain_id.as_str(), value);
                }
                debug!(chain = %self.chain_id, %balance, "Wallet balance");
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!(chain = %self.chain_id, error = %e, "Balance read failed"),
            Err(_) => warn!(chain = %self.chain_id, "Balance read timed out"),
        }
    }

    async fn shutdown(&mut self) {
        self.cycle_shutdown.cancel();
        if let Some(task) = self.cycle_task.take() {
            if tokio::time::timeout(CYCLE_SHUTDOWN_GRACE, task).await.is_err() {
                warn!(chain = %self.chain_id, "In-flight cycle did not stop in time");
            }
        }
        while let Ok(outcome) = self.completion_rx.try_recv() {
            self.on_completion(outcome);
        }
        info!(chain = %self.chain_id, "Chain scheduler stopped");
    }
}
