//! Submission cycle for one batch.
//!
//! A cycle starts in `Submitting` and ends in exactly one terminal state:
//!
//! ```text
//! Submitting --ok--> Confirming --confirmed--> Confirmed
//!     |                  |
//!     | transient        | failed (transient) / timeout
//!     v                  v
//!   Retrying <-----------+ --attempts exhausted--> Failed(Exhausted)
//!     |
//!     +--backoff elapsed--> Submitting
//!
//! permanent error (submit or status) --> Failed(Permanent)
//! superseded (submit or status)      --> Superseded
//! shutdown at any suspension point   --> Cancelled
//! ```
//!
//! Transitions are plain methods so the state machine can be exercised without
//! a runtime; `drive` performs the adapter calls and timers around them.

use crate::batch::PushBatch;
use crate::retry::RetryPolicy;
use pusher_core::{ChainAdapter, ChainError, SubmitError, SubmitErrorKind, TxHandle, TxStatus};
use pusher_telemetry::Metrics;
use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ============================================================================
// CycleState
// ============================================================================

/// Why a cycle gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    /// Rejected by the chain; never retried.
    Permanent { error: String },
    /// Every allowed attempt failed transiently.
    Exhausted { last_error: String },
}

impl FailureKind {
    /// Label used for the failure metric.
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Permanent { .. } => "permanent",
            FailureKind::Exhausted { .. } => "exhausted",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            FailureKind::Permanent { error } => error,
            FailureKind::Exhausted { last_error } => last_error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleState {
    Submitting,
    Confirming { tx: TxHandle, deadline: Instant },
    Retrying { delay: Duration, reason: String },
    Confirmed { tx: TxHandle },
    Superseded { reason: String },
    Failed(FailureKind),
    Cancelled,
}

impl CycleState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CycleState::Confirmed { .. }
                | CycleState::Superseded { .. }
                | CycleState::Failed(_)
                | CycleState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Submitting => "submitting",
            CycleState::Confirming { .. } => "confirming",
            CycleState::Retrying { .. } => "retrying",
            CycleState::Confirmed { .. } => "confirmed",
            CycleState::Superseded { .. } => "superseded",
            CycleState::Failed(_) => "failed",
            CycleState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a finished cycle, handed back to the chain's scheduler.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    pub batch: PushBatch,
    /// Number of `submit` calls made.
    pub submissions: u32,
    /// Terminal state.
    pub state: CycleState,
}

impl CycleOutcome {
    #[must_use]
    pub fn is_confirmed(&self) -> bool {
        matches!(self.state, CycleState::Confirmed { .. })
    }
}

// ============================================================================
// SubmissionCycle
// ============================================================================

pub struct SubmissionCycle {
    batch: PushBatch,
    state: CycleState,
    /// Zero-based number of the attempt in progress.
    attempt: u32,
    submissions: u32,
    max_attempts: u32,
    confirmation_timeout: Duration,
    policy: RetryPolicy,
    observer: watch::Sender<CycleState>,
}

impl SubmissionCycle {
    pub fn new(
        batch: PushBatch,
        max_attempts: u32,
        confirmation_timeout: Duration,
        policy: RetryPolicy,
    ) -> Self {
        let (observer, _) = watch::channel(CycleState::Submitting);
        Self {
            batch,
            state: CycleState::Submitting,
            attempt: 0,
            submissions: 0,
            max_attempts: max_attempts.max(1),
            confirmation_timeout,
            policy,
            observer,
        }
    }

    pub fn batch(&self) -> &PushBatch {
        &self.batch
    }

    pub fn state(&self) -> &CycleState {
        &self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Watch the cycle's state from another task.
    pub fn subscribe(&self) -> watch::Receiver<CycleState> {
        self.observer.subscribe()
    }

    fn set_state(&mut self, state: CycleState) {
        self.observer.send_replace(state.clone());
        self.state = state;
    }

    // ------------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------------

    /// Result of the `submit` call for the current attempt.
    pub fn on_submitted(&mut self, result: Result<TxHandle, SubmitError>, now: Instant) {
        if self.state != CycleState::Submitting {
            return;
        }
        self.submissions += 1;
        match result {
            Ok(tx) => self.set_state(CycleState::Confirming {
                tx,
                deadline: now + self.confirmation_timeout,
            }),
            Err(e) => self.on_error(e),
        }
    }

    /// Result of one status poll.
    ///
    /// Poll errors and `Pending` keep the cycle confirming until the deadline,
    /// after which the attempt counts as a transient failure.
    pub fn on_status(&mut self, result: Result<TxStatus, ChainError>, now: Instant) {
        let CycleState::Confirming { tx, deadline } = &self.state else {
            return;
        };
        let (tx, deadline) = (tx.clone(), *deadline);

        match result {
            Ok(TxStatus::Confirmed) => self.set_state(CycleState::Confirmed { tx }),
            Ok(TxStatus::Failed(e)) => self.on_error(e),
            Ok(TxStatus::Pending) | Err(_) if now >= deadline => self.on_error(
                SubmitError::transient(format!(
                    "tx {tx} not confirmed within {}s",
                    self.confirmation_timeout.as_secs()
                )),
            ),
            Ok(TxStatus::Pending) | Err(_) => {}
        }
    }

    /// Backoff delay elapsed; start the next attempt.
    pub fn on_backoff_elapsed(&mut self) {
        if matches!(self.state, CycleState::Retrying { .. }) {
            self.attempt += 1;
            self.set_state(CycleState::Submitting);
        }
    }

    pub fn cancel(&mut self) {
        if !self.state.is_terminal() {
            self.set_state(CycleState::Cancelled);
        }
    }

    fn on_error(&mut self, error: SubmitError) {
        match error.kind {
            SubmitErrorKind::Permanent => self.set_state(CycleState::Failed(FailureKind::Permanent {
                error: error.message,
            })),
            SubmitErrorKind::Superseded => self.set_state(CycleState::Superseded {
                reason: error.message,
            }),
            SubmitErrorKind::Transient if self.attempt + 1 >= self.max_attempts => {
                self.set_state(CycleState::Failed(FailureKind::Exhausted {
                    last_error: error.message,
                }))
            }
            SubmitErrorKind::Transient => self.set_state(CycleState::Retrying {
                delay: self.policy.backoff_delay(self.attempt),
                reason: error.message,
            }),
        }
    }

    // ------------------------------------------------------------------------
    // Driver
    // ------------------------------------------------------------------------

    /// Run the cycle to a terminal state against `adapter`.
    pub async fn drive(mut self, adapter: &dyn ChainAdapter, shutdown: &CancellationToken) -> CycleOutcome {
        let chain = self.batch.chain_id.to_string();

        while !self.state.is_terminal() {
            match self.state.clone() {
                CycleState::Submitting => {
                    let fee_multiplier = self.policy.fee_multiplier(self.attempt);
                    let request = self.batch.to_request(self.attempt, fee_multiplier);
                    Metrics::push_attempt(&chain);
                    info!(
                        chain = %chain,
                        batch_id = self.batch.id,
                        attempt = self.attempt,
                        batch_size = self.batch.len(),
                        fee_multiplier = %fee_multiplier,
                        feeds = %self.batch.describe(),
                        "Submitting price update"
                    );

                    let submit = tokio::time::timeout(self.confirmation_timeout, adapter.submit(request));
                    let result = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => {
                            self.cancel();
                            continue;
                        }
                        result = submit => result.unwrap_or_else(|_| {
                            Err(SubmitError::transient("submit call timed out"))
                        }),
                    };

                    if let Err(e) = &result {
                        if e.is_retryable() {
                            Metrics::push_failure(&chain, "transient");
                            warn!(
                                chain = %chain,
                                batch_id = self.batch.id,
                                attempt = self.attempt,
                                error = %e,
                                "Submission failed"
                            );
                        }
                    }
                    self.on_submitted(result, Instant::now());
                }
                CycleState::Confirming { tx, deadline } => {
                    let poll_interval = self.policy.status_poll_interval();
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => {
                            self.cancel();
                            continue;
                        }
                        _ = tokio::time::sleep(poll_interval) => {}
                    }

                    let poll = tokio::time::timeout(poll_interval, adapter.status(&tx));
                    let status = tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => {
                            self.cancel();
                            continue;
                        }
                        status = poll => status.unwrap_or_else(|_| {
                            Err(ChainError::Rpc("status poll timed out".to_string()))
                        }),
                    };

                    let now = Instant::now();
                    match &status {
                        Ok(TxStatus::Pending) | Err(_) if now >= deadline => {
                            Metrics::push_failure(&chain, "transient");
                            warn!(
                                chain = %chain,
                                tx = %tx,
                                attempt = self.attempt,
                                timeout_secs = self.confirmation_timeout.as_secs(),
                                "Confirmation timed out"
                            );
                        }
                        Ok(TxStatus::Pending) => {
                            debug!(chain = %chain, tx = %tx, "Transaction pending");
                        }
                        Err(e) => {
                            warn!(chain = %chain, tx = %tx, error = %e, "Status poll failed");
                        }
                        Ok(TxStatus::Failed(e)) if e.is_retryable() => {
                            Metrics::push_failure(&chain, "transient");
                            warn!(
                                chain = %chain,
                                tx = %tx,
                                attempt = self.attempt,
                                error = %e,
                                "Transaction failed"
                            );
                        }
                        Ok(_) => {}
                    }
                    self.on_status(status, now);
                }
                CycleState::Retrying { delay, reason } => {
                    debug!(
                        chain = %chain,
                        batch_id = self.batch.id,
                        attempt = self.attempt,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "Backing off before retry"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => self.cancel(),
                        _ = tokio::time::sleep(delay) => self.on_backoff_elapsed(),
                    }
                }
                CycleState::Confirmed { .. }
                | CycleState::Superseded { .. }
                | CycleState::Failed(_)
                | CycleState::Cancelled => {}
            }
        }

        self.finish(&chain)
    }

    fn finish(self, chain: &str) -> CycleOutcome {
        let attempts = self.submissions;
        match &self.state {
            CycleState::Confirmed { tx } => {
                Metrics::push_success(chain);
                info!(
                    chain = %chain,
                    batch_id = self.batch.id,
                    tx = %tx,
                    attempts,
                    feeds = %self.batch.describe(),
                    "Price update confirmed"
                );
            }
            CycleState::Superseded { reason } => {
                info!(
                    chain = %chain,
                    batch_id = self.batch.id,
                    attempts,
                    reason = %reason,
                    "Price update superseded by a newer on-chain value"
                );
            }
            CycleState::Failed(kind) => {
                Metrics::push_failure(chain, kind.as_str());
                error!(
                    chain = %chain,
                    batch_id = self.batch.id,
                    attempts,
                    kind = kind.as_str(),
                    error = %kind.message(),
                    feeds = ?self.batch.feed_ids().iter().map(|id| id.to_string()).collect::<Vec<_>>(),
                    "Price update failed"
                );
            }
            CycleState::Cancelled => {
                info!(chain = %chain, batch_id = self.batch.id, attempts, "Price update cancelled");
            }
            CycleState::Submitting | CycleState::Confirming { .. } | CycleState::Retrying { .. } => {}
        }

        CycleOutcome {
            batch: self.batch,
            submissions: attempts,
            state: self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::BatchItem;
    use crate::mock::MockChainAdapter;
    use pusher_core::{ChainId, FeedId, PriceInfo};
    use rust_decimal_macros::dec;

    fn batch() -> PushBatch {
        PushBatch {
            id: 7,
            chain_id: ChainId::new("mock"),
            items: vec![BatchItem {
                feed_id: FeedId::new([1; 32]),
                alias: "BTC/USD".to_string(),
                price: PriceInfo::new(6_500_000, 1_000, -5, 1_070),
                on_chain: Some(PriceInfo::new(6_400_000, 1_000, -5, 1_000)),
            }],
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            status_poll_interval_ms: 1_000,
            ..Default::default()
        }
    }

    fn cycle(max_attempts: u32) -> SubmissionCycle {
        SubmissionCycle::new(batch(), max_attempts, Duration::from_secs(3), policy())
    }

    // ========================================================================
    // Transition Tests
    // ========================================================================

    #[test]
    fn test_submit_then_confirm() {
        let now = Instant::now();
        let mut c = cycle(3);
        c.on_submitted(Ok(TxHandle::new("0xabc")), now);
        assert!(matches!(c.state(), CycleState::Confirming { .. }));

        c.on_status(Ok(TxStatus::Pending), now + Duration::from_secs(1));
        assert!(matches!(c.state(), CycleState::Confirming { .. }));

        c.on_status(Ok(TxStatus::Confirmed), now + Duration::from_secs(2));
        assert_eq!(
            c.state(),
            &CycleState::Confirmed {
                tx: TxHandle::new("0xabc")
            }
        );
    }

    #[test]
    fn test_transient_retries_until_exhausted() {
        let now = Instant::now();
        let mut c = cycle(3);

        for attempt in 0..2 {
            c.on_submitted(Err(SubmitError::transient("rate limited")), now);
            assert_eq!(
                c.state(),
                &CycleState::Retrying {
                    delay: policy().backoff_delay(attempt),
                    reason: "rate limited".to_string()
                }
            );
            c.on_backoff_elapsed();
            assert_eq!(c.state(), &CycleState::Submitting);
        }

        c.on_submitted(Err(SubmitError::transient("rate limited")), now);
        assert_eq!(
            c.state(),
            &CycleState::Failed(FailureKind::Exhausted {
                last_error: "rate limited".to_string()
            })
        );
        assert_eq!(c.attempt(), 2);
    }

    #[test]
    fn test_permanent_is_terminal() {
        let mut c = cycle(5);
        c.on_submitted(Err(SubmitError::permanent("insufficient funds")), Instant::now());
        assert_eq!(
            c.state(),
            &CycleState::Failed(FailureKind::Permanent {
                error: "insufficient funds".to_string()
            })
        );
        c.on_backoff_elapsed();
        assert!(c.state().is_terminal());
    }

    #[test]
    fn test_superseded_from_status() {
        let now = Instant::now();
        let mut c = cycle(5);
        c.on_submitted(Ok(TxHandle::new("0x1")), now);
        c.on_status(
            Ok(TxStatus::Failed(SubmitError::superseded("newer price on chain"))),
            now,
        );
        assert!(matches!(c.state(), CycleState::Superseded { .. }));
    }

    #[test]
    fn test_confirmation_timeout_is_transient() {
        let now = Instant::now();
        let mut c = cycle(5);
        c.on_submitted(Ok(TxHandle::new("0x1")), now);

        c.on_status(Err(ChainError::Rpc("502".to_string())), now + Duration::from_secs(1));
        assert!(matches!(c.state(), CycleState::Confirming { .. }));

        c.on_status(Ok(TxStatus::Pending), now + Duration::from_secs(3));
        assert!(matches!(c.state(), CycleState::Retrying { .. }));
    }

    #[test]
    fn test_out_of_order_events_ignored() {
        let mut c = cycle(3);
        c.on_status(Ok(TxStatus::Confirmed), Instant::now());
        assert_eq!(c.state(), &CycleState::Submitting);
        c.on_backoff_elapsed();
        assert_eq!(c.attempt(), 0);
    }

    #[test]
    fn test_cancel_keeps_terminal_state() {
        let mut c = cycle(1);
        c.on_submitted(Err(SubmitError::permanent("bad")), Instant::now());
        c.cancel();
        assert!(matches!(c.state(), CycleState::Failed(_)));
    }

    // ========================================================================
    // Driver Tests
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_drive_confirms() {
        let mock = MockChainAdapter::new("mock");
        let c = cycle(4);
        let observer = c.subscribe();

        let outcome = c.drive(&mock, &CancellationToken::new()).await;
        assert!(outcome.is_confirmed());
        assert_eq!(outcome.submissions, 1);
        assert_eq!(mock.on_chain(&FeedId::new([1; 32])).unwrap().publish_time, 1_070);
        assert!(matches!(*observer.borrow(), CycleState::Confirmed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_always_transient_makes_max_attempts() {
        let mock = MockChainAdapter::new("mock");
        mock.set_submit_default(Err(SubmitError::transient("nonce too low")));
        let max_retries = 3;

        let start = Instant::now();
        let outcome = cycle(max_retries + 1)
            .drive(&mock, &CancellationToken::new())
            .await;

        assert_eq!(mock.submission_count(), (max_retries + 1) as usize);
        assert_eq!(outcome.submissions, max_retries + 1);
        assert!(matches!(
            outcome.state,
            CycleState::Failed(FailureKind::Exhausted { .. })
        ));
        // 100 + 200 + 400 ms of backoff between four attempts.
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(700));
        assert!(elapsed < Duration::from_millis(750));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_escalates_fee_per_attempt() {
        let mock = MockChainAdapter::new("mock");
        mock.push_submit(Err(SubmitError::transient("underpriced")));
        mock.push_submit(Err(SubmitError::transient("underpriced")));

        let outcome = cycle(4).drive(&mock, &CancellationToken::new()).await;
        assert!(outcome.is_confirmed());

        let submissions = mock.submissions();
        assert_eq!(submissions.len(), 3);
        assert_eq!(submissions[0].attempt, 0);
        assert_eq!(submissions[0].fee_multiplier, dec!(1));
        assert_eq!(submissions[2].attempt, 2);
        assert_eq!(submissions[2].fee_multiplier, dec!(1.21));
        assert_eq!(
            submissions[0].min_publish_times[&FeedId::new([1; 32])],
            1_001
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_permanent_no_retry() {
        let mock = MockChainAdapter::new("mock");
        mock.set_submit_default(Err(SubmitError::permanent("invalid payload")));

        let outcome = cycle(4).drive(&mock, &CancellationToken::new()).await;
        assert_eq!(mock.submission_count(), 1);
        assert!(matches!(
            outcome.state,
            CycleState::Failed(FailureKind::Permanent { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_confirmation_timeout_resubmits() {
        let mock = MockChainAdapter::new("mock");
        for _ in 0..3 {
            mock.push_status(Ok(TxStatus::Pending));
        }

        let outcome = cycle(4).drive(&mock, &CancellationToken::new()).await;
        assert!(outcome.is_confirmed());
        assert_eq!(outcome.submissions, 2);
        assert_eq!(mock.status_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_superseded_no_retry() {
        let mock = MockChainAdapter::new("mock");
        mock.push_submit(Err(SubmitError::superseded("price already newer")));

        let outcome = cycle(4).drive(&mock, &CancellationToken::new()).await;
        assert!(matches!(outcome.state, CycleState::Superseded { .. }));
        assert_eq!(mock.submission_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drive_stops_on_shutdown() {
        let mock = MockChainAdapter::new("mock");
        mock.set_status_default(Ok(TxStatus::Pending));
        let shutdown = CancellationToken::new();

        let handle = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { cycle(4).drive(&mock, &shutdown).await })
        };
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        shutdown.cancel();

        let outcome = handle.await.unwrap();
        assert_eq!(outcome.state, CycleState::Cancelled);
        assert_eq!(outcome.submissions, 1);
    }
}
