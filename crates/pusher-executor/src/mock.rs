//! Scripted chain adapter for tests.
//!
//! Without any script the mock behaves like a well-behaved chain: reads return
//! what it holds, submissions are accepted, and the first status poll confirms
//! and applies the update. Scripts queue one-off results; defaults replace the
//! fallback behaviour for every later call.

use parking_lot::Mutex;
use pusher_core::{
    BoxFuture, ChainAdapter, ChainError, ChainId, FeedId, PriceInfo, SubmitError, SubmitRequest,
    TxHandle, TxStatus,
};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug)]
pub struct MockChainAdapter {
    chain_id: ChainId,
    on_chain: Mutex<HashMap<FeedId, PriceInfo>>,
    refresh_script: Mutex<VecDeque<Result<(), ChainError>>>,
    refresh_default: Mutex<Result<(), ChainError>>,
    submit_script: Mutex<VecDeque<Result<(), SubmitError>>>,
    submit_default: Mutex<Result<(), SubmitError>>,
    submit_latency: Mutex<Option<Duration>>,
    read_latency: Mutex<Option<Duration>>,
    status_script: Mutex<VecDeque<Result<TxStatus, ChainError>>>,
    status_default: Mutex<Result<TxStatus, ChainError>>,
    pending: Mutex<HashMap<String, SubmitRequest>>,
    submissions: Mutex<Vec<SubmitRequest>>,
    balance: Mutex<Option<Decimal>>,
    refresh_calls: AtomicU32,
    status_calls: AtomicU32,
    next_tx: AtomicU64,
}

impl MockChainAdapter {
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: ChainId::new(chain_id),
            on_chain: Mutex::new(HashMap::new()),
            refresh_script: Mutex::new(VecDeque::new()),
            refresh_default: Mutex::new(Ok(())),
            submit_script: Mutex::new(VecDeque::new()),
            submit_default: Mutex::new(Ok(())),
            submit_latency: Mutex::new(None),
            read_latency: Mutex::new(None),
            status_script: Mutex::new(VecDeque::new()),
            status_default: Mutex::new(Ok(TxStatus::Confirmed)),
            pending: Mutex::new(HashMap::new()),
            submissions: Mutex::new(Vec::new()),
            balance: Mutex::new(None),
            refresh_calls: AtomicU32::new(0),
            status_calls: AtomicU32::new(0),
            next_tx: AtomicU64::new(1),
        }
    }

    /// Set the value the chain currently holds for a feed.
    pub fn set_on_chain(&self, feed_id: FeedId, info: PriceInfo) {
        self.on_chain.lock().insert(feed_id, info);
    }

    pub fn on_chain(&self, feed_id: &FeedId) -> Option<PriceInfo> {
        self.on_chain.lock().get(feed_id).copied()
    }

    pub fn push_refresh(&self, result: Result<(), ChainError>) {
        self.refresh_script.lock().push_back(result);
    }

    pub fn set_refresh_default(&self, result: Result<(), ChainError>) {
        *self.refresh_default.lock() = result;
    }

    pub fn push_submit(&self, result: Result<(), SubmitError>) {
        self.submit_script.lock().push_back(result);
    }

    pub fn set_submit_default(&self, result: Result<(), SubmitError>) {
        *self.submit_default.lock() = result;
    }

    /// Delay every submission by `latency` before it resolves.
    pub fn set_submit_latency(&self, latency: Duration) {
        *self.submit_latency.lock() = Some(latency);
    }

    /// Delay every refresh and balance read by `latency`.
    pub fn set_read_latency(&self, latency: Duration) {
        *self.read_latency.lock() = Some(latency);
    }

    async fn read_delay(&self) {
        let latency = *self.read_latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    pub fn push_status(&self, result: Result<TxStatus, ChainError>) {
        self.status_script.lock().push_back(result);
    }

    pub fn set_status_default(&self, result: Result<TxStatus, ChainError>) {
        *self.status_default.lock() = result;
    }

    pub fn set_balance(&self, balance: Option<Decimal>) {
        *self.balance.lock() = balance;
    }

    /// Every request passed to `submit`, in order.
    pub fn submissions(&self) -> Vec<SubmitRequest> {
        self.submissions.lock().clone()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().len()
    }

    pub fn refresh_calls(&self) -> u32 {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn status_calls(&self) -> u32 {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn apply(&self, request: &SubmitRequest) {
        let mut on_chain = self.on_chain.lock();
        for (feed_id, price) in &request.prices {
            let newer = on_chain
                .get(feed_id)
                .map_or(true, |current| price.publish_time > current.publish_time);
            if newer {
                on_chain.insert(*feed_id, *price);
            }
        }
    }
}

impl ChainAdapter for MockChainAdapter {
    fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    fn refresh<'a>(
        &'a self,
        feed_ids: &'a [FeedId],
    ) -> BoxFuture<'a, Result<HashMap<FeedId, PriceInfo>, ChainError>> {
        Box::pin(async move {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            self.read_delay().await;
            let scripted = self.refresh_script.lock().pop_front();
            scripted.unwrap_or_else(|| self.refresh_default.lock().clone())?;

            let on_chain = self.on_chain.lock();
            Ok(feed_ids
                .iter()
                .filter_map(|id| on_chain.get(id).map(|info| (*id, *info)))
                .collect())
        })
    }

    fn submit(&self, request: SubmitRequest) -> BoxFuture<'_, Result<TxHandle, SubmitError>> {
        Box::pin(async move {
            let latency = *self.submit_latency.lock();
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            self.submissions.lock().push(request.clone());
            let scripted = self.submit_script.lock().pop_front();
            scripted.unwrap_or_else(|| self.submit_default.lock().clone())?;

            let tx = TxHandle::new(format!(
                "mock-tx-{}",
                self.next_tx.fetch_add(1, Ordering::SeqCst)
            ));
            self.pending.lock().insert(tx.id.clone(), request);
            Ok(tx)
        })
    }

    fn status<'a>(&'a self, tx: &'a TxHandle) -> BoxFuture<'a, Result<TxStatus, ChainError>> {
        Box::pin(async move {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let scripted = self.status_script.lock().pop_front();
            let status = scripted.unwrap_or_else(|| self.status_default.lock().clone())?;

            if status == TxStatus::Confirmed {
                let request = self.pending.lock().remove(&tx.id);
                if let Some(request) = request {
                    self.apply(&request);
                }
            }
            Ok(status)
        })
    }

    fn balance(&self) -> BoxFuture<'_, Result<Option<Decimal>, ChainError>> {
        Box::pin(async move {
            self.read_delay().await;
            Ok(*self.balance.lock())
        })
    }
}
