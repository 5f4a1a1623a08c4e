//! In-memory chain for dry runs.
//!
//! Submissions land after a fixed confirmation latency and are applied with
//! the same rule a price contract uses: a feed is only overwritten by a newer
//! publish time. A batch in which every feed is already current is reported
//! as superseded. Each landed update costs `fee_per_update * fee_multiplier`
//! from a simulated wallet. A fee too large to represent rejects the batch.

use parking_lot::Mutex;
use pusher_core::{
    BoxFuture, ChainAdapter, ChainError, ChainId, FeedId, PriceInfo, SubmitError, SubmitRequest,
    TxHandle, TxStatus,
};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

struct PendingTx {
    request: SubmitRequest,
    cost: Decimal,
    lands_at: Instant,
}

pub struct SimulatedChainAdapter {
    chain_id: ChainId,
    confirmation_latency: Duration,
    fee_per_update: Decimal,
    on_chain: Mutex<HashMap<FeedId, PriceInfo>>,
    pending: Mutex<HashMap<String, PendingTx>>,
    balance: Mutex<Decimal>,
    next_tx: AtomicU64,
}

impl SimulatedChainAdapter {
    pub fn new(
        chain_id: ChainId,
        confirmation_latency: Duration,
        initial_balance: Decimal,
        fee_per_update: Decimal,
    ) -> Self {
        Self {
            chain_id,
            confirmation_latency,
            fee_per_update,
            on_chain: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
            balance: Mutex::new(initial_balance),
            next_tx: AtomicU64::new(1),
        }
    }

    pub fn on_chain(&self, feed_id: &FeedId) -> Option<PriceInfo> {
        self.on_chain.lock().get(feed_id).copied()
    }

    fn batch_cost(&self, request: &SubmitRequest) -> Option<Decimal> {
        self.fee_per_update
            .checked_mul(Decimal::from(request.len()))?
            .checked_mul(request.fee_multiplier)
    }

    fn is_current(&self, request: &SubmitRequest) -> bool {
        let on_chain = self.on_chain.lock();
        request.prices.iter().all(|(feed_id, price)| {
            on_chain
                .get(feed_id)
                .is_some_and(|current| current.publish_time >= price.publish_time)
        })
    }

    fn land(&self, request: &SubmitRequest) -> usize {
        let mut on_chain = self.on_chain.lock();
        let mut applied = 0;
        for feed_id in &request.feed_ids {
            let Some(price) = request.prices.get(feed_id) else {
                continue;
            };
            let newer = on_chain
                .get(feed_id)
                .map_or(true, |current| price.publish_time > current.publish_time);
            if newer {
                on_chain.insert(*feed_id, *price);
                applied += 1;
            }
        }
        applied
    }
}

impl ChainAdapter for SimulatedChainAdapter {
    fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    fn refresh<'a>(
        &'a self,
        feed_ids: &'a [FeedId],
    ) -> BoxFuture<'a, Result<HashMap<FeedId, PriceInfo>, ChainError>> {
        Box::pin(async move {
            let on_chain = self.on_chain.lock();
            Ok(feed_ids
                .iter()
                .filter_map(|id| on_chain.get(id).map(|info| (*id, *info)))
                .collect())
        })
    }

    fn submit(&self, request: SubmitRequest) -> BoxFuture<'_, Result<TxHandle, SubmitError>> {
        Box::pin(async move {
            if request.is_empty() {
                return Err(SubmitError::permanent("empty update batch"));
            }
            if self.is_current(&request) {
                return Err(SubmitError::superseded("every feed already current on chain"));
            }

            let Some(cost) = self.batch_cost(&request) else {
                return Err(SubmitError::permanent(format!(
                    "update fee overflows at multiplier {}",
                    request.fee_multiplier
                )));
            };
            if *self.balance.lock() < cost {
                return Err(SubmitError::permanent(format!(
                    "insufficient funds: need {cost}"
                )));
            }

            let tx = TxHandle::new(format!(
                "sim-{}-{}",
                self.chain_id,
                self.next_tx.fetch_add(1, Ordering::SeqCst)
            ));
            self.pending.lock().insert(
                tx.id.clone(),
                PendingTx {
                    request,
                    cost,
                    lands_at: Instant::now() + self.confirmation_latency,
                },
            );
            Ok(tx)
        })
    }

    fn status<'a>(&'a self, tx: &'a TxHandle) -> BoxFuture<'a, Result<TxStatus, ChainError>> {
        Box::pin(async move {
            let landed = {
                let mut pending = self.pending.lock();
                let Some(lands_at) = pending.get(&tx.id).map(|p| p.lands_at) else {
                    return Ok(TxStatus::Failed(SubmitError::transient(format!(
                        "tx {tx} dropped"
                    ))));
                };
                if Instant::now() < lands_at {
                    return Ok(TxStatus::Pending);
                }
                pending.remove(&tx.id)
            };
            let Some(landed) = landed else {
                return Ok(TxStatus::Pending);
            };

            let applied = self.land(&landed.request);
            {
                let mut balance = self.balance.lock();
                *balance = balance
                    .checked_sub(landed.cost)
                    .unwrap_or(Decimal::ZERO)
                    .max(Decimal::ZERO);
            }
            debug!(chain = %self.chain_id, tx = %tx, applied, "Simulated update landed");
            Ok(TxStatus::Confirmed)
        })
    }

    fn balance(&self) -> BoxFuture<'_, Result<Option<Decimal>, ChainError>> {
        Box::pin(async move { Ok(Some(*self.balance.lock())) })
    }
}
