//! On-chain state reads.
//!
//! One instance per target chain, owned by that chain's task. Reads the
//! on-chain `PriceInfo` of each tracked feed through the chain adapter under
//! a read timeout. The tracker holds no values itself: the chain pusher keeps
//! the last known value per feed and merges reads monotonically, so a lagging
//! RPC node never moves a feed backwards.

use crate::error::{FeedError, FeedResult};
use pusher_core::{ChainId, DynChainAdapter, FeedId, PriceInfo};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Default timeout for a single refresh round-trip.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

pub struct OnChainTracker {
    chain_id: ChainId,
    adapter: DynChainAdapter,
    read_timeout: Duration,
}

impl OnChainTracker {
    pub fn new(adapter: DynChainAdapter, read_timeout: Duration) -> Self {
        Self {
            chain_id: adapter.chain_id().clone(),
            adapter,
            read_timeout,
        }
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Read the current on-chain values for `feed_ids`.
    ///
    /// Returns the values observed by this read, restricted to `feed_ids`.
    /// Feeds the adapter could not read are omitted. Fails with
    /// `ChainUnreachable` only when the read as a whole failed or timed out.
    pub async fn refresh(&self, feed_ids: &[FeedId]) -> FeedResult<HashMap<FeedId, PriceInfo>> {
        if feed_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let read = tokio::time::timeout(self.read_timeout, self.adapter.refresh(feed_ids)).await;
        let mut observed = match read {
            Ok(Ok(observed)) => observed,
            Ok(Err(e)) => {
                return Err(FeedError::ChainUnreachable {
                    chain: self.chain_id.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(FeedError::ChainUnreachable {
                    chain: self.chain_id.to_string(),
                    reason: format!("read timed out after {}ms", self.read_timeout.as_millis()),
                });
            }
        };

        let mut result = HashMap::with_capacity(feed_ids.len());
        for id in feed_ids {
            match observed.remove(id) {
                Some(info) => {
                    result.insert(*id, info);
                }
                None => {
                    debug!(chain = %self.chain_id, feed = %id.short(), "No on-chain value read");
                }
            }
        }
        Ok(result)
    }
}
