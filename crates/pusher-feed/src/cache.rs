//! Off-chain feed cache.
//!
//! Last-value cache of the latest off-chain `PriceInfo` per feed. Written by
//! the subscription handler, read by every chain task. Entries are created on
//! the first message, replaced in place, and never removed.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pusher_core::{FeedId, PriceInfo};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::trace;

/// Cached value plus local receipt time.
#[derive(Debug, Clone, Copy)]
pub struct CachedPrice {
    pub info: PriceInfo,
    pub received_at: DateTime<Utc>,
}

/// Shared handle to the feed cache.
pub type FeedCacheHandle = Arc<FeedCache>;

/// Latest off-chain price per feed.
///
/// Updates are monotonic in `publish_time`: an attestation that is not
/// strictly newer than the stored one is dropped. Each entry is replaced as a
/// whole under the shard lock, so readers never observe a partial value.
pub struct FeedCache {
    entries: DashMap<FeedId, CachedPrice>,
    /// Bumped on every accepted update.
    version: watch::Sender<u64>,
}

impl Default for FeedCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedCache {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            entries: DashMap::new(),
            version,
        }
    }

    #[must_use]
    pub fn new_shared() -> FeedCacheHandle {
        Arc::new(Self::new())
    }

    /// Store `info` if it is strictly newer than the cached value.
    ///
    /// Returns `true` if the cache changed.
    pub fn update(&self, feed_id: FeedId, info: PriceInfo) -> bool {
        let accepted = match self.entries.entry(feed_id) {
            Entry::Occupied(mut occupied) => {
                if info.is_newer_than(&occupied.get().info) {
                    occupied.insert(CachedPrice {
                        info,
                        received_at: Utc::now(),
                    });
                    true
                } else {
                    trace!(
                        feed = %feed_id.short(),
                        publish_time = info.publish_time,
                        cached = occupied.get().info.publish_time,
                        "Dropping stale attestation"
                    );
                    false
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CachedPrice {
                    info,
                    received_at: Utc::now(),
                });
                true
            }
        };

        if accepted {
            self.version.send_modify(|v| *v = v.wrapping_add(1));
        }
        accepted
    }

    /// Latest value for a feed.
    #[must_use]
    pub fn get(&self, feed_id: &FeedId) -> Option<PriceInfo> {
        self.entries.get(feed_id).map(|e| e.info)
    }

    /// Latest value with receipt time.
    #[must_use]
    pub fn get_entry(&self, feed_id: &FeedId) -> Option<CachedPrice> {
        self.entries.get(feed_id).map(|e| *e)
    }

    /// Latest values for the given feeds; feeds never seen are omitted.
    #[must_use]
    pub fn snapshot(&self, feed_ids: &[FeedId]) -> HashMap<FeedId, PriceInfo> {
        feed_ids
            .iter()
            .filter_map(|id| self.get(id).map(|info| (*id, info)))
            .collect()
    }

    /// Receiver that changes whenever a fresher value is stored.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Number of accepted updates so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
