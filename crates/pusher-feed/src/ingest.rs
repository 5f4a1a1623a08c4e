//! Subscription handler: the single writer of the feed cache.

use crate::cache::FeedCacheHandle;
use crate::health::FeedHealthMonitor;
use crate::parser::{parse_price_feed, ParseStats};
use pusher_core::FeedId;
use pusher_telemetry::Metrics;
use pusher_ws::RpcPriceFeed;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Applies parsed price updates to the feed cache.
pub struct FeedIngestor {
    cache: FeedCacheHandle,
    health: Arc<FeedHealthMonitor>,
    /// Tracked feeds and their aliases; updates for other ids are dropped.
    aliases: HashMap<FeedId, String>,
    stats: ParseStats,
}

impl FeedIngestor {
    pub fn new(
        cache: FeedCacheHandle,
        health: Arc<FeedHealthMonitor>,
        aliases: HashMap<FeedId, String>,
    ) -> Self {
        Self {
            cache,
            health,
            aliases,
            stats: ParseStats::default(),
        }
    }

    pub fn stats(&self) -> &ParseStats {
        &self.stats
    }

    /// Handle one payload. Returns `true` if the cache changed.
    pub fn apply(&self, feed: &RpcPriceFeed) -> bool {
        let (feed_id, info) = match parse_price_feed(feed) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Dropping malformed price update");
                self.stats.record_rejected();
                Metrics::feed_update_rejected("malformed");
                return false;
            }
        };

        let Some(alias) = self.aliases.get(&feed_id) else {
            debug!(feed = %feed_id.short(), "Dropping update for untracked feed");
            self.stats.record_rejected();
            Metrics::feed_update_rejected("untracked");
            return false;
        };

        self.stats.record_accepted();
        self.health.record_update();

        let changed = self.cache.update(feed_id, info);
        if changed {
            Metrics::off_chain_publish_time(alias, info.publish_time);
        }
        changed
    }

    /// Consume updates until the channel closes or shutdown is requested.
    pub async fn run(self, mut rx: mpsc::Receiver<RpcPriceFeed>, shutdown: CancellationToken) {
        info!(feeds = self.aliases.len(), "Feed ingestor started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(feed) => {
                        self.apply(&feed);
                    }
                    None => {
                        warn!("Price update channel closed");
                        break;
                    }
                },
            }
        }
        info!(
            accepted = self.stats.accepted(),
            rejected = self.stats.rejected(),
            "Feed ingestor stopped"
        );
    }
}
