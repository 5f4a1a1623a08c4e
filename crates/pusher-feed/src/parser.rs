//! Conversion of price service payloads into domain types.

use crate::error::{FeedError, FeedResult};
use pusher_core::{FeedId, PriceInfo};
use pusher_ws::RpcPriceFeed;
use std::sync::atomic::{AtomicU64, Ordering};

/// Parse counters, exported as metrics by the ingest loop.
#[derive(Debug, Default)]
pub struct ParseStats {
    pub accepted: AtomicU64,
    pub rejected: AtomicU64,
}

impl ParseStats {
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }
}

/// Convert one `price_update` payload into `(FeedId, PriceInfo)`.
///
/// The EMA price is ignored; only the aggregate price is pushed.
pub fn parse_price_feed(feed: &RpcPriceFeed) -> FeedResult<(FeedId, PriceInfo)> {
    let id = FeedId::from_hex(&feed.id).map_err(|e| FeedError::ParseError(e.to_string()))?;

    let price: i64 = feed
        .price
        .price
        .parse()
        .map_err(|e| FeedError::ParseError(format!("price {:?}: {e}", feed.price.price)))?;
    let confidence: u64 = feed
        .price
        .conf
        .parse()
        .map_err(|e| FeedError::ParseError(format!("conf {:?}: {e}", feed.price.conf)))?;

    if feed.price.publish_time <= 0 {
        return Err(FeedError::InvalidData(format!(
            "feed {}: non-positive publish_time {}",
            id.short(),
            feed.price.publish_time
        )));
    }

    Ok((
        id,
        PriceInfo::new(price, confidence, feed.price.expo, feed.price.publish_time),
    ))
}
