//! Price state for the pusher.
//!
//! - `FeedCache`: latest off-chain price per feed (single writer, many readers)
//! - `FeedIngestor`: subscription handler writing into the cache
//! - `FeedHealthMonitor`: flags the cache stale when the subscription goes quiet
//! - `OnChainTracker`: timed on-chain reads through a chain adapter, one per chain

pub mod cache;
pub mod error;
pub mod health;
pub mod ingest;
pub mod parser;
pub mod tracker;

pub use cache::{CachedPrice, FeedCache, FeedCacheHandle};
pub use error::{FeedError, FeedResult};
pub use health::{FeedHealthMonitor, HealthTransition};
pub use ingest::FeedIngestor;
pub use parser::{parse_price_feed, ParseStats};
pub use tracker::{OnChainTracker, DEFAULT_READ_TIMEOUT};
