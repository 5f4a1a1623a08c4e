//! Feed error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// No on-chain read succeeded during a refresh.
    #[error("Chain {chain} unreachable: {reason}")]
    ChainUnreachable { chain: String, reason: String },

    /// The off-chain subscription has been silent beyond its grace period.
    #[error("Feed cache stale: no price update for {silent_for_secs}s")]
    FeedCacheStale { silent_for_secs: u64 },
}

pub type FeedResult<T> = Result<T, FeedError>;
