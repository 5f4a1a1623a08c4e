//! Error types for pusher-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid feed id: {0}")]
    InvalidFeedId(String),

    #[error("Invalid chain id: {0}")]
    InvalidChainId(String),

    #[error("Price out of range: {0}")]
    PriceOutOfRange(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
