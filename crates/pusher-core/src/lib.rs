//! Core domain types for the price pusher.
//!
//! This crate provides the fundamental types shared by every other crate:
//! - `FeedId`: 32-byte price feed identifier
//! - `PriceInfo`: a single price observation (mantissa, confidence, exponent, publish time)
//! - `HumanPrice`: exact human-scaled price used for comparisons
//! - `PriceFeedConfig`, `ChainTarget`: immutable per-feed and per-chain settings
//! - `ChainAdapter`: the capability interface each target chain implements

pub mod adapter;
pub mod chain;
pub mod clock;
pub mod error;
pub mod feed;
pub mod price;

pub use adapter::{
    BoxFuture, ChainAdapter, ChainError, DynChainAdapter, SubmitError, SubmitErrorKind,
    SubmitRequest, TxHandle, TxStatus,
};
pub use chain::{ChainId, ChainTarget};
pub use clock::{Clock, SystemClock};
pub use error::{CoreError, Result};
pub use feed::{FeedId, PriceFeedConfig};
pub use price::{HumanPrice, PriceInfo};
