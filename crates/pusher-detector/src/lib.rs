//! Update decision engine for the price pusher.
//!
//! Given the latest off-chain value, the last observed on-chain value and
//! per-feed thresholds, decides whether a feed needs pushing.

pub mod config;
pub mod decision;
pub mod error;

pub use config::{CheckOrder, ConfidenceMode, DecisionPolicy};
pub use decision::{evaluate, evaluate_held, should_push, Decision, DecisionEngine, PushReason, SkipReason};
pub use error::{DetectorError, DetectorResult};
