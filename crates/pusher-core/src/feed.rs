//! Price feed identification and per-feed thresholds.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 32-byte price feed identifier.
///
/// Rendered as 64 lowercase hex characters without prefix, which is the form
/// the price service uses on the wire. Parsing accepts an optional `0x`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedId([u8; 32]);

impl FeedId {
    pub const LEN: usize = 32;

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parse from hex, with or without a `0x` prefix.
    pub fn from_hex(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.len() != Self::LEN * 2 {
            return Err(CoreError::InvalidFeedId(format!(
                "expected {} hex chars, got {}: {s}",
                Self::LEN * 2,
                digits.len()
            )));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|e| CoreError::InvalidFeedId(format!("{e}: {s}")))?;
        Ok(Self(bytes))
    }

    /// Hex form with `0x` prefix, as expected by EVM-style contracts.
    pub fn to_prefixed_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// First four bytes in hex, for compact log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedId({})", self.short())
    }
}

impl FromStr for FeedId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl Serialize for FeedId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FeedId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Per-feed update thresholds.
///
/// Loaded once at startup and immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceFeedConfig {
    /// Feed identifier.
    #[serde(rename = "id")]
    pub feed_id: FeedId,
    /// Human-readable name used in logs and metrics (e.g., "BTC/USD").
    pub alias: String,
    /// Push when the on-chain value lags the off-chain one by at least this many seconds.
    #[serde(rename = "time_difference_sec")]
    pub time_difference_threshold_sec: u32,
    /// Push when the human price drifted by at least this many basis points.
    #[serde(rename = "price_deviation_bps")]
    pub price_deviation_threshold_bps: u32,
    /// Treat the off-chain value as too uncertain at or above this confidence ratio.
    #[serde(rename = "confidence_ratio_bps")]
    pub confidence_ratio_threshold_bps: u32,
}

impl PriceFeedConfig {
    pub fn validate(&self) -> Result<()> {
        if self.alias.trim().is_empty() {
            return Err(CoreError::InvalidConfig(format!(
                "feed {} has an empty alias",
                self.feed_id
            )));
        }
        if self.price_deviation_threshold_bps == 0 {
            return Err(CoreError::InvalidConfig(format!(
                "feed {}: price_deviation_bps must be > 0",
                self.alias
            )));
        }
        if self.confidence_ratio_threshold_bps == 0 {
            return Err(CoreError::InvalidConfig(format!(
                "feed {}: confidence_ratio_bps must be > 0",
                self.alias
            )));
        }
        Ok(())
    }
}
