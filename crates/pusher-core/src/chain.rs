//! Target chain identification and per-chain submission limits.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a destination chain (e.g., "ethereum", "arbitrum-sepolia").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChainId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One configured destination chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTarget {
    pub chain_id: ChainId,
    /// Maximum number of feeds per submitted transaction.
    pub max_batch_size: u32,
    /// How long a submitted transaction may stay pending before it is resubmitted.
    pub confirmation_timeout_sec: u32,
    /// Retries after the first attempt; a cycle makes at most `max_retries + 1` submissions.
    pub max_retries: u32,
}

impl ChainTarget {
    pub fn new(
        chain_id: impl Into<String>,
        max_batch_size: u32,
        confirmation_timeout_sec: u32,
        max_retries: u32,
    ) -> Self {
        Self {
            chain_id: ChainId::new(chain_id),
            max_batch_size,
            confirmation_timeout_sec,
            max_retries,
        }
    }

    /// Total submission attempts allowed per cycle.
    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn validate(&self) -> Result<()> {
        if self.chain_id.as_str().trim().is_empty() {
            return Err(CoreError::InvalidChainId("empty chain id".to_string()));
        }
        if self.max_batch_size == 0 {
            return Err(CoreError::InvalidConfig(format!(
                "chain {}: max_batch_size must be > 0",
                self.chain_id
            )));
        }
        if self.confirmation_timeout_sec == 0 {
            return Err(CoreError::InvalidConfig(format!(
                "chain {}: confirmation_timeout_sec must be > 0",
                self.chain_id
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_attempts() {
        assert_eq!(ChainTarget::new("eth", 10, 60, 3).max_attempts(), 4);
        assert_eq!(ChainTarget::new("eth", 10, 60, 0).max_attempts(), 1);
        assert_eq!(
            ChainTarget::new("eth", 10, 60, u32::MAX).max_attempts(),
            u32::MAX
        );
    }

    #[test]
    fn test_validate() {
        assert!(ChainTarget::new("eth", 10, 60, 3).validate().is_ok());
        assert!(ChainTarget::new("", 10, 60, 3).validate().is_err());
        assert!(ChainTarget::new("eth", 0, 60, 3).validate().is_err());
        assert!(ChainTarget::new("eth", 10, 0, 3).validate().is_err());
    }
}
