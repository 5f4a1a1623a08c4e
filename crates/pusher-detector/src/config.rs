//! Decision policy configuration.

use crate::error::{DetectorError, DetectorResult};
use serde::{Deserialize, Serialize};

/// What a high confidence ratio does to a push that is otherwise due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceMode {
    /// Never publish a value whose confidence ratio is at or above the threshold.
    #[default]
    Suppress,
    /// Confidence is not considered.
    Ignore,
}

/// Which staleness trigger is checked (and reported) first.
///
/// The push/no-push outcome does not depend on this; only the reported reason does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOrder {
    #[default]
    TimeFirst,
    DeviationFirst,
}

/// Policy knobs shared by every feed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DecisionPolicy {
    #[serde(default)]
    pub confidence_mode: ConfidenceMode,
    /// Let a suppressed push through once the on-chain value lags the
    /// off-chain one by at least this many seconds. `None` = never.
    #[serde(default)]
    pub starvation_override_sec: Option<u32>,
    #[serde(default)]
    pub check_order: CheckOrder,
}

impl DecisionPolicy {
    pub fn validate(&self) -> DetectorResult<()> {
        if self.starvation_override_sec == Some(0) {
            return Err(DetectorError::ConfigError(
                "starvation_override_sec must be > 0 (omit it to disable)".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = DecisionPolicy::default();
        assert_eq!(policy.confidence_mode, ConfidenceMode::Suppress);
        assert_eq!(policy.starvation_override_sec, None);
        assert_eq!(policy.check_order, CheckOrder::TimeFirst);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_policy_from_toml() {
        let policy: DecisionPolicy = toml::from_str(
            r#"
            confidence_mode = "ignore"
            starvation_override_sec = 3600
            check_order = "deviation_first"
            "#,
        )
        .unwrap();
        assert_eq!(policy.confidence_mode, ConfidenceMode::Ignore);
        assert_eq!(policy.starvation_override_sec, Some(3600));
        assert_eq!(policy.check_order, CheckOrder::DeviationFirst);
    }

    #[test]
    fn test_zero_starvation_override_rejected() {
        let policy = DecisionPolicy {
            starvation_override_sec: Some(0),
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }
}
