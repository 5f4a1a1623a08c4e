//! Update decision engine.
//!
//! Decides whether a feed's on-chain value is stale enough to justify a
//! transaction. Everything here is a pure function of its inputs: no clock,
//! no I/O, no interior state.
//!
//! Rules, in order:
//! 1. Off-chain value not newer than the on-chain one -> skip.
//! 2. Staleness triggers: on-chain absent, time lag >= threshold, or human
//!    price deviation >= threshold. None fired -> skip.
//! 3. Confidence ratio >= threshold -> suppress (unless the policy ignores
//!    confidence, or the starvation override applies).
//!
//! Starvation is measured by the on-chain lag. A feed that was never
//! published has no lag, so the caller supplies how long it has been held
//! back instead (`evaluate_held`).

use crate::config::{CheckOrder, ConfidenceMode, DecisionPolicy};
use pusher_core::{PriceFeedConfig, PriceInfo};
use rust_decimal::Decimal;
use std::fmt;

/// Why a feed is being pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushReason {
    /// Feed was never published on this chain.
    NotOnChain,
    TimeDifference { lag_secs: i64 },
    PriceDeviation { deviation_bps: Decimal },
    /// Would have been suppressed for low confidence, but the on-chain value is too old.
    StarvationOverride { lag_secs: Option<i64> },
}

/// Why a feed is not being pushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Off-chain publish time is not after the on-chain one.
    NotNewer,
    WithinThresholds,
    /// Due, but the off-chain confidence interval is too wide. `None` = zero price.
    LowConfidence { ratio_bps: Option<Decimal> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Push(PushReason),
    Skip(SkipReason),
}

impl Decision {
    #[must_use]
    pub fn is_push(&self) -> bool {
        matches!(self, Decision::Push(_))
    }

    /// Stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Push(PushReason::NotOnChain) => "push_not_on_chain",
            Decision::Push(PushReason::TimeDifference { .. }) => "push_time",
            Decision::Push(PushReason::PriceDeviation { .. }) => "push_deviation",
            Decision::Push(PushReason::StarvationOverride { .. }) => "push_starvation",
            Decision::Skip(SkipReason::NotNewer) => "skip_not_newer",
            Decision::Skip(SkipReason::WithinThresholds) => "skip_fresh",
            Decision::Skip(SkipReason::LowConfidence { .. }) => "skip_low_confidence",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Push(PushReason::NotOnChain) => write!(f, "push: not on chain"),
            Decision::Push(PushReason::TimeDifference { lag_secs }) => {
                write!(f, "push: on-chain value {lag_secs}s behind")
            }
            Decision::Push(PushReason::PriceDeviation { deviation_bps }) => {
                write!(f, "push: price moved {}bps", deviation_bps.round_dp(2))
            }
            Decision::Push(PushReason::StarvationOverride { lag_secs }) => match lag_secs {
                Some(lag) => write!(f, "push: low confidence overridden after {lag}s"),
                None => write!(f, "push: low confidence overridden, not on chain"),
            },
            Decision::Skip(SkipReason::NotNewer) => write!(f, "skip: off-chain not newer"),
            Decision::Skip(SkipReason::WithinThresholds) => write!(f, "skip: within thresholds"),
            Decision::Skip(SkipReason::LowConfidence { ratio_bps }) => match ratio_bps {
                Some(r) => write!(f, "skip: confidence ratio {}bps", r.round_dp(2)),
                None => write!(f, "skip: zero price"),
            },
        }
    }
}

/// Evaluate one feed. Total: every input combination yields a decision.
pub fn evaluate(
    off_chain: &PriceInfo,
    on_chain: Option<&PriceInfo>,
    cfg: &PriceFeedConfig,
    policy: &DecisionPolicy,
) -> Decision {
    evaluate_held(off_chain, on_chain, cfg, policy, None)
}

/// `evaluate` for a feed that low confidence has kept off chain for
/// `held_secs`. Only consulted while the feed has no on-chain value.
pub fn evaluate_held(
    off_chain: &PriceInfo,
    on_chain: Option<&PriceInfo>,
    cfg: &PriceFeedConfig,
    policy: &DecisionPolicy,
    held_secs: Option<i64>,
) -> Decision {
    let lag_secs = on_chain.map(|on| off_chain.publish_time.saturating_sub(on.publish_time));

    if matches!(lag_secs, Some(lag) if lag <= 0) {
        return Decision::Skip(SkipReason::NotNewer);
    }

    let trigger = match on_chain {
        None => Some(PushReason::NotOnChain),
        Some(on) => {
            let by_time = || time_trigger(off_chain, on, cfg);
            let by_deviation = || deviation_trigger(off_chain, on, cfg);
            match policy.check_order {
                CheckOrder::TimeFirst => by_time().or_else(by_deviation),
                CheckOrder::DeviationFirst => by_deviation().or_else(by_time),
            }
        }
    };

    let Some(reason) = trigger else {
        return Decision::Skip(SkipReason::WithinThresholds);
    };

    if policy.confidence_mode == ConfidenceMode::Suppress {
        let ratio_bps = off_chain.confidence_ratio_bps();
        let too_uncertain = match ratio_bps {
            Some(ratio) => ratio >= Decimal::from(cfg.confidence_ratio_threshold_bps),
            None => true,
        };
        if too_uncertain {
            let starved_for = lag_secs.or(held_secs);
            return match policy.starvation_override_sec {
                Some(limit) if starved_for.is_some_and(|secs| secs >= i64::from(limit)) => {
                    Decision::Push(PushReason::StarvationOverride { lag_secs })
                }
                _ => Decision::Skip(SkipReason::LowConfidence { ratio_bps }),
            };
        }
    }

    Decision::Push(reason)
}

/// `evaluate(..).is_push()`.
pub fn should_push(
    off_chain: &PriceInfo,
    on_chain: Option<&PriceInfo>,
    cfg: &PriceFeedConfig,
    policy: &DecisionPolicy,
) -> bool {
    evaluate(off_chain, on_chain, cfg, policy).is_push()
}

fn time_trigger(off: &PriceInfo, on: &PriceInfo, cfg: &PriceFeedConfig) -> Option<PushReason> {
    let lag_secs = off.publish_time.saturating_sub(on.publish_time);
    (lag_secs >= i64::from(cfg.time_difference_threshold_sec))
        .then_some(PushReason::TimeDifference { lag_secs })
}

fn deviation_trigger(off: &PriceInfo, on: &PriceInfo, cfg: &PriceFeedConfig) -> Option<PushReason> {
    // Unrepresentable prices cannot be compared; the time check still applies.
    let (Ok(off_px), Ok(on_px)) = (off.human_price(), on.human_price()) else {
        return None;
    };

    let deviation_bps = match off_px.deviation_bps(on_px) {
        Some(bps) => bps,
        // Zero on-chain price: any non-zero value is an unbounded move.
        None if on_px.is_zero() && !off_px.is_zero() => Decimal::MAX,
        None => return None,
    };

    (deviation_bps >= Decimal::from(cfg.price_deviation_threshold_bps))
        .then_some(PushReason::PriceDeviation { deviation_bps })
}

/// Policy bound to a decision function, handed to each chain task.
#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    policy: DecisionPolicy,
}

impl DecisionEngine {
    pub fn new(policy: DecisionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &DecisionPolicy {
        &self.policy
    }

    pub fn evaluate(
        &self,
        off_chain: &PriceInfo,
        on_chain: Option<&PriceInfo>,
        cfg: &PriceFeedConfig,
    ) -> Decision {
        evaluate(off_chain, on_chain, cfg, &self.policy)
    }

    pub fn evaluate_held(
        &self,
        off_chain: &PriceInfo,
        on_chain: Option<&PriceInfo>,
        cfg: &PriceFeedConfig,
        held_secs: Option<i64>,
    ) -> Decision {
        evaluate_held(off_chain, on_chain, cfg, &self.policy, held_secs)
    }
}
