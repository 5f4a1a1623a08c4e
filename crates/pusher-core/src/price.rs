//! Price observations and exact human-scaled prices.
//!
//! Uses `rust_decimal` for exact decimal arithmetic, so comparisons between
//! observations with different exponents never go through floating point.

use crate::error::{CoreError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest scale `Decimal` can represent.
const MAX_SCALE: i32 = 28;

/// A single observation of a feed at a point in time.
///
/// Immutable once constructed. Human value = `price * 10^exponent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PriceInfo {
    pub price: i64,
    pub confidence: u64,
    pub exponent: i32,
    pub publish_time: i64,
}

impl PriceInfo {
    pub fn new(price: i64, confidence: u64, exponent: i32, publish_time: i64) -> Self {
        Self {
            price,
            confidence,
            exponent,
            publish_time,
        }
    }

    /// Exact human-scaled price.
    ///
    /// Fails only when the value is outside what `Decimal` can hold
    /// (exponent below -28 or a positive exponent that overflows).
    pub fn human_price(&self) -> Result<HumanPrice> {
        scale(self.price as i128, self.exponent).map(HumanPrice)
    }

    /// Human-scaled confidence interval.
    pub fn human_confidence(&self) -> Result<HumanPrice> {
        scale(self.confidence as i128, self.exponent).map(HumanPrice)
    }

    /// `confidence / |price| * 10000`.
    ///
    /// Both values share the exponent, so the ratio is taken on mantissas.
    /// Returns `None` for a zero price (the ratio is unbounded).
    pub fn confidence_ratio_bps(&self) -> Option<Decimal> {
        if self.price == 0 {
            return None;
        }
        let conf = Decimal::from(self.confidence);
        let price = Decimal::from(self.price.unsigned_abs());
        conf.checked_div(price)?.checked_mul(Decimal::from(10_000))
    }

    /// True if this observation is strictly newer than `other`.
    #[inline]
    pub fn is_newer_than(&self, other: &PriceInfo) -> bool {
        self.publish_time > other.publish_time
    }
}

fn scale(mantissa: i128, exponent: i32) -> Result<Decimal> {
    if exponent <= 0 {
        let scale = -exponent;
        if scale > MAX_SCALE {
            return Err(CoreError::PriceOutOfRange(format!(
                "exponent {exponent} below -{MAX_SCALE}"
            )));
        }
        Decimal::try_from_i128_with_scale(mantissa, scale as u32)
            .map_err(|e| CoreError::PriceOutOfRange(e.to_string()))
    } else {
        let mut value = Decimal::try_from_i128_with_scale(mantissa, 0)
            .map_err(|e| CoreError::PriceOutOfRange(e.to_string()))?;
        for _ in 0..exponent {
            value = value.checked_mul(Decimal::TEN).ok_or_else(|| {
                CoreError::PriceOutOfRange(format!("{mantissa}e{exponent} overflows"))
            })?;
        }
        Ok(value)
    }
}

/// Human-scaled price with exact decimal precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HumanPrice(pub Decimal);

impl HumanPrice {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Absolute deviation from a reference price in basis points.
    ///
    /// `|self - reference| / |reference| * 10000`. Returns `None` when the
    /// reference is zero or the result overflows.
    #[inline]
    pub fn deviation_bps(&self, reference: HumanPrice) -> Option<Decimal> {
        if reference.is_zero() {
            return None;
        }
        let diff = self.0.checked_sub(reference.0)?.abs();
        diff.checked_div(reference.0.abs())?
            .checked_mul(Decimal::from(10_000))
    }
}

impl fmt::Display for HumanPrice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl From<Decimal> for HumanPrice {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}
