//! Fixed-point helpers for currency amounts and pricing factors.
//!
//! Amounts are carried as minor-unit integers. Factor math happens in
//! [`Decimal`] and is rounded back to minor units exactly once, at the end of a
//! computation.

use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

const MINOR_UNITS_PER_MAJOR: i64 = 100;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor_units: i64) -> Self {
        Self(minor_units)
    }

    pub fn from_major(major_units: i64) -> Self {
        Self(major_units.saturating_mul(MINOR_UNITS_PER_MAJOR))
    }

    pub const fn minor_units(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Amount in minor units as a decimal, ready for factor multiplication.
    pub fn as_minor_decimal(self) -> Decimal {
        Decimal::from(self.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

/// Rounds a minor-unit decimal half-up to the nearest whole minor unit.
pub fn round_half_up(minor_units: Decimal) -> Result<Money, DomainError> {
    minor_units
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .map(Money)
        .ok_or_else(|| {
            DomainError::InvariantViolation(format!(
                "amount {minor_units} does not fit in minor currency units"
            ))
        })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Factor(Decimal);

impl Factor {
    pub const ONE: Factor = Factor(Decimal::ONE);

    pub const fn new(value: Decimal) -> Self {
        Self(value)
    }

    /// `Factor::from_parts(15, 1)` is `1.5`.
    pub fn from_parts(mantissa: i64, scale: u32) -> Self {
        Self(Decimal::new(mantissa, scale))
    }

    pub const fn value(self) -> Decimal {
        self.0
    }
}

impl Default for Factor {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

/// Inclusive range every pricing factor must fall within.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactorBounds {
    pub min: Decimal,
    pub max: Decimal,
}

impl FactorBounds {
    pub fn new(min: Decimal, max: Decimal) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, factor: Factor) -> bool {
        factor.value() >= self.min && factor.value() <= self.max
    }

    pub fn check(&self, name: &str, factor: Factor) -> Result<Factor, DomainError> {
        if self.contains(factor) {
            return Ok(factor);
        }

        Err(DomainError::InvalidFactorRange {
            factor: name.to_string(),
            value: factor.value(),
            min: self.min,
            max: self.max,
        })
    }
}

impl Default for FactorBounds {
    fn default() -> Self {
        Self { min: Decimal::new(5, 1), max: Decimal::new(30, 1) }
    }
}
