//! Non-negative decimal amount of a material.

use core::fmt;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::value_object::ValueObject;

/// Number of decimal places amounts are kept at.
pub const QUANTITY_SCALE: u32 = 4;

/// Round a raw decimal to the ledger's precision.
pub fn round_amount(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(QUANTITY_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// A non-negative amount, rounded to four decimal places on construction.
///
/// Amounts are bounded by [`Quantity::MAX`] (the range of a `NUMERIC(20,4)`
/// column). Arithmetic between two `Quantity` values is exact and checked;
/// rounding only happens when a raw `Decimal` crosses into the domain.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Quantity(Decimal);

impl Quantity {
    pub const ZERO: Quantity = Quantity(Decimal::ZERO);

    /// 9999999999999999.9999
    pub const MAX: Quantity = Quantity(Decimal::from_parts(1_661_992_959, 1_808_227_885, 5, false, 4));

    pub fn new(value: Decimal) -> DomainResult<Self> {
        let rounded = round_amount(value);
        if rounded.is_sign_negative() && !rounded.is_zero() {
            return Err(DomainError::validation(format!(
                "amount must not be negative (got {value})"
            )));
        }
        Self::bounded(rounded)
    }

    /// Like [`Quantity::new`] but also rejects zero.
    pub fn positive(value: Decimal) -> DomainResult<Self> {
        let q = Self::new(value)?;
        if q.is_zero() {
            return Err(DomainError::validation(format!(
                "amount must be positive (got {value})"
            )));
        }
        Ok(q)
    }

    /// Whole units, clamped to [`Quantity::MAX`].
    pub fn from_units(units: u64) -> Self {
        Self(Decimal::from(units)).min(Self::MAX)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    fn bounded(value: Decimal) -> DomainResult<Self> {
        if value > Self::MAX.0 {
            return Err(DomainError::validation(format!(
                "amount {value} exceeds the ledger maximum {}",
                Self::MAX.0
            )));
        }
        Ok(Self(value.normalize()))
    }

    /// `self + other`; `Validation` when the sum leaves the ledger range.
    pub fn checked_add(self, other: Quantity) -> DomainResult<Quantity> {
        let sum = self.0.checked_add(other.0).ok_or_else(|| {
            DomainError::validation(format!("{self} + {other} overflows"))
        })?;
        Self::bounded(sum)
    }

    /// Sum of `items`, checked like [`Quantity::checked_add`].
    pub fn checked_sum(items: impl IntoIterator<Item = Quantity>) -> DomainResult<Quantity> {
        items
            .into_iter()
            .try_fold(Quantity::ZERO, |acc, q| acc.checked_add(q))
    }

    /// `self + other`, capped at [`Quantity::MAX`]. For tallies only.
    pub fn saturating_add(self, other: Quantity) -> Quantity {
        self.checked_add(other).unwrap_or(Self::MAX)
    }

    /// `self - other`, or `None` if the result would be negative.
    pub fn checked_sub(self, other: Quantity) -> Option<Quantity> {
        if other.0 > self.0 {
            None
        } else {
            Some(Self((self.0 - other.0).normalize()))
        }
    }

    pub fn min(self, other: Quantity) -> Quantity {
        if self <= other { self } else { other }
    }

    /// Apply a signed delta.
    ///
    /// `NegativeResult` if the result would drop below zero, `Validation` if
    /// it would leave the ledger range.
    pub fn apply_delta(self, delta: Decimal) -> DomainResult<Quantity> {
        let next = self.0.checked_add(delta).ok_or_else(|| {
            DomainError::validation(format!("{self} + {delta} overflows"))
        })?;
        if next.is_sign_negative() && !next.is_zero() {
            return Err(DomainError::negative_result(format!(
                "{self} + {delta} is below zero"
            )));
        }
        Self::bounded(next)
    }
}

impl TryFrom<Decimal> for Quantity {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for Decimal {
    fn from(value: Quantity) -> Self {
        value.0
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl ValueObject for Quantity {}
