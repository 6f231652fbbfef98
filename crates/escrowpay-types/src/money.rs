//! Money in integer minor units.
//!
//! Amounts never pass through binary floating point. Percentages applied to
//! an amount are computed in [`Decimal`] and rounded back to whole minor
//! units exactly once (see the split calculator).

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{EscrowPayError, Result};

/// A non-negative amount of currency minor units (1 RWF == 1 unit).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn new(minor_units: u64) -> Self {
        Self(minor_units)
    }

    #[must_use]
    pub const fn minor_units(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Addition that reports overflow instead of wrapping.
    pub fn checked_add(self, rhs: Self) -> Result<Self> {
        self.0
            .checked_add(rhs.0)
            .map(Self)
            .ok_or_else(|| EscrowPayError::Internal(format!("amount overflow: {self} + {rhs}")))
    }

    /// Subtraction that reports underflow instead of wrapping.
    pub fn checked_sub(self, rhs: Self) -> Result<Self> {
        self.0
            .checked_sub(rhs.0)
            .map(Self)
            .ok_or_else(|| EscrowPayError::Internal(format!("amount underflow: {self} - {rhs}")))
    }

    #[must_use]
    pub fn to_decimal(self) -> Decimal {
        Decimal::from(self.0)
    }

    /// Convert a whole, non-negative decimal back into minor units.
    pub fn from_decimal(value: Decimal) -> Result<Self> {
        if value.is_sign_negative() || !value.fract().is_zero() {
            return Err(EscrowPayError::Validation {
                reason: format!("{value} is not a whole non-negative number of minor units"),
            });
        }
        u64::try_from(value)
            .map(Self)
            .map_err(|_| EscrowPayError::Validation {
                reason: format!("{value} does not fit in an amount"),
            })
    }

    /// Sum a sequence of amounts, failing on overflow.
    pub fn sum<I: IntoIterator<Item = Self>>(amounts: I) -> Result<Self> {
        amounts
            .into_iter()
            .try_fold(Self::ZERO, Self::checked_add)
    }
}

impl From<u64> for Amount {
    fn from(minor_units: u64) -> Self {
        Self(minor_units)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
