//! Token amounts.
//!
//! Amounts are fixed-point integers (u128) to avoid floating-point errors.
//! The smallest unit is 1 raw.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// A balance or voting weight, in raw units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(u128);

impl Amount {
    pub const ZERO: Self = Self(0);
    pub const MAX: Self = Self(u128::MAX);

    pub const fn new(raw: u128) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    pub fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// `self * numerator / denominator`, computed without overflowing for
    /// any realistic supply.
    pub fn scaled(self, numerator: u128, denominator: u128) -> Self {
        if denominator == 0 {
            return Self::ZERO;
        }
        Self((self.0 / denominator) * numerator + (self.0 % denominator) * numerator / denominator)
    }
}

impl Add for Amount {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Amount {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for Amount {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl SubAssign for Amount {
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, a| acc + a)
    }
}

impl From<u128> for Amount {
    fn from(raw: u128) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} raw", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaled_matches_naive_math_for_small_values() {
        assert_eq!(Amount::new(1000).scaled(67, 100), Amount::new(670));
        assert_eq!(Amount::new(1001).scaled(67, 100), Amount::new(670));
        assert_eq!(Amount::new(5).scaled(1, 0), Amount::ZERO);
    }

    #[test]
    fn scaled_does_not_overflow_near_max() {
        let big = Amount::MAX.scaled(67, 100);
        assert!(big < Amount::MAX);
        assert!(big > Amount::MAX.scaled(66, 100));
    }

    #[test]
    fn sum_and_saturating_ops() {
        let total: Amount = [1u128, 2, 3].into_iter().map(Amount::new).sum();
        assert_eq!(total, Amount::new(6));
        assert_eq!(Amount::new(1).saturating_sub(Amount::new(2)), Amount::ZERO);
        assert_eq!(Amount::MAX.saturating_add(Amount::new(1)), Amount::MAX);
    }
}
