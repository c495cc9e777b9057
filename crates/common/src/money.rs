//! Money represented in cents to avoid floating point issues.

use serde::{Deserialize, Serialize};

/// A monetary amount in cents (e.g., 1000 = $10.00).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money {
    cents: i64,
}

impl Money {
    /// Creates a new amount from cents.
    pub fn from_cents(cents: i64) -> Self {
        Self { cents }
    }

    /// Creates a new amount from whole dollars.
    pub fn from_dollars(dollars: i64) -> Self {
        Self {
            cents: dollars * 100,
        }
    }

    /// Returns zero money.
    pub fn zero() -> Self {
        Self { cents: 0 }
    }

    /// Returns the amount in cents.
    pub fn cents(&self) -> i64 {
        self.cents
    }

    /// Returns the whole-dollar portion.
    pub fn dollars(&self) -> i64 {
        self.cents / 100
    }

    /// Returns the cents portion after whole dollars.
    pub fn cents_part(&self) -> i64 {
        self.cents.abs() % 100
    }

    /// Returns true if the amount is zero.
    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    /// Returns true if the amount is negative.
    pub fn is_negative(&self) -> bool {
        self.cents < 0
    }
}

impl Default for Money {
    fn default() -> Self {
        Self::zero()
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.cents < 0 {
            write!(f, "-${}.{:02}", self.dollars().abs(), self.cents_part())
        } else {
            write!(f, "${}.{:02}", self.dollars(), self.cents_part())
        }
    }
}

impl std::ops::Add for Money {
    type Output = Money;

    fn add(self, rhs: Self) -> Self::Output {
        Money {
            cents: self.cents + rhs.cents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_cents_splits_dollars_and_cents() {
        let money = Money::from_cents(1234);
        assert_eq!(money.cents(), 1234);
        assert_eq!(money.dollars(), 12);
        assert_eq!(money.cents_part(), 34);
    }

    #[test]
    fn from_dollars() {
        assert_eq!(Money::from_dollars(100).cents(), 10_000);
    }

    #[test]
    fn display() {
        assert_eq!(Money::from_cents(1234).to_string(), "$12.34");
        assert_eq!(Money::from_cents(5).to_string(), "$0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-$12.34");
    }

    #[test]
    fn sign_checks() {
        assert!(Money::zero().is_zero());
        assert!(Money::from_cents(-1).is_negative());
        assert!(!Money::from_cents(1).is_negative());
    }

    #[test]
    fn add() {
        assert_eq!(
            Money::from_cents(1000) + Money::from_cents(500),
            Money::from_cents(1500)
        );
    }
}
