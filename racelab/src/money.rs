//!
//! Fixed-point money in whole cents.
//!
//! Balances are stored as integer cents so a withdraw/deposit round trip of
//! 14.95 restores 1000.00 exactly; any residue left after a run is a lost
//! update, never rounding noise.
//!

use std::fmt;
use std::ops::{Add, Mul, Sub};

use serde::{Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Rounds to the nearest cent. `None` for NaN, infinities and values
    /// that do not fit.
    pub fn from_f64(amount: f64) -> Option<Self> {
        if !amount.is_finite() {
            return None;
        }
        let cents = (amount * 100.0).round();
        if cents.abs() >= i64::MAX as f64 {
            return None;
        }
        Some(Self(cents as i64))
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / 100.0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let text = format!("{}{}.{:02}", sign, abs / 100, abs % 100);
        f.pad(&text)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Mul<i64> for Money {
    type Output = Money;

    fn mul(self, rhs: i64) -> Money {
        Money(self.0 * rhs)
    }
}

impl Serialize for Money {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.as_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_f64_rounds_to_cents() {
        assert_eq!(Money::from_f64(14.95), Some(Money::from_cents(1495)));
        assert_eq!(Money::from_f64(1000.0), Some(Money::from_cents(100_000)));
        assert_eq!(Money::from_f64(0.005), Some(Money::from_cents(1)));
        assert_eq!(Money::from_f64(f64::NAN), None);
        assert_eq!(Money::from_f64(f64::INFINITY), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(100_000).to_string(), "1000.00");
        assert_eq!(Money::from_cents(98_505).to_string(), "985.05");
        assert_eq!(Money::from_cents(-1495).to_string(), "-14.95");
        assert_eq!(Money::from_cents(7).to_string(), "0.07");
        assert_eq!(format!("{:>8}", Money::from_cents(1495)), "   14.95");
    }

    #[test]
    fn test_round_trip_is_exact() {
        let start = Money::from_cents(100_000);
        let fee = Money::from_f64(14.95).unwrap();
        assert_eq!(start - fee + fee, start);
        assert_eq!(start - fee * 2, Money::from_cents(97_010));
    }
}
