//! Fixed-point currency amounts.
//!
//! Amounts are held as integer cents so that sums never drift. Values cross
//! the boundary as `rust_decimal::Decimal` (CLI input, JSON) and are rounded
//! half away from zero to two places on the way in.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid amount: '{0}'")]
pub struct ParseMoneyError(String);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Largest difference accepted when comparing aggregated amounts
    /// (reconciliation difference, split allocations).
    pub const TOLERANCE: Money = Money(1);

    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Rounds to whole cents. Returns `None` when the value does not fit.
    pub fn from_decimal(value: Decimal) -> Option<Self> {
        let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        (rounded * Decimal::ONE_HUNDRED).to_i64().map(Money)
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::new(self.0, 2)
    }

    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn within_tolerance(self, other: Money) -> bool {
        self.0
            .checked_sub(other.0)
            .is_some_and(|d| d.unsigned_abs() <= Self::TOLERANCE.0.unsigned_abs())
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    /// `None` when the total does not fit in cents.
    pub fn checked_sum<I: IntoIterator<Item = Money>>(amounts: I) -> Option<Money> {
        amounts.into_iter().try_fold(Money::ZERO, Money::checked_add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl FromStr for Money {
    type Err = ParseMoneyError;

    /// Accepts `1234.56`, `1,234.56`, `$-10`, `-$10` and accounting-style `(12.00)`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let cleaned: String = raw
            .trim()
            .chars()
            .filter(|c| !matches!(c, ',' | '$' | ' '))
            .collect();
        let (negate, body) = match cleaned
            .strip_prefix('(')
            .and_then(|v| v.strip_suffix(')'))
        {
            Some(inner) => (true, inner.to_string()),
            None => (false, cleaned),
        };
        let value = Decimal::from_str(&body).map_err(|_| ParseMoneyError(raw.to_string()))?;
        let money = Money::from_decimal(value).ok_or_else(|| ParseMoneyError(raw.to_string()))?;
        Ok(if negate { -money } else { money })
    }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 += rhs.0;
    }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl SubAssign for Money {
    fn sub_assign(&mut self, rhs: Money) {
        self.0 -= rhs.0;
    }
}

impl Neg for Money {
    type Output = Money;
    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Money> for Money {
    fn sum<I: Iterator<Item = &'a Money>>(iter: I) -> Money {
        iter.copied().sum()
    }
}

impl ToSql for Money {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0))
    }
}

impl FromSql for Money {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        i64::column_result(value).map(Money)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_from_decimal_rounds_half_away_from_zero() {
        assert_eq!(Money::from_decimal(dec!(10.005)), Some(Money::from_cents(1001)));
        assert_eq!(Money::from_decimal(dec!(-10.005)), Some(Money::from_cents(-1001)));
        assert_eq!(Money::from_decimal(dec!(99.99)), Some(Money::from_cents(9999)));
    }

    #[test]
    fn test_parse_formats() {
        assert_eq!("1,234.56".parse::<Money>().unwrap(), Money::from_cents(123_456));
        assert_eq!("$-10".parse::<Money>().unwrap(), Money::from_cents(-1000));
        assert_eq!("-$10.50".parse::<Money>().unwrap(), Money::from_cents(-1050));
        assert_eq!("(12.00)".parse::<Money>().unwrap(), Money::from_cents(-1200));
        assert!("ten dollars".parse::<Money>().is_err());
    }

    #[test]
    fn test_display_keeps_two_places() {
        assert_eq!(Money::from_cents(-1000).to_string(), "-10.00");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
    }

    #[test]
    fn test_tolerance_is_one_cent() {
        let a = Money::from_cents(50_000);
        assert!(a.within_tolerance(Money::from_cents(50_001)));
        assert!(a.within_tolerance(Money::from_cents(49_999)));
        assert!(!a.within_tolerance(Money::from_cents(50_002)));
    }

    #[test]
    fn test_sum() {
        let total: Money = [Money::from_cents(100), Money::from_cents(-30)].iter().sum();
        assert_eq!(total, Money::from_cents(70));
    }

    #[test]
    fn test_checked_arithmetic_reports_overflow() {
        let max = Money::from_cents(i64::MAX);
        assert_eq!(Money::checked_sum([max, Money::from_cents(1)]), None);
        assert_eq!(Money::checked_sum([max, Money::from_cents(-1)]), Some(Money::from_cents(i64::MAX - 1)));
        assert_eq!(Money::from_cents(i64::MIN).checked_sub(Money::from_cents(1)), None);
        assert!(!max.within_tolerance(Money::from_cents(-1)));
    }
}
