//! Fixed-precision money (spec §4.1).
//!
//! Every `Money` value is normalized to `SCALE` fractional digits with
//! half-even rounding as soon as it is constructed, so equality never has to
//! special-case trailing-zero representations the way raw `Decimal` does.
//! No floating-point arithmetic touches a monetary path; `to_f64_lossy` is
//! offered only for logging/observability, never for a money decision
//! (design note: "`balance` on User is a cache" applies equally here).

use crate::error::AppError;
use rust_decimal::prelude::*;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const SCALE: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    fn normalize(d: Decimal) -> Self {
        Money(d.round_dp_with_strategy(SCALE, RoundingStrategy::MidpointNearestEven))
    }

    /// Parse a decimal string, e.g. `"12.50000000"`. Fails on empty/malformed
    /// input with `InvalidAmount` per spec §4.1.
    pub fn of(input: &str) -> Result<Self, AppError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(AppError::InvalidAmount("amount string is empty".to_string()));
        }
        let decimal = Decimal::from_str(trimmed)
            .map_err(|e| AppError::InvalidAmount(format!("'{input}' is not a decimal: {e}")))?;
        Ok(Self::normalize(decimal))
    }

    pub fn from_i64(value: i64) -> Self {
        Self::normalize(Decimal::from(value))
    }

    pub fn from_f64_lossy(value: f64) -> Result<Self, AppError> {
        let decimal = Decimal::from_f64(value)
            .ok_or_else(|| AppError::InvalidAmount(format!("non-finite amount: {value}")))?;
        Ok(Self::normalize(decimal))
    }

    pub fn add(&self, other: &Money) -> Money {
        Self::normalize(self.0 + other.0)
    }

    pub fn subtract(&self, other: &Money) -> Money {
        Self::normalize(self.0 - other.0)
    }

    pub fn negate(&self) -> Money {
        Self::normalize(-self.0)
    }

    pub fn abs(&self) -> Money {
        Self::normalize(self.0.abs())
    }

    pub fn multiply_i64(&self, n: i64) -> Money {
        Self::normalize(self.0 * Decimal::from(n))
    }

    pub fn multiply_decimal(&self, d: Decimal) -> Money {
        Self::normalize(self.0 * d)
    }

    pub fn divide_i64(&self, n: i64) -> Result<Money, AppError> {
        if n == 0 {
            return Err(AppError::ArithmeticError("division by zero".to_string()));
        }
        Ok(Self::normalize(self.0 / Decimal::from(n)))
    }

    pub fn divide(&self, other: &Money) -> Result<Money, AppError> {
        if other.is_zero() {
            return Err(AppError::ArithmeticError("division by zero".to_string()));
        }
        Ok(Self::normalize(self.0 / other.0))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    pub fn inner(&self) -> Decimal {
        self.0
    }

    /// Observability-only conversion. Never use the result to branch on a
    /// money decision.
    pub fn to_f64_lossy(&self) -> f64 {
        self.0.to_f64().unwrap_or(f64::NAN)
    }

    /// Canonical plain-decimal string with exactly `SCALE` fractional digits
    /// (spec §6 money serialization).
    pub fn to_canonical_string(&self) -> String {
        format!("{:.*}", SCALE as usize, self.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rejects_empty_and_malformed() {
        assert!(matches!(Money::of(""), Err(AppError::InvalidAmount(_))));
        assert!(matches!(Money::of("   "), Err(AppError::InvalidAmount(_))));
        assert!(matches!(Money::of("not-a-number"), Err(AppError::InvalidAmount(_))));
    }

    #[test]
    fn division_by_zero_is_arithmetic_error() {
        let m = Money::of("10.00000000").unwrap();
        assert!(matches!(m.divide_i64(0), Err(AppError::ArithmeticError(_))));
        assert!(matches!(m.divide(&Money::ZERO), Err(AppError::ArithmeticError(_))));
    }

    #[test]
    fn equality_ignores_trailing_zero_representation() {
        let a = Money::of("5").unwrap();
        let b = Money::of("5.00000000").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn canonical_string_has_exactly_eight_fractional_digits() {
        let m = Money::of("3.1").unwrap();
        assert_eq!(m.to_canonical_string(), "3.10000000");
    }

    proptest! {
        // P1: Money closure under add/subtract and multiply/divide by an integer.
        #[test]
        fn add_then_subtract_is_identity(a in -1_000_000_000i64..1_000_000_000, b in -1_000_000i64..1_000_000) {
            let a = Money::from_i64(a);
            let b = Money::from_i64(b);
            prop_assert_eq!(a.add(&b).subtract(&b), a);
        }

        #[test]
        fn multiply_then_divide_by_same_integer_is_identity(a in -1_000_000i64..1_000_000, n in 1i64..1000) {
            let a = Money::from_i64(a);
            let roundtrip = a.multiply_i64(n).divide_i64(n).unwrap();
            // scale-8 rounding can introduce at most one ulp of drift
            let diff = roundtrip.subtract(&a).inner().abs();
            prop_assert!(diff <= Decimal::new(1, SCALE));
        }
    }
}
