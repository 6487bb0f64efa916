//! Value Objects for the storefront

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// SKU (Stock Keeping Unit) value object
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sku(String);

impl Sku {
    pub fn new(value: impl Into<String>) -> Result<Self, SkuError> {
        let value = value.into().trim().to_uppercase();
        if value.is_empty() { return Err(SkuError::Empty); }
        if value.len() > 50 { return Err(SkuError::TooLong); }
        if value.chars().any(char::is_whitespace) { return Err(SkuError::Whitespace); }
        Ok(Self(value))
    }
    pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for Sku {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl TryFrom<String> for Sku {
    type Error = SkuError;
    fn try_from(value: String) -> Result<Self, Self::Error> { Sku::new(value) }
}

impl From<Sku> for String {
    fn from(sku: Sku) -> Self { sku.0 }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SkuError {
    #[error("SKU empty")]
    Empty,
    #[error("SKU too long")]
    TooLong,
    #[error("SKU must not contain whitespace")]
    Whitespace,
}

/// Money value object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money { amount: Decimal, currency: String }

impl Money {
    pub fn new(amount: Decimal, currency: &str) -> Self { Self { amount, currency: currency.to_uppercase() } }
    pub fn usd(amount: Decimal) -> Self { Self::new(amount, "USD") }
    pub fn zero(currency: &str) -> Self { Self::new(Decimal::ZERO, currency) }
    pub fn amount(&self) -> Decimal { self.amount }
    pub fn currency(&self) -> &str { &self.currency }
    pub fn is_zero(&self) -> bool { self.amount.is_zero() }
    pub fn is_negative(&self) -> bool { self.amount.is_sign_negative() && !self.amount.is_zero() }

    pub fn add(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        Ok(Money::new(self.amount + other.amount, &self.currency))
    }

    pub fn sub(&self, other: &Money) -> Result<Money, MoneyError> {
        self.same_currency(other)?;
        Ok(Money::new(self.amount - other.amount, &self.currency))
    }

    pub fn multiply(&self, qty: u32) -> Money { Money::new(self.amount * Decimal::from(qty), &self.currency) }

    /// Multiplies by a rate (e.g. `0.075` for 7.5% tax), rounded to cents.
    pub fn scale(&self, rate: Decimal) -> Money {
        Money::new(
            (self.amount * rate).round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
            &self.currency,
        )
    }

    /// Amount in the currency's minor unit, as payment processors expect it.
    pub fn minor_units(&self) -> Result<i64, MoneyError> {
        self.amount.checked_mul(Decimal::ONE_HUNDRED).and_then(|cents| cents.round().to_i64()).ok_or(MoneyError::Overflow)
    }

    fn same_currency(&self, other: &Money) -> Result<(), MoneyError> {
        if self.currency != other.currency {
            return Err(MoneyError::CurrencyMismatch { left: self.currency.clone(), right: other.currency.clone() });
        }
        Ok(())
    }
}

impl Default for Money { fn default() -> Self { Self::zero("USD") } }

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{} {}", self.amount.round_dp(2), self.currency) }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MoneyError {
    #[error("Currency mismatch: {left} vs {right}")]
    CurrencyMismatch { left: String, right: String },
    #[error("Amount out of range")]
    Overflow,
}

/// URL-friendly identifier derived from a display name.
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    for c in value.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_sku() { let sku = Sku::new("prod-001").unwrap(); assert_eq!(sku.as_str(), "PROD-001"); }
    #[test]
    fn test_sku_rejects_blank_and_spaces() {
        assert_eq!(Sku::new("   "), Err(SkuError::Empty));
        assert_eq!(Sku::new("A B"), Err(SkuError::Whitespace));
    }
    #[test]
    fn test_money_add() {
        let a = Money::usd(Decimal::new(100, 0));
        let b = Money::usd(Decimal::new(50, 0));
        assert_eq!(a.add(&b).unwrap().amount(), Decimal::new(150, 0));
    }
    #[test]
    fn test_money_currency_mismatch() {
        let a = Money::usd(Decimal::ONE);
        let b = Money::new(Decimal::ONE, "eur");
        assert!(matches!(a.add(&b), Err(MoneyError::CurrencyMismatch { .. })));
    }
    #[test]
    fn test_money_scale_rounds_to_cents() {
        let m = Money::usd(Decimal::new(1999, 2));
        assert_eq!(m.scale(Decimal::new(75, 3)).amount(), Decimal::new(150, 2));
        assert_eq!(m.minor_units().unwrap(), 1999);
    }
    #[test]
    fn test_minor_units_overflow() {
        assert!(matches!(Money::usd(Decimal::MAX).minor_units(), Err(MoneyError::Overflow)));
        assert!(matches!(Money::usd(Decimal::from(i64::MAX)).minor_units(), Err(MoneyError::Overflow)));
    }
    #[test]
    fn test_slugify() {
        assert_eq!(slugify("  Summer Sale: 2024!  "), "summer-sale-2024");
    }
}
