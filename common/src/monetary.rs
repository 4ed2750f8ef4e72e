//! Monetary types and precision rules for Ratebook.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{RatebookError, Result};

/// Fractional digits kept for wallet and order amounts.
pub const AMOUNT_DECIMALS: u32 = 2;

/// Fractional digits kept for exchange rates.
pub const RATE_DECIMALS: u32 = 4;

/// Fractional digits kept for spreads.
pub const SPREAD_DECIMALS: u32 = 4;

/// Round an amount to 2 fractional digits, half away from zero.
pub fn round_amount(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(AMOUNT_DECIMALS, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a rate to 4 fractional digits, half away from zero.
pub fn round_rate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(RATE_DECIMALS, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a spread to 4 fractional digits, half away from zero.
pub fn round_spread(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(SPREAD_DECIMALS, RoundingStrategy::MidpointAwayFromZero)
}

/// Check that a value carries no more than 2 significant fractional digits.
pub fn fits_amount_precision(value: Decimal) -> bool {
    value.normalize().scale() <= AMOUNT_DECIMALS
}

/// Validate a caller supplied amount: strictly positive, at most 2 fractional digits.
pub fn ensure_amount(value: Decimal, field: &str) -> Result<Decimal> {
    if value <= Decimal::ZERO {
        return Err(RatebookError::InvalidArgument(format!(
            "{} must be positive, got {}",
            field, value
        )));
    }
    if !fits_amount_precision(value) {
        return Err(RatebookError::InvalidArgument(format!(
            "{} must have at most {} fractional digits, got {}",
            field, AMOUNT_DECIMALS, value
        )));
    }
    Ok(value)
}

/// ISO 4217 style currency code.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Currency(String);

impl Currency {
    /// Create a new currency from code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_uppercase())
    }

    /// Get the currency code.
    pub fn code(&self) -> &str {
        &self.0
    }

    /// Bangladeshi taka, one of the two seeded currencies.
    pub fn bdt() -> Self {
        Self::new("BDT")
    }

    /// Indian rupee, one of the two seeded currencies.
    pub fn inr() -> Self {
        Self::new("INR")
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Currency {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// An ordered currency pair identifying one exchange-rate record.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    /// Currency being converted from.
    pub from: Currency,
    /// Currency being converted to.
    pub to: Currency,
}

impl CurrencyPair {
    /// Create a new currency pair.
    pub fn new(from: Currency, to: Currency) -> Self {
        Self { from, to }
    }

    /// Get the inverse pair.
    pub fn inverse(&self) -> Self {
        Self {
            from: self.to.clone(),
            to: self.from.clone(),
        }
    }

    /// Check whether both legs are the same currency.
    pub fn is_degenerate(&self) -> bool {
        self.from == self.to
    }
}

impl fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.from, self.to)
    }
}

/// The configured set of supported currencies, in configuration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencySet(Vec<Currency>);

impl CurrencySet {
    /// Build a set, dropping duplicates while keeping first-seen order.
    pub fn new(currencies: impl IntoIterator<Item = Currency>) -> Self {
        let mut unique: Vec<Currency> = Vec::new();
        for currency in currencies {
            if !unique.contains(&currency) {
                unique.push(currency);
            }
        }
        Self(unique)
    }

    /// Check membership.
    pub fn contains(&self, currency: &Currency) -> bool {
        self.0.contains(currency)
    }

    /// Fail with `InvalidArgument` unless the currency is supported.
    pub fn ensure_supported(&self, currency: &Currency) -> Result<()> {
        if self.contains(currency) {
            Ok(())
        } else {
            Err(RatebookError::InvalidArgument(format!(
                "unsupported currency: {}",
                currency
            )))
        }
    }

    /// Iterate over the currencies.
    pub fn iter(&self) -> impl Iterator<Item = &Currency> {
        self.0.iter()
    }

    /// Get the currencies as a slice.
    pub fn as_slice(&self) -> &[Currency] {
        &self.0
    }

    /// Number of currencies.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the set is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for CurrencySet {
    fn default() -> Self {
        Self::new([Currency::bdt(), Currency::inr()])
    }
}
