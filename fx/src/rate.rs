//! Exchange-rate records and validation.

use chrono::{DateTime, Utc};
use ratebook_common::{round_rate, round_spread, Currency, CurrencyPair, RatebookError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Spread applied to newly seeded pairs (2%).
pub fn default_spread() -> Decimal {
    Decimal::new(2, 2)
}

/// One exchange-rate record. Exactly one exists per ordered pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate {
    /// The ordered pair this record prices.
    pub pair: CurrencyPair,
    /// Raw rate, 4 fractional digits, always positive.
    pub rate: Decimal,
    /// Fractional margin in [0, 1), 4 fractional digits.
    pub spread: Decimal,
    /// When the pair was first seeded.
    pub created_at: DateTime<Utc>,
    /// When rate or spread last changed.
    pub updated_at: DateTime<Utc>,
}

impl ExchangeRate {
    /// Create a validated record stamped with the current time.
    pub fn new(pair: CurrencyPair, rate: Decimal, spread: Decimal) -> Result<Self> {
        if pair.is_degenerate() {
            return Err(RatebookError::InvalidArgument(format!(
                "pair {} converts a currency into itself",
                pair
            )));
        }

        let now = Utc::now();
        Ok(Self {
            pair,
            rate: validate_rate(rate)?,
            spread: validate_spread(spread)?,
            created_at: now,
            updated_at: now,
        })
    }

    /// Rate after subtracting the spread: `rate × (1 − spread)`.
    pub fn adjusted_rate(&self) -> Decimal {
        self.rate * (Decimal::ONE - self.spread)
    }
}

/// Normalise a rate to 4 fractional digits, rejecting anything not positive.
pub fn validate_rate(rate: Decimal) -> Result<Decimal> {
    let rounded = round_rate(rate);
    if rounded <= Decimal::ZERO {
        return Err(RatebookError::InvalidArgument(format!(
            "rate must be positive, got {}",
            rate
        )));
    }
    Ok(rounded)
}

/// Normalise a spread to 4 fractional digits, requiring `0 <= spread < 1`.
pub fn validate_spread(spread: Decimal) -> Result<Decimal> {
    let rounded = round_spread(spread);
    if rounded < Decimal::ZERO || rounded >= Decimal::ONE {
        return Err(RatebookError::InvalidArgument(format!(
            "spread must be in [0, 1), got {}",
            spread
        )));
    }
    Ok(rounded)
}

/// A pair to create on first initialisation, if absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateSeed {
    pub pair: CurrencyPair,
    pub rate: Decimal,
    pub spread: Decimal,
}

impl RateSeed {
    /// Create a seed with the default spread.
    pub fn new(from: Currency, to: Currency, rate: Decimal) -> Self {
        Self {
            pair: CurrencyPair::new(from, to),
            rate,
            spread: default_spread(),
        }
    }

    /// Override the spread.
    pub fn with_spread(mut self, spread: Decimal) -> Self {
        self.spread = spread;
        self
    }

    /// The two seeded pairs: BDT→INR at 0.70 and INR→BDT at 1.43.
    pub fn defaults() -> Vec<RateSeed> {
        vec![
            RateSeed::new(Currency::bdt(), Currency::inr(), Decimal::new(70, 2)),
            RateSeed::new(Currency::inr(), Currency::bdt(), Decimal::new(143, 2)),
        ]
    }

    /// Build the record this seed describes.
    pub fn to_rate(&self) -> Result<ExchangeRate> {
        ExchangeRate::new(self.pair.clone(), self.rate, self.spread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_adjusted_rate() {
        let rate = ExchangeRate::new(
            CurrencyPair::new(Currency::bdt(), Currency::inr()),
            dec!(0.70),
            dec!(0.02),
        )
        .unwrap();

        assert_eq!(rate.adjusted_rate(), dec!(0.686));
    }

    #[test]
    fn test_rate_validation() {
        assert_eq!(validate_rate(dec!(0.700049)).unwrap(), dec!(0.7000));
        assert!(validate_rate(dec!(0)).is_err());
        assert!(validate_rate(dec!(-1.2)).is_err());
        // Rounds to zero at 4 digits
        assert!(validate_rate(dec!(0.00001)).is_err());
    }

    #[test]
    fn test_spread_validation() {
        assert_eq!(validate_spread(dec!(0)).unwrap(), dec!(0));
        assert_eq!(validate_spread(dec!(0.02)).unwrap(), dec!(0.02));
        assert!(validate_spread(dec!(1)).is_err());
        assert!(validate_spread(dec!(-0.01)).is_err());
    }

    #[test]
    fn test_degenerate_pair_rejected() {
        let result = ExchangeRate::new(
            CurrencyPair::new(Currency::bdt(), Currency::bdt()),
            dec!(1),
            dec!(0.02),
        );
        assert!(matches!(result, Err(RatebookError::InvalidArgument(_))));
    }

    #[test]
    fn test_default_seeds() {
        let seeds = RateSeed::defaults();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].spread, dec!(0.02));
        assert_eq!(seeds[1].pair, seeds[0].pair.inverse());
    }
}
