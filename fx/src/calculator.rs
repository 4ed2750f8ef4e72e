//! Spread-adjusted conversion quotes.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use ratebook_common::{round_amount, Currency, CurrencyPair, RatebookError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::rate::ExchangeRate;
use crate::store::RateStore;

/// Result of a conversion calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub pair: CurrencyPair,
    /// Amount the caller gives, as supplied.
    pub from_amount: Decimal,
    /// Amount the caller receives, 2 fractional digits.
    pub to_amount: Decimal,
    /// Spread-adjusted rate used for the conversion.
    pub exchange_rate: Decimal,
    /// Spread that was subtracted.
    pub spread: Decimal,
    /// Rate record timestamp the quote was priced against.
    pub rate_updated_at: DateTime<Utc>,
}

impl Quote {
    /// Price `amount` against a rate record.
    ///
    /// `to_amount = round(amount × rate × (1 − spread), 2)`, half away from zero.
    /// Fails with `InvalidArgument` when the product is not representable.
    pub fn price(rate: &ExchangeRate, amount: Decimal) -> Result<Self> {
        let adjusted = rate.adjusted_rate();
        let converted = amount.checked_mul(adjusted).ok_or_else(|| {
            RatebookError::InvalidArgument(format!(
                "amount {} is too large to convert at {}",
                amount, adjusted
            ))
        })?;

        Ok(Self {
            pair: rate.pair.clone(),
            from_amount: amount,
            to_amount: round_amount(converted),
            exchange_rate: adjusted,
            spread: rate.spread,
            rate_updated_at: rate.updated_at,
        })
    }
}

/// Computes conversions against the current rate table. Holds no state of its own.
#[derive(Clone)]
pub struct ExchangeCalculator {
    store: Arc<dyn RateStore>,
}

impl ExchangeCalculator {
    pub fn new(store: Arc<dyn RateStore>) -> Self {
        Self { store }
    }

    /// Quote converting `amount` of `from` into `to`.
    #[instrument(skip(self), fields(from = %from, to = %to))]
    pub async fn calculate(&self, from: &Currency, to: &Currency, amount: Decimal) -> Result<Quote> {
        if amount <= Decimal::ZERO {
            return Err(RatebookError::InvalidArgument(format!(
                "amount must be positive, got {}",
                amount
            )));
        }

        let pair = CurrencyPair::new(from.clone(), to.clone());
        let rate = self.store.get_pair(&pair).await?;

        Quote::price(&rate, amount)
    }
}
