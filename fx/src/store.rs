//! Rate storage abstraction and the in-memory table.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use ratebook_common::{CurrencyPair, RatebookError, Result};
use rust_decimal::Decimal;
use tracing::debug;

use crate::rate::{validate_rate, validate_spread, ExchangeRate, RateSeed};

/// Guarded mapping of ordered pair to exchange-rate record.
///
/// Writes are atomic per record: a reader never observes a rate paired with
/// the timestamp of a different write.
#[async_trait]
pub trait RateStore: Send + Sync {
    /// Snapshot every pair. Each record is internally consistent.
    async fn get_all(&self) -> Result<HashMap<CurrencyPair, ExchangeRate>>;

    /// Get one pair, `NotFound` if it was never seeded.
    async fn get_pair(&self, pair: &CurrencyPair) -> Result<ExchangeRate>;

    /// Replace the rate of an existing pair and bump its `updated_at`.
    async fn set_rate(&self, pair: &CurrencyPair, rate: Decimal) -> Result<ExchangeRate>;

    /// Replace the rate only if the stored record still equals `seen`.
    ///
    /// Returns `None` when another write landed since `seen` was read.
    async fn replace_rate(&self, seen: &ExchangeRate, rate: Decimal) -> Result<Option<ExchangeRate>>;

    /// Replace the spread of an existing pair and bump its `updated_at`.
    async fn set_spread(&self, pair: &CurrencyPair, spread: Decimal) -> Result<ExchangeRate>;

    /// Insert seeds whose pair is absent. Returns how many were inserted.
    async fn seed(&self, seeds: &[RateSeed]) -> Result<usize>;
}

/// Shared rate store.
pub type SharedRateStore = Arc<dyn RateStore>;

pub(crate) fn pair_not_found(pair: &CurrencyPair) -> RatebookError {
    RatebookError::NotFound(format!("exchange rate not found for {}", pair))
}

/// Rate table held in process memory.
pub struct MemoryRateStore {
    rates: DashMap<CurrencyPair, ExchangeRate>,
}

impl MemoryRateStore {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            rates: DashMap::new(),
        }
    }

    /// Number of pairs in the table.
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}

impl Default for MemoryRateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RateStore for MemoryRateStore {
    async fn get_all(&self) -> Result<HashMap<CurrencyPair, ExchangeRate>> {
        Ok(self
            .rates
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    async fn get_pair(&self, pair: &CurrencyPair) -> Result<ExchangeRate> {
        self.rates
            .get(pair)
            .map(|r| r.clone())
            .ok_or_else(|| pair_not_found(pair))
    }

    async fn set_rate(&self, pair: &CurrencyPair, rate: Decimal) -> Result<ExchangeRate> {
        let rate = validate_rate(rate)?;
        let mut record = self
            .rates
            .get_mut(pair)
            .ok_or_else(|| pair_not_found(pair))?;

        record.rate = rate;
        record.updated_at = Utc::now();
        debug!(pair = %pair, rate = %rate, "Rate replaced");

        Ok(record.clone())
    }

    async fn replace_rate(&self, seen: &ExchangeRate, rate: Decimal) -> Result<Option<ExchangeRate>> {
        let rate = validate_rate(rate)?;
        let mut record = self
            .rates
            .get_mut(&seen.pair)
            .ok_or_else(|| pair_not_found(&seen.pair))?;

        if *record != *seen {
            return Ok(None);
        }
        record.rate = rate;
        record.updated_at = Utc::now();

        Ok(Some(record.clone()))
    }

    async fn set_spread(&self, pair: &CurrencyPair, spread: Decimal) -> Result<ExchangeRate> {
        let spread = validate_spread(spread)?;
        let mut record = self
            .rates
            .get_mut(pair)
            .ok_or_else(|| pair_not_found(pair))?;

        record.spread = spread;
        record.updated_at = Utc::now();
        debug!(pair = %pair, spread = %spread, "Spread replaced");

        Ok(record.clone())
    }

    async fn seed(&self, seeds: &[RateSeed]) -> Result<usize> {
        // Validate everything first so a bad seed inserts nothing.
        let records = seeds
            .iter()
            .map(RateSeed::to_rate)
            .collect::<Result<Vec<_>>>()?;

        let mut inserted = 0;
        for record in records {
            self.rates.entry(record.pair.clone()).or_insert_with(|| {
                inserted += 1;
                record
            });
        }

        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratebook_common::Currency;
    use rust_decimal_macros::dec;

    fn bdt_inr() -> CurrencyPair {
        CurrencyPair::new(Currency::bdt(), Currency::inr())
    }

    async fn seeded_store() -> MemoryRateStore {
        let store = MemoryRateStore::new();
        store.seed(&RateSeed::defaults()).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_seed_is_idempotent() {
        let store = seeded_store().await;
        assert_eq!(store.len(), 2);

        store.set_rate(&bdt_inr(), dec!(0.71)).await.unwrap();

        // Re-seeding must not overwrite existing records
        let inserted = store.seed(&RateSeed::defaults()).await.unwrap();
        assert_eq!(inserted, 0);
        assert_eq!(store.get_pair(&bdt_inr()).await.unwrap().rate, dec!(0.71));
    }

    #[tokio::test]
    async fn test_get_pair_not_found() {
        let store = seeded_store().await;
        let pair = CurrencyPair::new(Currency::new("USD"), Currency::bdt());

        let result = store.get_pair(&pair).await;

        assert!(matches!(result, Err(RatebookError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_set_rate_updates_timestamp() {
        let store = seeded_store().await;
        let before = store.get_pair(&bdt_inr()).await.unwrap();

        let after = store.set_rate(&bdt_inr(), dec!(0.7123)).await.unwrap();

        assert_eq!(after.rate, dec!(0.7123));
        assert_eq!(after.spread, before.spread);
        assert!(after.updated_at >= before.updated_at);
        assert_eq!(after.created_at, before.created_at);
    }

    #[tokio::test]
    async fn test_set_rate_rejects_non_positive() {
        let store = seeded_store().await;

        assert!(matches!(
            store.set_rate(&bdt_inr(), dec!(0)).await,
            Err(RatebookError::InvalidArgument(_))
        ));
        assert!(matches!(
            store.set_rate(&bdt_inr(), dec!(-0.5)).await,
            Err(RatebookError::InvalidArgument(_))
        ));
        assert_eq!(store.get_pair(&bdt_inr()).await.unwrap().rate, dec!(0.70));
    }

    #[tokio::test]
    async fn test_replace_rate_requires_unchanged_record() {
        let store = seeded_store().await;
        let seen = store.get_pair(&bdt_inr()).await.unwrap();

        store.set_rate(&bdt_inr(), dec!(0.80)).await.unwrap();
        assert_eq!(store.replace_rate(&seen, dec!(0.7035)).await.unwrap(), None);
        assert_eq!(store.get_pair(&bdt_inr()).await.unwrap().rate, dec!(0.80));

        let current = store.get_pair(&bdt_inr()).await.unwrap();
        let replaced = store.replace_rate(&current, dec!(0.8040)).await.unwrap();
        assert_eq!(replaced.map(|r| r.rate), Some(dec!(0.8040)));
    }

    #[tokio::test]
    async fn test_set_rate_unknown_pair_does_not_fabricate() {
        let store = seeded_store().await;
        let pair = CurrencyPair::new(Currency::new("USD"), Currency::new("EUR"));

        assert!(matches!(
            store.set_rate(&pair, dec!(0.9)).await,
            Err(RatebookError::NotFound(_))
        ));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_bad_seed_inserts_nothing() {
        let store = MemoryRateStore::new();
        let seeds = vec![
            RateSeed::new(Currency::bdt(), Currency::inr(), dec!(0.70)),
            RateSeed::new(Currency::inr(), Currency::bdt(), dec!(0)),
        ];

        assert!(store.seed(&seeds).await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_see_whole_records() {
        let store = Arc::new(seeded_store().await);
        let pair = bdt_inr();

        let writer = {
            let store = store.clone();
            let pair = pair.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    let rate = dec!(0.7000) + Decimal::new(i, 4);
                    store.set_rate(&pair, rate).await.unwrap();
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            readers.push(tokio::spawn(async move {
                for _ in 0..200 {
                    let all = store.get_all().await.unwrap();
                    for record in all.values() {
                        assert!(record.rate > Decimal::ZERO);
                        assert!(record.updated_at >= record.created_at);
                    }
                }
            }));
        }

        writer.await.unwrap();
        for reader in readers {
            reader.await.unwrap();
        }

        assert_eq!(store.get_pair(&pair).await.unwrap().rate, dec!(0.7199));
    }
}
