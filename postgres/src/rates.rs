//! Rate table in PostgreSQL.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ratebook_common::{Currency, CurrencyPair, RatebookError, Result};
use ratebook_fx::rate::{validate_rate, validate_spread};
use ratebook_fx::{ExchangeRate, RateSeed, RateStore};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

use crate::storage;

const RATE_COLUMNS: &str = "from_currency, to_currency, rate, spread, created_at, updated_at";

fn pair_not_found(pair: &CurrencyPair) -> RatebookError {
    RatebookError::NotFound(format!("exchange rate not found for {}", pair))
}

fn rate_from_row(row: &PgRow) -> Result<ExchangeRate> {
    let from: String = row.try_get("from_currency").map_err(storage)?;
    let to: String = row.try_get("to_currency").map_err(storage)?;
    let rate: Decimal = row.try_get("rate").map_err(storage)?;
    let spread: Decimal = row.try_get("spread").map_err(storage)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(storage)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(storage)?;

    Ok(ExchangeRate {
        pair: CurrencyPair::new(Currency::new(from), Currency::new(to)),
        rate,
        spread,
        created_at,
        updated_at,
    })
}

/// Rate store backed by the `exchange_rates` table.
///
/// Each write is a single-row `UPDATE`, atomic per record.
#[derive(Clone)]
pub struct PgRateStore {
    pool: PgPool,
}

impl PgRateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RateStore for PgRateStore {
    async fn get_all(&self) -> Result<HashMap<CurrencyPair, ExchangeRate>> {
        let rows = sqlx::query(&format!("SELECT {} FROM exchange_rates", RATE_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        rows.iter()
            .map(|row| rate_from_row(row).map(|rate| (rate.pair.clone(), rate)))
            .collect()
    }

    async fn get_pair(&self, pair: &CurrencyPair) -> Result<ExchangeRate> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM exchange_rates WHERE from_currency = $1 AND to_currency = $2",
            RATE_COLUMNS
        ))
        .bind(pair.from.code())
        .bind(pair.to.code())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        match row {
            Some(row) => rate_from_row(&row),
            None => Err(pair_not_found(pair)),
        }
    }

    async fn set_rate(&self, pair: &CurrencyPair, rate: Decimal) -> Result<ExchangeRate> {
        let rate = validate_rate(rate)?;
        let row = sqlx::query(&format!(
            "UPDATE exchange_rates SET rate = $3, updated_at = NOW() \
             WHERE from_currency = $1 AND to_currency = $2 RETURNING {}",
            RATE_COLUMNS
        ))
        .bind(pair.from.code())
        .bind(pair.to.code())
        .bind(rate)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        let record = row.as_ref().map(rate_from_row).transpose()?;
        let record = record.ok_or_else(|| pair_not_found(pair))?;
        debug!(pair = %pair, rate = %record.rate, "Rate replaced");
        Ok(record)
    }

    async fn replace_rate(&self, seen: &ExchangeRate, rate: Decimal) -> Result<Option<ExchangeRate>> {
        let rate = validate_rate(rate)?;
        let row = sqlx::query(&format!(
            "UPDATE exchange_rates SET rate = $3, updated_at = NOW() \
             WHERE from_currency = $1 AND to_currency = $2 \
               AND rate = $4 AND spread = $5 AND updated_at = $6 RETURNING {}",
            RATE_COLUMNS
        ))
        .bind(seen.pair.from.code())
        .bind(seen.pair.to.code())
        .bind(rate)
        .bind(seen.rate)
        .bind(seen.spread)
        .bind(seen.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        match row {
            Some(row) => rate_from_row(&row).map(Some),
            None => {
                // Distinguish a vanished pair from a concurrent write.
                self.get_pair(&seen.pair).await?;
                Ok(None)
            }
        }
    }

    async fn set_spread(&self, pair: &CurrencyPair, spread: Decimal) -> Result<ExchangeRate> {
        let spread = validate_spread(spread)?;
        let row = sqlx::query(&format!(
            "UPDATE exchange_rates SET spread = $3, updated_at = NOW() \
             WHERE from_currency = $1 AND to_currency = $2 RETURNING {}",
            RATE_COLUMNS
        ))
        .bind(pair.from.code())
        .bind(pair.to.code())
        .bind(spread)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        let record = row.as_ref().map(rate_from_row).transpose()?;
        record.ok_or_else(|| pair_not_found(pair))
    }

    async fn seed(&self, seeds: &[RateSeed]) -> Result<usize> {
        let records = seeds
            .iter()
            .map(RateSeed::to_rate)
            .collect::<Result<Vec<_>>>()?;

        let mut tx = self.pool.begin().await.map_err(storage)?;
        let mut inserted = 0;
        for record in &records {
            let result = sqlx::query(
                "INSERT INTO exchange_rates (from_currency, to_currency, rate, spread) \
                 VALUES ($1, $2, $3, $4) \
                 ON CONFLICT (from_currency, to_currency) DO NOTHING",
            )
            .bind(record.pair.from.code())
            .bind(record.pair.to.code())
            .bind(record.rate)
            .bind(record.spread)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
            inserted += result.rows_affected() as usize;
        }
        tx.commit().await.map_err(storage)?;

        info!(seeds = records.len(), inserted, "Exchange rates seeded");
        Ok(inserted)
    }
}
