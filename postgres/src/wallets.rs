//! Wallets and their ledger in PostgreSQL.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ratebook_common::{
    Currency, CurrencySet, LedgerEntryId, Page, RatebookError, Result, UserId, WalletId,
};
use ratebook_ledger::{BalanceMutation, Wallet, WalletLedgerEntry, WalletStore};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, PgPool, Row};

use crate::storage;

const ENTRY_COLUMNS: &str =
    "id, wallet_id, entry_type, currency, amount, balance_after, description, created_at";

/// Ledger rows are numbered under the wallet's row lock, so `id` is commit
/// order per wallet. `created_at` is stamped at insert time for the same reason.
fn insert_entry_sql() -> String {
    format!(
        "INSERT INTO wallet_transactions \
         (wallet_id, entry_type, currency, amount, balance_after, description, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, clock_timestamp()) RETURNING {}",
        ENTRY_COLUMNS
    )
}

fn history_sql() -> String {
    format!(
        "SELECT {} FROM wallet_transactions WHERE wallet_id = $1 \
         ORDER BY id DESC LIMIT $2 OFFSET $3",
        ENTRY_COLUMNS
    )
}

fn wallet_not_found(user_id: UserId) -> RatebookError {
    RatebookError::NotFound(format!("wallet not found for user {}", user_id))
}

fn entry_from_row(row: &PgRow) -> Result<WalletLedgerEntry> {
    let entry_type: String = row.try_get("entry_type").map_err(storage)?;
    let currency: String = row.try_get("currency").map_err(storage)?;

    Ok(WalletLedgerEntry {
        id: LedgerEntryId::new(row.try_get("id").map_err(storage)?),
        wallet_id: WalletId::new(row.try_get("wallet_id").map_err(storage)?),
        entry_type: entry_type
            .parse()
            .map_err(|e: RatebookError| RatebookError::StorageFailure(e.to_string()))?,
        currency: Currency::new(currency),
        amount: row.try_get("amount").map_err(storage)?,
        balance_after: row.try_get("balance_after").map_err(storage)?,
        description: row.try_get("description").map_err(storage)?,
        created_at: row.try_get("created_at").map_err(storage)?,
    })
}

/// Wallet store backed by `wallets`, `wallet_balances` and `wallet_transactions`.
///
/// Every mutation runs in one database transaction that first takes a row
/// lock on the wallet, so mutations on one wallet are serialized while other
/// wallets proceed in parallel.
#[derive(Clone)]
pub struct PgWalletStore {
    pool: PgPool,
}

impl PgWalletStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn wallet_id(&self, user_id: UserId) -> Result<WalletId> {
        let id: Option<i64> = sqlx::query_scalar("SELECT id FROM wallets WHERE user_id = $1")
            .bind(user_id.value())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;
        id.map(WalletId::new).ok_or_else(|| wallet_not_found(user_id))
    }

    async fn load_wallet(conn: &mut PgConnection, user_id: UserId) -> Result<Wallet> {
        let row = sqlx::query("SELECT id, created_at, updated_at FROM wallets WHERE user_id = $1")
            .bind(user_id.value())
            .fetch_optional(&mut *conn)
            .await
            .map_err(storage)?
            .ok_or_else(|| wallet_not_found(user_id))?;

        let id: i64 = row.try_get("id").map_err(storage)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(storage)?;
        let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(storage)?;

        let rows = sqlx::query("SELECT currency, balance FROM wallet_balances WHERE wallet_id = $1")
            .bind(id)
            .fetch_all(&mut *conn)
            .await
            .map_err(storage)?;

        let mut balances = BTreeMap::new();
        for row in rows {
            let currency: String = row.try_get("currency").map_err(storage)?;
            let balance: Decimal = row.try_get("balance").map_err(storage)?;
            balances.insert(Currency::new(currency), balance);
        }

        Ok(Wallet {
            id: WalletId::new(id),
            user_id,
            balances,
            created_at,
            updated_at,
        })
    }
}

#[async_trait]
impl WalletStore for PgWalletStore {
    async fn open_wallet(&self, user_id: UserId, currencies: &CurrencySet) -> Result<Wallet> {
        let mut tx = self.pool.begin().await.map_err(storage)?;

        sqlx::query("INSERT INTO wallets (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING")
            .bind(user_id.value())
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        let wallet_id: i64 = sqlx::query_scalar("SELECT id FROM wallets WHERE user_id = $1")
            .bind(user_id.value())
            .fetch_one(&mut *tx)
            .await
            .map_err(storage)?;

        for currency in currencies.iter() {
            sqlx::query(
                "INSERT INTO wallet_balances (wallet_id, currency) VALUES ($1, $2) \
                 ON CONFLICT (wallet_id, currency) DO NOTHING",
            )
            .bind(wallet_id)
            .bind(currency.code())
            .execute(&mut *tx)
            .await
            .map_err(storage)?;
        }

        let wallet = Self::load_wallet(&mut tx, user_id).await?;
        tx.commit().await.map_err(storage)?;
        Ok(wallet)
    }

    async fn get_wallet(&self, user_id: UserId) -> Result<Wallet> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        Self::load_wallet(&mut conn, user_id).await
    }

    async fn apply(&self, user_id: UserId, mutation: &BalanceMutation) -> Result<WalletLedgerEntry> {
        // Dropping `tx` on any early return rolls the whole unit back.
        let mut tx = self.pool.begin().await.map_err(storage)?;

        let wallet_id: i64 = sqlx::query_scalar("SELECT id FROM wallets WHERE user_id = $1 FOR UPDATE")
            .bind(user_id.value())
            .fetch_optional(&mut *tx)
            .await
            .map_err(storage)?
            .ok_or_else(|| wallet_not_found(user_id))?;

        let current: Option<Decimal> = sqlx::query_scalar(
            "SELECT balance FROM wallet_balances WHERE wallet_id = $1 AND currency = $2",
        )
        .bind(wallet_id)
        .bind(mutation.currency.code())
        .fetch_optional(&mut *tx)
        .await
        .map_err(storage)?;

        let balance_after = mutation.apply_to(current.unwrap_or(Decimal::ZERO))?;

        sqlx::query(
            "INSERT INTO wallet_balances (wallet_id, currency, balance) VALUES ($1, $2, $3) \
             ON CONFLICT (wallet_id, currency) DO UPDATE SET balance = EXCLUDED.balance",
        )
        .bind(wallet_id)
        .bind(mutation.currency.code())
        .bind(balance_after)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        sqlx::query("UPDATE wallets SET updated_at = NOW() WHERE id = $1")
            .bind(wallet_id)
            .execute(&mut *tx)
            .await
            .map_err(storage)?;

        let row = sqlx::query(&insert_entry_sql())
        .bind(wallet_id)
        .bind(mutation.entry_type.as_str())
        .bind(mutation.currency.code())
        .bind(mutation.amount)
        .bind(balance_after)
        .bind(mutation.description.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(storage)?;
        let entry = entry_from_row(&row)?;

        tx.commit().await.map_err(storage)?;
        Ok(entry)
    }

    async fn history(&self, user_id: UserId, page: Page) -> Result<Vec<WalletLedgerEntry>> {
        let wallet_id = self.wallet_id(user_id).await?;

        let rows = sqlx::query(&history_sql())
        .bind(wallet_id.value())
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn entries(&self, user_id: UserId) -> Result<Vec<WalletLedgerEntry>> {
        let wallet_id = self.wallet_id(user_id).await?;

        let rows = sqlx::query(&format!(
            "SELECT {} FROM wallet_transactions WHERE wallet_id = $1 ORDER BY id ASC",
            ENTRY_COLUMNS
        ))
        .bind(wallet_id.value())
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(entry_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_follows_commit_order() {
        let sql = history_sql();

        assert!(sql.contains("ORDER BY id DESC"));
        assert!(!sql.contains("created_at DESC"));
    }

    #[test]
    fn test_entry_timestamp_taken_at_insert() {
        let sql = insert_entry_sql();

        assert!(sql.contains("clock_timestamp()"));
        assert!(sql.ends_with(ENTRY_COLUMNS));
    }
}
