//! Exchange orders in PostgreSQL.

use async_trait::async_trait;
use ratebook_common::{Currency, Page, RatebookError, Result, TransactionId, UserId};
use ratebook_orders::{Transaction, TransactionStatus, TransactionStore, Transition};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::storage;

const TRANSACTION_COLUMNS: &str = "id, user_id, from_currency, to_currency, from_amount, \
     to_amount, exchange_rate, status, payment_proof, admin_notes, created_at, updated_at";

fn transaction_not_found(id: TransactionId) -> RatebookError {
    RatebookError::NotFound(format!("transaction not found: {}", id))
}

fn transaction_from_row(row: &PgRow) -> Result<Transaction> {
    let id: Uuid = row.try_get("id").map_err(storage)?;
    let user_id: i64 = row.try_get("user_id").map_err(storage)?;
    let from_currency: String = row.try_get("from_currency").map_err(storage)?;
    let to_currency: String = row.try_get("to_currency").map_err(storage)?;
    let status: String = row.try_get("status").map_err(storage)?;

    Ok(Transaction {
        id: TransactionId::from_uuid(id),
        user_id: UserId::new(user_id),
        from_currency: Currency::new(from_currency),
        to_currency: Currency::new(to_currency),
        from_amount: row.try_get("from_amount").map_err(storage)?,
        to_amount: row.try_get("to_amount").map_err(storage)?,
        exchange_rate: row.try_get("exchange_rate").map_err(storage)?,
        status: status
            .parse()
            .map_err(|e: RatebookError| RatebookError::StorageFailure(e.to_string()))?,
        payment_proof: row.try_get("payment_proof").map_err(storage)?,
        admin_notes: row.try_get("admin_notes").map_err(storage)?,
        created_at: row.try_get("created_at").map_err(storage)?,
        updated_at: row.try_get("updated_at").map_err(storage)?,
    })
}

/// Transaction store backed by the `transactions` table.
///
/// Status and payment-proof writes only match rows still in `pending`, so the
/// state machine holds even when two administrators act at once.
#[derive(Clone)]
pub struct PgTransactionStore {
    pool: PgPool,
}

impl PgTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find(&self, id: TransactionId) -> Result<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(*id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.as_ref().map(transaction_from_row).transpose()
    }
}

#[async_trait]
impl TransactionStore for PgTransactionStore {
    async fn insert(&self, transaction: Transaction) -> Result<Transaction> {
        let row = sqlx::query(&format!(
            "INSERT INTO transactions \
             (id, user_id, from_currency, to_currency, from_amount, to_amount, exchange_rate, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(*transaction.id.as_uuid())
        .bind(transaction.user_id.value())
        .bind(transaction.from_currency.code())
        .bind(transaction.to_currency.code())
        .bind(transaction.from_amount)
        .bind(transaction.to_amount)
        .bind(transaction.exchange_rate)
        .bind(transaction.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;

        transaction_from_row(&row)
    }

    async fn get(&self, id: TransactionId) -> Result<Transaction> {
        self.find(id)
            .await?
            .ok_or_else(|| transaction_not_found(id))
    }

    async fn list_for_user(&self, user_id: UserId, page: Page) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions WHERE user_id = $1 \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
            TRANSACTION_COLUMNS
        ))
        .bind(user_id.value())
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn list_all(&self, page: Page) -> Result<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM transactions ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
            TRANSACTION_COLUMNS
        ))
        .bind(page.limit as i64)
        .bind(page.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter().map(transaction_from_row).collect()
    }

    async fn update_status(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        notes: Option<String>,
    ) -> Result<(Transaction, Transition)> {
        // Validates the target before touching the row.
        TransactionStatus::Pending.resolve(status)?;

        let row = sqlx::query(&format!(
            "UPDATE transactions SET status = $2, admin_notes = $3, updated_at = NOW() \
             WHERE id = $1 AND status = 'pending' RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(*id.as_uuid())
        .bind(status.as_str())
        .bind(notes)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        if let Some(row) = row {
            return Ok((transaction_from_row(&row)?, Transition::Apply));
        }

        // The row was not pending: either absent or already terminal.
        let current = self.get(id).await?;
        match current.status.resolve(status)? {
            Transition::Unchanged => Ok((current, Transition::Unchanged)),
            Transition::Apply => Err(RatebookError::InvalidState(format!(
                "transaction {} changed concurrently",
                id
            ))),
        }
    }

    async fn attach_payment_proof(
        &self,
        id: TransactionId,
        user_id: UserId,
        proof: String,
    ) -> Result<Transaction> {
        let row = sqlx::query(&format!(
            "UPDATE transactions SET payment_proof = $3, updated_at = NOW() \
             WHERE id = $1 AND user_id = $2 AND status = 'pending' RETURNING {}",
            TRANSACTION_COLUMNS
        ))
        .bind(*id.as_uuid())
        .bind(user_id.value())
        .bind(proof)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        if let Some(row) = row {
            return transaction_from_row(&row);
        }

        match self.find(id).await? {
            Some(current) if current.user_id == user_id => Err(RatebookError::InvalidState(
                format!("transaction {} is already {}", id, current.status),
            )),
            _ => Err(transaction_not_found(id)),
        }
    }
}
