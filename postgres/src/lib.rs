//! Ratebook PostgreSQL Backend
//!
//! sqlx implementations of the rate, wallet and transaction store traits.
//! Wallet mutations run in a database transaction holding a row lock on the
//! wallet; order status changes are guarded by the row update itself.

pub mod rates;
pub mod schema;
pub mod transactions;
pub mod wallets;

use std::time::Duration;

use ratebook_common::{RatebookError, Result};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

pub use rates::PgRateStore;
pub use transactions::PgTransactionStore;
pub use wallets::PgWalletStore;

/// Map a driver error into the storage failure kind.
pub(crate) fn storage(e: sqlx::Error) -> RatebookError {
    RatebookError::StorageFailure(e.to_string())
}

/// Connection pool shared by the three stores.
#[derive(Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    /// Open a connection pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(storage)?;

        info!(max_connections, "PostgreSQL connection pool established");
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes if they do not exist.
    pub async fn migrate(&self) -> Result<()> {
        schema::apply(&self.pool).await
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    pub fn rate_store(&self) -> PgRateStore {
        PgRateStore::new(self.pool.clone())
    }

    pub fn wallet_store(&self) -> PgWalletStore {
        PgWalletStore::new(self.pool.clone())
    }

    pub fn transaction_store(&self) -> PgTransactionStore {
        PgTransactionStore::new(self.pool.clone())
    }
}
