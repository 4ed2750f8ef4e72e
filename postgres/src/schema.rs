//! Table definitions.

use sqlx::PgPool;
use tracing::info;

use ratebook_common::Result;

use crate::storage;

/// DDL statements, each idempotent, applied in order.
pub const STATEMENTS: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS exchange_rates (
        id BIGSERIAL PRIMARY KEY,
        from_currency VARCHAR(8) NOT NULL,
        to_currency VARCHAR(8) NOT NULL,
        rate DECIMAL(10, 4) NOT NULL CHECK (rate > 0),
        spread DECIMAL(5, 4) NOT NULL DEFAULT 0.0200 CHECK (spread >= 0 AND spread < 1),
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_exchange_rates_pair
        ON exchange_rates (from_currency, to_currency)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS wallets (
        id BIGSERIAL PRIMARY KEY,
        user_id BIGINT NOT NULL UNIQUE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS wallet_balances (
        wallet_id BIGINT NOT NULL REFERENCES wallets (id),
        currency VARCHAR(8) NOT NULL,
        balance DECIMAL(15, 2) NOT NULL DEFAULT 0 CHECK (balance >= 0),
        PRIMARY KEY (wallet_id, currency)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS wallet_transactions (
        id BIGSERIAL PRIMARY KEY,
        wallet_id BIGINT NOT NULL REFERENCES wallets (id),
        entry_type VARCHAR(16) NOT NULL CHECK (entry_type IN ('deposit', 'withdraw')),
        currency VARCHAR(8) NOT NULL,
        amount DECIMAL(15, 2) NOT NULL CHECK (amount > 0),
        balance_after DECIMAL(15, 2) NOT NULL CHECK (balance_after >= 0),
        description TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_wallet_transactions_wallet
        ON wallet_transactions (wallet_id, id DESC)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS transactions (
        id UUID PRIMARY KEY,
        user_id BIGINT NOT NULL,
        from_currency VARCHAR(8) NOT NULL,
        to_currency VARCHAR(8) NOT NULL,
        from_amount DECIMAL(15, 2) NOT NULL CHECK (from_amount > 0),
        to_amount DECIMAL(15, 2) NOT NULL CHECK (to_amount > 0),
        exchange_rate DECIMAL(18, 8) NOT NULL CHECK (exchange_rate > 0),
        status VARCHAR(16) NOT NULL DEFAULT 'pending'
            CHECK (status IN ('pending', 'completed', 'rejected')),
        payment_proof TEXT,
        admin_notes TEXT,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_transactions_user
        ON transactions (user_id, created_at DESC)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_transactions_created
        ON transactions (created_at DESC)
    "#,
];

/// Apply every statement.
pub async fn apply(pool: &PgPool) -> Result<()> {
    for statement in STATEMENTS {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(storage)?;
    }
    info!(statements = STATEMENTS.len(), "Database schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_are_idempotent() {
        for statement in STATEMENTS {
            assert!(statement.contains("IF NOT EXISTS"), "{}", statement);
        }
    }
}
