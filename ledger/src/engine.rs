//! Wallet ledger operations.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use ratebook_common::{ensure_amount, Currency, CurrencySet, Page, RatebookError, Result, UserId};

use crate::journal::{reconstruct, BalanceMutation, WalletLedgerEntry};
use crate::store::WalletStore;
use crate::wallet::{Wallet, WalletAudit};

/// The wallet ledger owns every balance. Nothing else mutates one.
pub struct WalletLedger {
    store: Arc<dyn WalletStore>,
    currencies: CurrencySet,
}

impl WalletLedger {
    /// Create a ledger over `store` accepting the given currencies.
    pub fn new(store: Arc<dyn WalletStore>, currencies: CurrencySet) -> Self {
        Self { store, currencies }
    }

    /// Get the supported currencies.
    pub fn currencies(&self) -> &CurrencySet {
        &self.currencies
    }

    /// Create the user's wallet with zero balances. Safe to call repeatedly.
    #[instrument(skip(self))]
    pub async fn open_wallet(&self, user_id: UserId) -> Result<Wallet> {
        let wallet = self.store.open_wallet(user_id, &self.currencies).await?;
        info!(user_id = %user_id, wallet_id = %wallet.id, "Wallet opened");
        Ok(wallet)
    }

    /// Get the user's wallet.
    pub async fn get_wallet(&self, user_id: UserId) -> Result<Wallet> {
        self.store.get_wallet(user_id).await
    }

    /// Credit `amount` of `currency` to the user's wallet.
    #[instrument(skip(self, description))]
    pub async fn deposit(
        &self,
        user_id: UserId,
        currency: &Currency,
        amount: Decimal,
        description: &str,
    ) -> Result<WalletLedgerEntry> {
        let mutation = self.validate(BalanceMutation::deposit(
            currency.clone(),
            amount,
            description,
        ))?;

        let entry = self.store.apply(user_id, &mutation).await?;

        info!(
            user_id = %user_id,
            currency = %currency,
            amount = %amount,
            balance_after = %entry.balance_after,
            "Deposit applied"
        );

        Ok(entry)
    }

    /// Debit `amount` of `currency` from the user's wallet.
    ///
    /// The balance check runs inside the store's per-wallet critical section,
    /// so two concurrent withdrawals can never both pass against one balance.
    #[instrument(skip(self, description))]
    pub async fn withdraw(
        &self,
        user_id: UserId,
        currency: &Currency,
        amount: Decimal,
        description: &str,
    ) -> Result<WalletLedgerEntry> {
        let mutation = self.validate(BalanceMutation::withdraw(
            currency.clone(),
            amount,
            description,
        ))?;

        match self.store.apply(user_id, &mutation).await {
            Ok(entry) => {
                info!(
                    user_id = %user_id,
                    currency = %currency,
                    amount = %amount,
                    balance_after = %entry.balance_after,
                    "Withdrawal applied"
                );
                Ok(entry)
            }
            Err(e @ RatebookError::InsufficientBalance { .. }) => {
                warn!(user_id = %user_id, currency = %currency, amount = %amount, "Withdrawal rejected: {}", e);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Ledger entries for the user, newest first.
    pub async fn history(&self, user_id: UserId, page: Page) -> Result<Vec<WalletLedgerEntry>> {
        self.store.history(user_id, page).await
    }

    /// Replay the user's ledger and compare it with the stored balances.
    #[instrument(skip(self))]
    pub async fn verify(&self, user_id: UserId) -> Result<WalletAudit> {
        let wallet = self.store.get_wallet(user_id).await?;
        let entries = self.store.entries(user_id).await?;

        let audit = WalletAudit {
            wallet_id: wallet.id,
            user_id,
            stored: wallet.balances,
            replayed: reconstruct(&entries),
            entry_count: entries.len(),
        };

        if !audit.is_consistent() {
            warn!(user_id = %user_id, mismatches = ?audit.mismatches(), "Wallet does not match its ledger");
        }

        Ok(audit)
    }

    fn validate(&self, mutation: BalanceMutation) -> Result<BalanceMutation> {
        ensure_amount(mutation.amount, "amount")?;
        self.currencies.ensure_supported(&mutation.currency)?;
        Ok(mutation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::EntryType;
    use crate::store::MemoryWalletStore;
    use rust_decimal_macros::dec;

    async fn ledger_with_user(user: i64) -> WalletLedger {
        let ledger = WalletLedger::new(Arc::new(MemoryWalletStore::new()), CurrencySet::default());
        ledger.open_wallet(UserId::new(user)).await.unwrap();
        ledger
    }

    #[tokio::test]
    async fn test_deposit_then_overdraw() {
        let ledger = ledger_with_user(1).await;
        let user = UserId::new(1);
        let bdt = Currency::bdt();

        let entry = ledger.deposit(user, &bdt, dec!(100), "top up").await.unwrap();
        assert_eq!(entry.entry_type, EntryType::Deposit);
        assert_eq!(entry.amount, dec!(100));
        assert_eq!(entry.balance_after, dec!(100));

        let result = ledger.withdraw(user, &bdt, dec!(150), "cash out").await;
        assert!(matches!(
            result,
            Err(RatebookError::InsufficientBalance { .. })
        ));

        let wallet = ledger.get_wallet(user).await.unwrap();
        assert_eq!(wallet.balance(&bdt), dec!(100));
    }

    #[tokio::test]
    async fn test_deposit_withdraw_round_trip() {
        let ledger = ledger_with_user(1).await;
        let user = UserId::new(1);
        let inr = Currency::inr();
        ledger.deposit(user, &inr, dec!(33.10), "seed").await.unwrap();

        ledger.deposit(user, &inr, dec!(19.99), "in").await.unwrap();
        ledger.withdraw(user, &inr, dec!(19.99), "out").await.unwrap();

        assert_eq!(
            ledger.get_wallet(user).await.unwrap().balance(&inr),
            dec!(33.10)
        );
    }

    #[tokio::test]
    async fn test_rejects_invalid_arguments() {
        let ledger = ledger_with_user(1).await;
        let user = UserId::new(1);

        for amount in [dec!(0), dec!(-5), dec!(1.005)] {
            assert!(matches!(
                ledger.deposit(user, &Currency::bdt(), amount, "").await,
                Err(RatebookError::InvalidArgument(_))
            ));
        }
        assert!(matches!(
            ledger.withdraw(user, &Currency::new("USD"), dec!(1), "").await,
            Err(RatebookError::InvalidArgument(_))
        ));
        assert!(ledger.history(user, Page::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_wallet() {
        let ledger = ledger_with_user(1).await;

        assert!(matches!(
            ledger.get_wallet(UserId::new(2)).await,
            Err(RatebookError::NotFound(_))
        ));
        assert!(matches!(
            ledger.deposit(UserId::new(2), &Currency::bdt(), dec!(1), "").await,
            Err(RatebookError::NotFound(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_withdrawals_never_overdraw() {
        let ledger = Arc::new(ledger_with_user(1).await);
        let user = UserId::new(1);
        let bdt = Currency::bdt();
        ledger.deposit(user, &bdt, dec!(100), "top up").await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..2 {
            let ledger = ledger.clone();
            let bdt = bdt.clone();
            handles.push(tokio::spawn(async move {
                ledger.withdraw(user, &bdt, dec!(60), "race").await
            }));
        }

        let mut succeeded = 0;
        let mut insufficient = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(RatebookError::InsufficientBalance { .. }) => insufficient += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }

        assert_eq!(succeeded, 1);
        assert_eq!(insufficient, 1);
        assert_eq!(ledger.get_wallet(user).await.unwrap().balance(&bdt), dec!(40));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_many_concurrent_mutations_stay_consistent() {
        let ledger = Arc::new(ledger_with_user(1).await);
        let user = UserId::new(1);
        let inr = Currency::inr();
        ledger.deposit(user, &inr, dec!(50), "seed").await.unwrap();

        let mut handles = Vec::new();
        for i in 0..64 {
            let ledger = ledger.clone();
            let inr = inr.clone();
            handles.push(tokio::spawn(async move {
                if i % 2 == 0 {
                    ledger.withdraw(user, &inr, dec!(7.25), "w").await.ok();
                } else {
                    ledger.deposit(user, &inr, dec!(3.50), "d").await.ok();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let wallet = ledger.get_wallet(user).await.unwrap();
        assert!(wallet.balance(&inr) >= Decimal::ZERO);

        let audit = ledger.verify(user).await.unwrap();
        assert!(audit.is_consistent());
        assert_eq!(audit.replayed[&inr], wallet.balance(&inr));
    }

    #[tokio::test]
    async fn test_history_reports_balance_after() {
        let ledger = ledger_with_user(1).await;
        let user = UserId::new(1);
        let bdt = Currency::bdt();
        ledger.deposit(user, &bdt, dec!(100), "a").await.unwrap();
        ledger.withdraw(user, &bdt, dec!(30), "b").await.unwrap();

        let history = ledger.history(user, Page::user_default()).await.unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].entry_type, EntryType::Withdraw);
        assert_eq!(history[0].balance_after, dec!(70));
        assert_eq!(history[1].balance_after, dec!(100));
    }
}
