//! Wallet storage abstraction and the in-memory backend.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use ratebook_common::{
    CurrencySet, LedgerEntryId, Page, RatebookError, Result, UserId, WalletId,
};
use rust_decimal::Decimal;

use crate::journal::{BalanceMutation, WalletLedgerEntry};
use crate::wallet::Wallet;

/// Persistence for wallets and their ledgers.
///
/// `apply` is the only way to change a balance. Implementations must run the
/// balance read, the withdrawal check, the balance write and the ledger append
/// as one all-or-nothing unit, serialized per wallet.
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// Create the user's wallet if it does not exist. Returns the wallet either way.
    async fn open_wallet(&self, user_id: UserId, currencies: &CurrencySet) -> Result<Wallet>;

    /// Get the user's wallet, `NotFound` if absent.
    async fn get_wallet(&self, user_id: UserId) -> Result<Wallet>;

    /// Apply one mutation atomically and return the appended entry.
    async fn apply(&self, user_id: UserId, mutation: &BalanceMutation) -> Result<WalletLedgerEntry>;

    /// Ledger entries, newest first.
    async fn history(&self, user_id: UserId, page: Page) -> Result<Vec<WalletLedgerEntry>>;

    /// Every ledger entry, oldest first.
    async fn entries(&self, user_id: UserId) -> Result<Vec<WalletLedgerEntry>>;
}

/// Shared wallet store.
pub type SharedWalletStore = Arc<dyn WalletStore>;

pub(crate) fn wallet_not_found(user_id: UserId) -> RatebookError {
    RatebookError::NotFound(format!("wallet not found for user {}", user_id))
}

struct WalletCell {
    wallet: Wallet,
    /// Append-only, in commit order.
    entries: Vec<WalletLedgerEntry>,
}

/// Wallets held in process memory.
///
/// Each wallet sits behind its own mutex, so operations on different users
/// run in parallel while operations on one wallet are serialized.
pub struct MemoryWalletStore {
    wallets: DashMap<UserId, Arc<Mutex<WalletCell>>>,
    next_wallet_id: AtomicI64,
    next_entry_id: AtomicI64,
}

impl MemoryWalletStore {
    pub fn new() -> Self {
        Self {
            wallets: DashMap::new(),
            next_wallet_id: AtomicI64::new(1),
            next_entry_id: AtomicI64::new(1),
        }
    }

    /// Number of wallets.
    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    fn cell(&self, user_id: UserId) -> Result<Arc<Mutex<WalletCell>>> {
        self.wallets
            .get(&user_id)
            .map(|cell| cell.value().clone())
            .ok_or_else(|| wallet_not_found(user_id))
    }

    /// Critical section: nothing is written unless every check passes.
    fn apply_locked(
        &self,
        cell: &Mutex<WalletCell>,
        mutation: &BalanceMutation,
    ) -> Result<WalletLedgerEntry> {
        let mut cell = cell.lock();

        let current = cell.wallet.balance(&mutation.currency);
        let balance_after = mutation.apply_to(current)?;

        let now = Utc::now();
        let id = LedgerEntryId::new(self.next_entry_id.fetch_add(1, Ordering::SeqCst));
        let entry = mutation.to_entry(id, cell.wallet.id, balance_after, now);

        cell.wallet
            .balances
            .insert(mutation.currency.clone(), balance_after);
        cell.wallet.updated_at = now;
        cell.entries.push(entry.clone());

        Ok(entry)
    }
}

impl Default for MemoryWalletStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WalletStore for MemoryWalletStore {
    async fn open_wallet(&self, user_id: UserId, currencies: &CurrencySet) -> Result<Wallet> {
        let cell = self
            .wallets
            .entry(user_id)
            .or_insert_with(|| {
                let id = WalletId::new(self.next_wallet_id.fetch_add(1, Ordering::SeqCst));
                Arc::new(Mutex::new(WalletCell {
                    wallet: Wallet::new(id, user_id, currencies),
                    entries: Vec::new(),
                }))
            })
            .value()
            .clone();

        let mut cell = cell.lock();
        for currency in currencies.iter() {
            cell.wallet
                .balances
                .entry(currency.clone())
                .or_insert(Decimal::ZERO);
        }
        Ok(cell.wallet.clone())
    }

    async fn get_wallet(&self, user_id: UserId) -> Result<Wallet> {
        let cell = self.cell(user_id)?;
        let wallet = cell.lock().wallet.clone();
        Ok(wallet)
    }

    async fn apply(&self, user_id: UserId, mutation: &BalanceMutation) -> Result<WalletLedgerEntry> {
        let cell = self.cell(user_id)?;
        self.apply_locked(&cell, mutation)
    }

    async fn history(&self, user_id: UserId, page: Page) -> Result<Vec<WalletLedgerEntry>> {
        let cell = self.cell(user_id)?;
        let entries = page.slice(cell.lock().entries.iter().rev().cloned());
        Ok(entries)
    }

    async fn entries(&self, user_id: UserId) -> Result<Vec<WalletLedgerEntry>> {
        let cell = self.cell(user_id)?;
        let entries = cell.lock().entries.clone();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratebook_common::Currency;
    use rust_decimal_macros::dec;

    async fn store_with_wallet() -> MemoryWalletStore {
        let store = MemoryWalletStore::new();
        store
            .open_wallet(UserId::new(1), &CurrencySet::default())
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_open_wallet_is_idempotent() {
        let store = store_with_wallet().await;
        store
            .apply(
                UserId::new(1),
                &BalanceMutation::deposit(Currency::bdt(), dec!(10), "top up"),
            )
            .await
            .unwrap();

        let again = store
            .open_wallet(UserId::new(1), &CurrencySet::default())
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(again.balance(&Currency::bdt()), dec!(10));
    }

    #[tokio::test]
    async fn test_missing_wallet_is_not_found() {
        let store = MemoryWalletStore::new();

        assert!(matches!(
            store.get_wallet(UserId::new(9)).await,
            Err(RatebookError::NotFound(_))
        ));
        assert!(matches!(
            store
                .apply(
                    UserId::new(9),
                    &BalanceMutation::deposit(Currency::bdt(), dec!(1), "")
                )
                .await,
            Err(RatebookError::NotFound(_))
        ));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_failed_withdraw_writes_nothing() {
        let store = store_with_wallet().await;
        let user = UserId::new(1);
        store
            .apply(user, &BalanceMutation::deposit(Currency::bdt(), dec!(100), ""))
            .await
            .unwrap();

        let result = store
            .apply(user, &BalanceMutation::withdraw(Currency::bdt(), dec!(150), ""))
            .await;

        assert!(matches!(
            result,
            Err(RatebookError::InsufficientBalance { .. })
        ));
        assert_eq!(
            store.get_wallet(user).await.unwrap().balance(&Currency::bdt()),
            dec!(100)
        );
        assert_eq!(store.entries(user).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_newest_first_and_paged() {
        let store = store_with_wallet().await;
        let user = UserId::new(1);
        for i in 1..=5 {
            store
                .apply(
                    user,
                    &BalanceMutation::deposit(Currency::inr(), Decimal::from(i), format!("#{}", i)),
                )
                .await
                .unwrap();
        }

        let first = store.history(user, Page::new(2, 0)).await.unwrap();
        let second = store.history(user, Page::new(2, 2)).await.unwrap();
        let tail = store.history(user, Page::new(2, 4)).await.unwrap();
        let past_end = store.history(user, Page::new(2, 10)).await.unwrap();

        assert_eq!(first[0].description, "#5");
        assert_eq!(first[1].description, "#4");
        assert_eq!(second[0].description, "#3");
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].balance_after, dec!(1));
        assert!(past_end.is_empty());
        assert!(first[0].id > first[1].id);
    }
}
