//! Transaction storage abstraction and the in-memory backend.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use ratebook_common::{Page, RatebookError, Result, TransactionId, UserId};

use crate::transaction::{Transaction, TransactionStatus, Transition};

/// Persistence for exchange orders.
///
/// Status changes must be decided and written atomically per record, so two
/// concurrent updates cannot both move the same order out of `pending`.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Store a new pending transaction.
    async fn insert(&self, transaction: Transaction) -> Result<Transaction>;

    /// Get a transaction by id, `NotFound` if absent.
    async fn get(&self, id: TransactionId) -> Result<Transaction>;

    /// The user's transactions, newest first.
    async fn list_for_user(&self, user_id: UserId, page: Page) -> Result<Vec<Transaction>>;

    /// Every transaction, newest first.
    async fn list_all(&self, page: Page) -> Result<Vec<Transaction>>;

    /// Move a transaction to `status`, recording `notes` when the status changes.
    async fn update_status(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        notes: Option<String>,
    ) -> Result<(Transaction, Transition)>;

    /// Attach a payment proof to the user's own pending transaction.
    async fn attach_payment_proof(
        &self,
        id: TransactionId,
        user_id: UserId,
        proof: String,
    ) -> Result<Transaction>;
}

/// Shared transaction store.
pub type SharedTransactionStore = Arc<dyn TransactionStore>;

pub(crate) fn transaction_not_found(id: TransactionId) -> RatebookError {
    RatebookError::NotFound(format!("transaction not found: {}", id))
}

/// Transactions held in process memory.
pub struct MemoryTransactionStore {
    transactions: DashMap<TransactionId, Transaction>,
    /// Insertion order, oldest first.
    log: RwLock<Vec<TransactionId>>,
    by_user: DashMap<UserId, Vec<TransactionId>>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self {
            transactions: DashMap::new(),
            log: RwLock::new(Vec::new()),
            by_user: DashMap::new(),
        }
    }

    /// Number of stored transactions.
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    fn collect_newest_first(&self, ids: &[TransactionId], page: Page) -> Vec<Transaction> {
        page.slice(ids.iter().rev())
            .into_iter()
            .filter_map(|id| self.transactions.get(id).map(|t| t.clone()))
            .collect()
    }
}

impl Default for MemoryTransactionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn insert(&self, transaction: Transaction) -> Result<Transaction> {
        let id = transaction.id;
        let user_id = transaction.user_id;

        // Holding the log lock keeps log order and per-user order identical.
        let mut log = self.log.write();
        if self.transactions.contains_key(&id) {
            return Err(RatebookError::InvalidArgument(format!(
                "duplicate transaction id: {}",
                id
            )));
        }
        self.transactions.insert(id, transaction.clone());
        self.by_user.entry(user_id).or_default().push(id);
        log.push(id);

        Ok(transaction)
    }

    async fn get(&self, id: TransactionId) -> Result<Transaction> {
        self.transactions
            .get(&id)
            .map(|t| t.clone())
            .ok_or_else(|| transaction_not_found(id))
    }

    async fn list_for_user(&self, user_id: UserId, page: Page) -> Result<Vec<Transaction>> {
        let ids = match self.by_user.get(&user_id) {
            Some(ids) => ids.clone(),
            None => return Ok(Vec::new()),
        };
        Ok(self.collect_newest_first(&ids, page))
    }

    async fn list_all(&self, page: Page) -> Result<Vec<Transaction>> {
        let ids = self.log.read().clone();
        Ok(self.collect_newest_first(&ids, page))
    }

    async fn update_status(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        notes: Option<String>,
    ) -> Result<(Transaction, Transition)> {
        let mut record = self
            .transactions
            .get_mut(&id)
            .ok_or_else(|| transaction_not_found(id))?;

        let transition = record.status.resolve(status)?;
        if transition == Transition::Apply {
            record.status = status;
            record.admin_notes = notes;
            record.updated_at = Utc::now();
        }

        Ok((record.clone(), transition))
    }

    async fn attach_payment_proof(
        &self,
        id: TransactionId,
        user_id: UserId,
        proof: String,
    ) -> Result<Transaction> {
        let mut record = self
            .transactions
            .get_mut(&id)
            .filter(|t| t.user_id == user_id)
            .ok_or_else(|| transaction_not_found(id))?;

        if record.status != TransactionStatus::Pending {
            return Err(RatebookError::InvalidState(format!(
                "transaction {} is already {}",
                id, record.status
            )));
        }

        record.payment_proof = Some(proof);
        record.updated_at = Utc::now();
        Ok(record.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::NewTransaction;
    use ratebook_common::Currency;
    use rust_decimal_macros::dec;

    fn pending(user: i64) -> Transaction {
        NewTransaction {
            user_id: UserId::new(user),
            from_currency: Currency::bdt(),
            to_currency: Currency::inr(),
            from_amount: dec!(1000),
            to_amount: dec!(686.00),
            exchange_rate: dec!(0.686),
        }
        .into_pending(TransactionId::new(), Utc::now())
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let store = MemoryTransactionStore::new();
        let tx = store.insert(pending(1)).await.unwrap();

        assert_eq!(store.get(tx.id).await.unwrap(), tx);
        assert!(matches!(
            store.get(TransactionId::new()).await,
            Err(RatebookError::NotFound(_))
        ));
        assert!(store.insert(tx.clone()).await.is_err());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_listing_is_newest_first() {
        let store = MemoryTransactionStore::new();
        let mut ids = Vec::new();
        for user in [1, 2, 1, 1] {
            ids.push(store.insert(pending(user)).await.unwrap().id);
        }

        let mine = store
            .list_for_user(UserId::new(1), Page::new(2, 0))
            .await
            .unwrap();
        assert_eq!(mine.iter().map(|t| t.id).collect::<Vec<_>>(), vec![ids[3], ids[2]]);

        let rest = store
            .list_for_user(UserId::new(1), Page::new(2, 2))
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, ids[0]);

        let all = store.list_all(Page::admin_default()).await.unwrap();
        assert_eq!(all.len(), 4);
        assert_eq!(all[0].id, ids[3]);
        assert_eq!(all[3].id, ids[0]);

        assert!(store
            .list_for_user(UserId::new(3), Page::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_update_status_keeps_first_terminal_notes() {
        let store = MemoryTransactionStore::new();
        let tx = store.insert(pending(1)).await.unwrap();

        let (done, transition) = store
            .update_status(tx.id, TransactionStatus::Completed, Some("paid".into()))
            .await
            .unwrap();
        assert_eq!(transition, Transition::Apply);
        assert_eq!(done.admin_notes.as_deref(), Some("paid"));

        let (again, transition) = store
            .update_status(tx.id, TransactionStatus::Completed, Some("again".into()))
            .await
            .unwrap();
        assert_eq!(transition, Transition::Unchanged);
        assert_eq!(again.admin_notes.as_deref(), Some("paid"));

        assert!(matches!(
            store
                .update_status(tx.id, TransactionStatus::Rejected, None)
                .await,
            Err(RatebookError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_payment_proof_requires_owner_and_pending() {
        let store = MemoryTransactionStore::new();
        let tx = store.insert(pending(1)).await.unwrap();

        assert!(matches!(
            store
                .attach_payment_proof(tx.id, UserId::new(2), "receipt".into())
                .await,
            Err(RatebookError::NotFound(_))
        ));

        let updated = store
            .attach_payment_proof(tx.id, UserId::new(1), "receipt-42".into())
            .await
            .unwrap();
        assert_eq!(updated.payment_proof.as_deref(), Some("receipt-42"));

        store
            .update_status(tx.id, TransactionStatus::Rejected, None)
            .await
            .unwrap();
        assert!(matches!(
            store
                .attach_payment_proof(tx.id, UserId::new(1), "late".into())
                .await,
            Err(RatebookError::InvalidState(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_status_updates_pick_one_winner() {
        let store = Arc::new(MemoryTransactionStore::new());
        let tx = store.insert(pending(1)).await.unwrap();

        let complete = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .update_status(tx.id, TransactionStatus::Completed, None)
                    .await
            })
        };
        let reject = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .update_status(tx.id, TransactionStatus::Rejected, None)
                    .await
            })
        };

        let results = [complete.await.unwrap(), reject.await.unwrap()];
        let applied = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(applied, 1);

        let final_status = store.get(tx.id).await.unwrap().status;
        assert!(final_status.is_final());
    }
}
