//! Exchange order recording.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

use ratebook_common::{
    ensure_amount, Currency, CurrencySet, Page, RatebookError, Result, TransactionId, UserId,
};
use ratebook_fx::Quote;

use crate::store::{transaction_not_found, TransactionStore};
use crate::transaction::{NewTransaction, Transaction, TransactionStatus, Transition};

/// A spread-adjusted rate is a 4-digit rate times a 4-digit factor.
const SNAPSHOT_RATE_DECIMALS: u32 = 8;

/// Records exchange orders. Does not consult the rate table and does not own
/// wallet state; it stores the snapshot it is given.
pub struct TransactionRecorder {
    store: Arc<dyn TransactionStore>,
    currencies: CurrencySet,
}

impl TransactionRecorder {
    pub fn new(store: Arc<dyn TransactionStore>, currencies: CurrencySet) -> Self {
        Self { store, currencies }
    }

    /// Persist a pending order from a caller-supplied snapshot.
    #[instrument(skip(self))]
    pub async fn create_transaction(
        &self,
        user_id: UserId,
        from_currency: &Currency,
        to_currency: &Currency,
        from_amount: Decimal,
        to_amount: Decimal,
        exchange_rate: Decimal,
    ) -> Result<Transaction> {
        let snapshot = NewTransaction {
            user_id,
            from_currency: from_currency.clone(),
            to_currency: to_currency.clone(),
            from_amount,
            to_amount,
            exchange_rate,
        };
        self.record(snapshot).await
    }

    /// Persist a pending order priced by a quote.
    pub async fn record_quote(&self, user_id: UserId, quote: &Quote) -> Result<Transaction> {
        self.record(NewTransaction::from_quote(user_id, quote)).await
    }

    async fn record(&self, snapshot: NewTransaction) -> Result<Transaction> {
        self.currencies.ensure_supported(&snapshot.from_currency)?;
        self.currencies.ensure_supported(&snapshot.to_currency)?;
        if snapshot.from_currency == snapshot.to_currency {
            return Err(RatebookError::InvalidArgument(format!(
                "cannot exchange {} into itself",
                snapshot.from_currency
            )));
        }
        ensure_amount(snapshot.from_amount, "from_amount")?;
        ensure_amount(snapshot.to_amount, "to_amount")?;

        if snapshot.exchange_rate <= Decimal::ZERO {
            return Err(RatebookError::InvalidArgument(format!(
                "exchange_rate must be positive, got {}",
                snapshot.exchange_rate
            )));
        }
        if snapshot.exchange_rate.normalize().scale() > SNAPSHOT_RATE_DECIMALS {
            return Err(RatebookError::InvalidArgument(format!(
                "exchange_rate has more than {} fractional digits: {}",
                SNAPSHOT_RATE_DECIMALS, snapshot.exchange_rate
            )));
        }

        let transaction = self
            .store
            .insert(snapshot.into_pending(TransactionId::new(), Utc::now()))
            .await?;

        info!(
            transaction_id = %transaction.id,
            user_id = %transaction.user_id,
            from = %transaction.from_currency,
            to = %transaction.to_currency,
            from_amount = %transaction.from_amount,
            to_amount = %transaction.to_amount,
            "Transaction created"
        );

        Ok(transaction)
    }

    /// Get one of the user's transactions. Another user's order reads as absent.
    pub async fn get_transaction(&self, id: TransactionId, user_id: UserId) -> Result<Transaction> {
        let transaction = self.store.get(id).await?;
        if transaction.user_id != user_id {
            return Err(transaction_not_found(id));
        }
        Ok(transaction)
    }

    /// Move an order to `completed` or `rejected`.
    ///
    /// Re-applying the current terminal status returns the record unchanged,
    /// reported as [`Transition::Unchanged`].
    #[instrument(skip(self, notes))]
    pub async fn update_status(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        notes: Option<String>,
    ) -> Result<(Transaction, Transition)> {
        if !status.is_final() {
            return Err(RatebookError::InvalidArgument(format!(
                "status must be completed or rejected, got {}",
                status
            )));
        }
        let notes = notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());

        let (transaction, transition) = self.store.update_status(id, status, notes).await?;

        match transition {
            Transition::Apply => info!(transaction_id = %id, status = %status, "Transaction status changed"),
            Transition::Unchanged => debug!(transaction_id = %id, status = %status, "Status already applied"),
        }

        Ok((transaction, transition))
    }

    /// The user's orders, newest first.
    pub async fn list_for_user(&self, user_id: UserId, page: Page) -> Result<Vec<Transaction>> {
        self.store.list_for_user(user_id, page).await
    }

    /// Every order, newest first.
    pub async fn list_all(&self, page: Page) -> Result<Vec<Transaction>> {
        self.store.list_all(page).await
    }

    /// Attach a payment-proof reference to the user's pending order.
    #[instrument(skip(self, proof))]
    pub async fn attach_payment_proof(
        &self,
        id: TransactionId,
        user_id: UserId,
        proof: &str,
    ) -> Result<Transaction> {
        let proof = proof.trim();
        if proof.is_empty() {
            return Err(RatebookError::InvalidArgument(
                "payment proof must not be empty".to_string(),
            ));
        }

        let transaction = self
            .store
            .attach_payment_proof(id, user_id, proof.to_string())
            .await?;
        info!(transaction_id = %id, user_id = %user_id, "Payment proof attached");
        Ok(transaction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTransactionStore;
    use ratebook_common::CurrencyPair;
    use ratebook_fx::ExchangeRate;
    use rust_decimal_macros::dec;

    fn recorder() -> TransactionRecorder {
        TransactionRecorder::new(Arc::new(MemoryTransactionStore::new()), CurrencySet::default())
    }

    async fn create(recorder: &TransactionRecorder, user: i64) -> Transaction {
        recorder
            .create_transaction(
                UserId::new(user),
                &Currency::bdt(),
                &Currency::inr(),
                dec!(1000),
                dec!(686.00),
                dec!(0.686),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_stores_snapshot_as_pending() {
        let recorder = recorder();

        let tx = create(&recorder, 1).await;

        assert_eq!(tx.status, TransactionStatus::Pending);
        assert_eq!(tx.from_amount, dec!(1000));
        assert_eq!(tx.to_amount, dec!(686.00));
        assert_eq!(tx.exchange_rate, dec!(0.686));
        assert!(tx.admin_notes.is_none());
    }

    #[tokio::test]
    async fn test_create_validates_snapshot() {
        let recorder = recorder();
        let user = UserId::new(1);

        let same = recorder
            .create_transaction(user, &Currency::bdt(), &Currency::bdt(), dec!(1), dec!(1), dec!(1))
            .await;
        let unsupported = recorder
            .create_transaction(user, &Currency::new("USD"), &Currency::bdt(), dec!(1), dec!(1), dec!(1))
            .await;
        let zero = recorder
            .create_transaction(user, &Currency::bdt(), &Currency::inr(), dec!(0), dec!(1), dec!(1))
            .await;
        let bad_rate = recorder
            .create_transaction(user, &Currency::bdt(), &Currency::inr(), dec!(1), dec!(1), dec!(0))
            .await;

        for result in [same, unsupported, zero, bad_rate] {
            assert!(matches!(result, Err(RatebookError::InvalidArgument(_))));
        }
        assert!(recorder.list_all(Page::admin_default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_quote() {
        let recorder = recorder();
        let rate = ExchangeRate::new(
            CurrencyPair::new(Currency::inr(), Currency::bdt()),
            dec!(1.43),
            dec!(0.02),
        )
        .unwrap();
        let quote = Quote::price(&rate, dec!(100)).unwrap();

        let tx = recorder.record_quote(UserId::new(5), &quote).await.unwrap();

        assert_eq!(tx.from_currency, Currency::inr());
        assert_eq!(tx.to_amount, dec!(140.14));
        assert_eq!(tx.exchange_rate, dec!(1.4014));
    }

    #[tokio::test]
    async fn test_record_quote_keeps_adjusted_rate_exact() {
        let recorder = recorder();
        let rate = ExchangeRate::new(
            CurrencyPair::new(Currency::bdt(), Currency::inr()),
            dec!(0.7035),
            dec!(0.02),
        )
        .unwrap();
        let quote = Quote::price(&rate, dec!(1000)).unwrap();

        let tx = recorder.record_quote(UserId::new(5), &quote).await.unwrap();

        assert_eq!(tx.exchange_rate, dec!(0.68943));
        assert_eq!(tx.to_amount, dec!(689.43));
        assert_eq!(tx.from_amount * tx.exchange_rate, tx.to_amount);

        let too_fine = recorder
            .create_transaction(
                UserId::new(5),
                &Currency::bdt(),
                &Currency::inr(),
                dec!(1),
                dec!(0.69),
                dec!(0.123456789),
            )
            .await;
        assert!(matches!(too_fine, Err(RatebookError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_get_transaction_scoped_to_owner() {
        let recorder = recorder();
        let tx = create(&recorder, 1).await;

        assert_eq!(
            recorder.get_transaction(tx.id, UserId::new(1)).await.unwrap().id,
            tx.id
        );
        assert!(matches!(
            recorder.get_transaction(tx.id, UserId::new(2)).await,
            Err(RatebookError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_status_lifecycle() {
        let recorder = recorder();
        let tx = create(&recorder, 1).await;

        assert!(matches!(
            recorder
                .update_status(tx.id, TransactionStatus::Pending, None)
                .await,
            Err(RatebookError::InvalidArgument(_))
        ));

        let (rejected, transition) = recorder
            .update_status(tx.id, TransactionStatus::Rejected, Some("  proof unreadable ".into()))
            .await
            .unwrap();
        assert_eq!(transition, Transition::Apply);
        assert_eq!(rejected.status, TransactionStatus::Rejected);
        assert_eq!(rejected.admin_notes.as_deref(), Some("proof unreadable"));

        let (again, transition) = recorder
            .update_status(tx.id, TransactionStatus::Rejected, None)
            .await
            .unwrap();
        assert_eq!(transition, Transition::Unchanged);
        assert_eq!(again, rejected);

        assert!(matches!(
            recorder
                .update_status(tx.id, TransactionStatus::Completed, None)
                .await,
            Err(RatebookError::InvalidState(_))
        ));
        assert!(matches!(
            recorder
                .update_status(TransactionId::new(), TransactionStatus::Completed, None)
                .await,
            Err(RatebookError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_attach_payment_proof_rejects_blank() {
        let recorder = recorder();
        let tx = create(&recorder, 1).await;

        assert!(matches!(
            recorder.attach_payment_proof(tx.id, UserId::new(1), "   ").await,
            Err(RatebookError::InvalidArgument(_))
        ));
        let updated = recorder
            .attach_payment_proof(tx.id, UserId::new(1), "bkash-TRX-991")
            .await
            .unwrap();
        assert_eq!(updated.payment_proof.as_deref(), Some("bkash-TRX-991"));
    }
}
