//! The exchange service facade.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use ratebook_common::{
    Currency, CurrencyPair, Page, RatebookError, Result, TransactionId, UserId,
};
use ratebook_fx::{
    ExchangeCalculator, ExchangeRate, FluctuatorHandle, MemoryRateStore, Quote, RateFeed,
    RateFluctuator, SharedRateStore, TickReport,
};
use ratebook_ledger::{
    MemoryWalletStore, SharedWalletStore, Wallet, WalletAudit, WalletLedger, WalletLedgerEntry,
};
use ratebook_orders::{
    MemoryTransactionStore, SharedTransactionStore, Transaction, TransactionRecorder,
    TransactionStatus, Transition,
};
use ratebook_postgres::PgBackend;

use crate::config::{ServiceConfig, StorageBackend, StorageConfig};
use crate::metrics::{Metrics, MetricsSnapshot, SharedMetrics};
use crate::state::ServiceState;

/// The three stores a service runs on.
#[derive(Clone)]
pub struct Backends {
    pub rates: SharedRateStore,
    pub wallets: SharedWalletStore,
    pub transactions: SharedTransactionStore,
}

impl Backends {
    /// Process-memory stores.
    pub fn in_memory() -> Self {
        Self {
            rates: Arc::new(MemoryRateStore::new()),
            wallets: Arc::new(MemoryWalletStore::new()),
            transactions: Arc::new(MemoryTransactionStore::new()),
        }
    }

    /// PostgreSQL stores over one pool. Creates the schema if needed.
    pub async fn postgres(database_url: &str, max_connections: u32) -> Result<Self> {
        let backend = PgBackend::connect(database_url, max_connections).await?;
        backend.migrate().await?;

        Ok(Self {
            rates: Arc::new(backend.rate_store()),
            wallets: Arc::new(backend.wallet_store()),
            transactions: Arc::new(backend.transaction_store()),
        })
    }

    /// Build the backend the configuration asks for.
    pub async fn from_config(config: &StorageConfig) -> Result<Self> {
        match config.backend {
            StorageBackend::Memory => Ok(Self::in_memory()),
            StorageBackend::Postgres => {
                Self::postgres(&config.database_url, config.max_connections).await
            }
        }
    }
}

/// Rate and ledger engine, exposed to handlers and admin tooling.
pub struct ExchangeService {
    config: ServiceConfig,
    state: RwLock<ServiceState>,
    rates: SharedRateStore,
    feed: RateFeed,
    fluctuator: Arc<RateFluctuator>,
    fluctuation: Mutex<Option<FluctuatorHandle>>,
    calculator: ExchangeCalculator,
    ledger: WalletLedger,
    recorder: TransactionRecorder,
    metrics: SharedMetrics,
}

impl ExchangeService {
    /// Create a service over the given stores. Nothing runs until [`start`](Self::start).
    pub fn new(config: ServiceConfig, backends: Backends) -> Self {
        let feed = RateFeed::new();
        let currencies = config.ledger.currencies.clone();

        let fluctuator = Arc::new(
            RateFluctuator::new(backends.rates.clone(), config.rates.fluctuation())
                .with_feed(feed.clone()),
        );

        Self {
            state: RwLock::new(ServiceState::Starting),
            rates: backends.rates.clone(),
            feed,
            fluctuator,
            fluctuation: Mutex::new(None),
            calculator: ExchangeCalculator::new(backends.rates),
            ledger: WalletLedger::new(backends.wallets, currencies.clone()),
            recorder: TransactionRecorder::new(backends.transactions, currencies),
            metrics: Arc::new(Metrics::new()),
            config,
        }
    }

    /// Create a service on process-memory stores.
    pub fn in_memory(config: ServiceConfig) -> Self {
        Self::new(config, Backends::in_memory())
    }

    /// Seed the configured pairs and start background fluctuation.
    ///
    /// Only the first call from `Starting` proceeds; the state is claimed
    /// before seeding and handed back if seeding fails.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != ServiceState::Starting {
                return Err(RatebookError::InvalidState(format!(
                    "service cannot start from {:?}",
                    *state
                )));
            }
            *state = ServiceState::Running;
        }

        let inserted = match self.rates.seed(&self.config.rates.seeds).await {
            Ok(inserted) => inserted,
            Err(e) => {
                let mut state = self.state.write();
                if *state == ServiceState::Running {
                    *state = ServiceState::Starting;
                }
                return Err(e);
            }
        };

        let handle = self.fluctuator.clone().spawn();
        let stopped_meanwhile = {
            let mut slot = self.fluctuation.lock();
            if self.state().is_operational() {
                *slot = Some(handle);
                None
            } else {
                Some(handle)
            }
        };
        if let Some(handle) = stopped_meanwhile {
            handle.shutdown().await;
            return Err(RatebookError::InvalidState(
                "service was stopped while starting".to_string(),
            ));
        }

        info!(
            seeded = inserted,
            interval_secs = self.config.rates.fluctuation_interval.as_secs(),
            "Exchange service started"
        );
        Ok(())
    }

    /// Cancel fluctuation and wait for the task to exit.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        {
            let mut state = self.state.write();
            if state.is_terminal() {
                return;
            }
            *state = ServiceState::ShuttingDown;
        }

        let handle = self.fluctuation.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }

        *self.state.write() = ServiceState::Stopped;
        info!("Exchange service stopped");
    }

    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    // ---- Rates ----

    /// Every rate record, ordered by pair.
    pub async fn get_rates(&self) -> Result<Vec<ExchangeRate>> {
        let mut rates: Vec<ExchangeRate> = self.rates.get_all().await?.into_values().collect();
        rates.sort_by(|a, b| a.pair.cmp(&b.pair));
        Ok(rates)
    }

    /// Quote a conversion at the current rate.
    pub async fn calculate_exchange(
        &self,
        from: &Currency,
        to: &Currency,
        amount: Decimal,
    ) -> Result<Quote> {
        self.calculator.calculate(from, to, amount).await
    }

    /// Administrative rate override.
    #[instrument(skip(self))]
    pub async fn update_rate(
        &self,
        from: &Currency,
        to: &Currency,
        rate: Decimal,
    ) -> Result<ExchangeRate> {
        let pair = CurrencyPair::new(from.clone(), to.clone());
        let updated = self.rates.set_rate(&pair, rate).await?;

        self.metrics.rate_override();
        self.feed.publish(updated.clone());
        info!(pair = %pair, rate = %updated.rate, "Exchange rate overridden");
        Ok(updated)
    }

    /// Administrative spread override.
    #[instrument(skip(self))]
    pub async fn update_spread(
        &self,
        from: &Currency,
        to: &Currency,
        spread: Decimal,
    ) -> Result<ExchangeRate> {
        let pair = CurrencyPair::new(from.clone(), to.clone());
        let updated = self.rates.set_spread(&pair, spread).await?;

        self.metrics.rate_override();
        self.feed.publish(updated.clone());
        info!(pair = %pair, spread = %updated.spread, "Spread overridden");
        Ok(updated)
    }

    /// Receive every committed rate change from now on.
    pub fn subscribe_rates(&self) -> broadcast::Receiver<ExchangeRate> {
        self.feed.subscribe()
    }

    /// Run one fluctuation pass immediately, outside the schedule.
    pub async fn fluctuate_now(&self) -> TickReport {
        self.fluctuator.tick().await
    }

    // ---- Wallets ----

    pub async fn open_wallet(&self, user_id: UserId) -> Result<Wallet> {
        self.ledger.open_wallet(user_id).await
    }

    pub async fn get_wallet(&self, user_id: UserId) -> Result<Wallet> {
        self.ledger.get_wallet(user_id).await
    }

    pub async fn deposit(
        &self,
        user_id: UserId,
        currency: &Currency,
        amount: Decimal,
        description: &str,
    ) -> Result<WalletLedgerEntry> {
        let entry = self
            .ledger
            .deposit(user_id, currency, amount, description)
            .await?;
        self.metrics.deposit();
        Ok(entry)
    }

    pub async fn withdraw(
        &self,
        user_id: UserId,
        currency: &Currency,
        amount: Decimal,
        description: &str,
    ) -> Result<WalletLedgerEntry> {
        match self
            .ledger
            .withdraw(user_id, currency, amount, description)
            .await
        {
            Ok(entry) => {
                self.metrics.withdrawal();
                Ok(entry)
            }
            Err(e) => {
                if matches!(e, RatebookError::InsufficientBalance { .. }) {
                    self.metrics.withdrawal_rejected();
                }
                Err(e)
            }
        }
    }

    /// Ledger entries, newest first. `limit` defaults to the user page size.
    pub async fn get_history(
        &self,
        user_id: UserId,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<WalletLedgerEntry>> {
        let page = Page::new(limit.unwrap_or(self.config.ledger.user_page_limit), offset);
        self.ledger.history(user_id, page).await
    }

    /// Check that the wallet's balances match a replay of its ledger.
    pub async fn verify_wallet(&self, user_id: UserId) -> Result<WalletAudit> {
        self.ledger.verify(user_id).await
    }

    // ---- Orders ----

    /// Record an order from a caller-supplied snapshot.
    pub async fn create_transaction(
        &self,
        user_id: UserId,
        from: &Currency,
        to: &Currency,
        from_amount: Decimal,
        to_amount: Decimal,
        exchange_rate: Decimal,
    ) -> Result<Transaction> {
        let transaction = self
            .recorder
            .create_transaction(user_id, from, to, from_amount, to_amount, exchange_rate)
            .await?;
        self.metrics.order_created();
        Ok(transaction)
    }

    /// Quote at the current rate and record the order in one call.
    #[instrument(skip(self))]
    pub async fn place_order(
        &self,
        user_id: UserId,
        from: &Currency,
        to: &Currency,
        amount: Decimal,
    ) -> Result<Transaction> {
        let quote = self.calculator.calculate(from, to, amount).await?;
        let transaction = self.recorder.record_quote(user_id, &quote).await?;
        self.metrics.order_created();
        Ok(transaction)
    }

    pub async fn get_transaction(&self, id: TransactionId, user_id: UserId) -> Result<Transaction> {
        self.recorder.get_transaction(id, user_id).await
    }

    pub async fn list_for_user(
        &self,
        user_id: UserId,
        limit: Option<usize>,
        offset: usize,
    ) -> Result<Vec<Transaction>> {
        let page = Page::new(limit.unwrap_or(self.config.ledger.user_page_limit), offset);
        self.recorder.list_for_user(user_id, page).await
    }

    pub async fn list_all(&self, limit: Option<usize>, offset: usize) -> Result<Vec<Transaction>> {
        let page = Page::new(limit.unwrap_or(self.config.ledger.admin_page_limit), offset);
        self.recorder.list_all(page).await
    }

    /// Complete or reject an order. Wallets are not touched.
    pub async fn update_status(
        &self,
        id: TransactionId,
        status: TransactionStatus,
        notes: Option<String>,
    ) -> Result<Transaction> {
        let (transaction, transition) = self.recorder.update_status(id, status, notes).await?;
        if transition == Transition::Apply {
            match transaction.status {
                TransactionStatus::Completed => self.metrics.order_completed(),
                TransactionStatus::Rejected => self.metrics.order_rejected(),
                TransactionStatus::Pending => {}
            }
        }
        Ok(transaction)
    }

    pub async fn attach_payment_proof(
        &self,
        id: TransactionId,
        user_id: UserId,
        proof: &str,
    ) -> Result<Transaction> {
        self.recorder.attach_payment_proof(id, user_id, proof).await
    }

    /// Current counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot(&self.fluctuator.stats())
    }
}
