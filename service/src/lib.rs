//! Ratebook Service
//!
//! Composes the rate table, fluctuator, calculator, wallet ledger and order
//! recorder behind one facade, and hosts the `ratebook` binary.

pub mod config;
pub mod metrics;
pub mod service;
pub mod state;

pub use config::{LedgerConfig, RatesConfig, ServiceConfig, StorageBackend, StorageConfig};
pub use metrics::{Metrics, MetricsSnapshot, SharedMetrics};
pub use service::{Backends, ExchangeService};
pub use state::ServiceState;
