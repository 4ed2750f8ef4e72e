//! Operation counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ratebook_fx::FluctuationStats;
use serde::Serialize;

/// Service metrics.
#[derive(Default)]
pub struct Metrics {
    pub deposits: AtomicU64,
    pub withdrawals: AtomicU64,
    /// Withdrawals refused for insufficient balance.
    pub withdrawals_rejected: AtomicU64,
    pub orders_created: AtomicU64,
    pub orders_completed: AtomicU64,
    pub orders_rejected: AtomicU64,
    /// Admin rate and spread overrides.
    pub rate_overrides: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deposit(&self) {
        self.deposits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn withdrawal(&self) {
        self.withdrawals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn withdrawal_rejected(&self) {
        self.withdrawals_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn order_created(&self) {
        self.orders_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn order_completed(&self) {
        self.orders_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn order_rejected(&self) {
        self.orders_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rate_override(&self) {
        self.rate_overrides.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics snapshot, including the fluctuator's counters.
    pub fn snapshot(&self, fluctuation: &FluctuationStats) -> MetricsSnapshot {
        MetricsSnapshot {
            deposits: self.deposits.load(Ordering::Relaxed),
            withdrawals: self.withdrawals.load(Ordering::Relaxed),
            withdrawals_rejected: self.withdrawals_rejected.load(Ordering::Relaxed),
            orders_created: self.orders_created.load(Ordering::Relaxed),
            orders_completed: self.orders_completed.load(Ordering::Relaxed),
            orders_rejected: self.orders_rejected.load(Ordering::Relaxed),
            rate_overrides: self.rate_overrides.load(Ordering::Relaxed),
            fluctuation_ticks: fluctuation.ticks,
            fluctuation_failures: fluctuation.pair_failures + fluctuation.snapshot_failures,
        }
    }
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub deposits: u64,
    pub withdrawals: u64,
    pub withdrawals_rejected: u64,
    pub orders_created: u64,
    pub orders_completed: u64,
    pub orders_rejected: u64,
    pub rate_overrides: u64,
    pub fluctuation_ticks: u64,
    pub fluctuation_failures: u64,
}

impl MetricsSnapshot {
    /// Export in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let counters = [
            ("deposits_total", "Successful deposits", self.deposits),
            ("withdrawals_total", "Successful withdrawals", self.withdrawals),
            (
                "withdrawals_rejected_total",
                "Withdrawals refused for insufficient balance",
                self.withdrawals_rejected,
            ),
            ("orders_created_total", "Exchange orders recorded", self.orders_created),
            ("orders_completed_total", "Exchange orders completed", self.orders_completed),
            ("orders_rejected_total", "Exchange orders rejected", self.orders_rejected),
            ("rate_overrides_total", "Administrative rate or spread changes", self.rate_overrides),
            ("fluctuation_ticks_total", "Rate fluctuation ticks run", self.fluctuation_ticks),
            (
                "fluctuation_failures_total",
                "Rate fluctuation reads or writes that failed",
                self.fluctuation_failures,
            ),
        ];

        let mut out = String::new();
        for (name, help, value) in counters {
            out.push_str(&format!(
                "# HELP ratebook_{name} {help}\n# TYPE ratebook_{name} counter\nratebook_{name} {value}\n\n"
            ));
        }
        out
    }
}

/// Shared metrics instance.
pub type SharedMetrics = Arc<Metrics>;
