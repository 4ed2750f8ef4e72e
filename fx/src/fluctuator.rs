//! Background rate fluctuation.
//!
//! Every interval each pair in the store is nudged by a uniform random
//! fraction in `[-max_step, +max_step]`, clamped against the pre-perturbation
//! rate, and committed through [`RateStore::replace_rate`] so a write that
//! landed since the snapshot is kept. Failures are logged and skipped; the
//! task only stops when its handle asks it to.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use ratebook_common::RATE_DECIMALS;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::feed::RateFeed;
use crate::store::RateStore;

/// Resolution of the random draw: steps of 0.000001.
const DRAW_SCALE: u32 = 6;

/// Configuration for the fluctuation task.
#[derive(Debug, Clone)]
pub struct FluctuationConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Largest fractional move drawn per tick (0.005 = ±0.5%).
    pub max_step: Decimal,
    /// Clamp band around the pre-perturbation rate (0.05 = ±5%).
    pub clamp: Decimal,
}

impl Default for FluctuationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_step: Decimal::new(5, 3),
            clamp: Decimal::new(5, 2),
        }
    }
}

/// Apply one perturbation to `rate`.
///
/// `candidate = rate × (1 + delta)` is clamped to `[rate × (1 − clamp), rate × (1 + clamp)]`.
/// The change is then truncated toward the old rate at 4 fractional digits,
/// so the result never moves further than the candidate did.
pub fn perturb(rate: Decimal, delta: Decimal, clamp: Decimal) -> Decimal {
    let candidate = rate * (Decimal::ONE + delta);
    let floor = rate * (Decimal::ONE - clamp);
    let ceiling = rate * (Decimal::ONE + clamp);
    let clamped = candidate.clamp(floor, ceiling);

    let step = (clamped - rate).round_dp_with_strategy(RATE_DECIMALS, RoundingStrategy::ToZero);
    rate + step
}

/// Outcome of one tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Pairs committed.
    pub updated: usize,
    /// Pairs whose commit failed.
    pub failed: usize,
    /// Pairs left alone because another write landed during the tick.
    pub skipped: usize,
    /// The snapshot read itself failed; nothing was attempted.
    pub snapshot_failed: bool,
}

/// Fluctuation counters.
#[derive(Debug, Clone, Default)]
pub struct FluctuationStats {
    pub ticks: u64,
    pub pairs_updated: u64,
    pub pair_failures: u64,
    pub pairs_skipped: u64,
    pub snapshot_failures: u64,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    pairs_updated: AtomicU64,
    pair_failures: AtomicU64,
    pairs_skipped: AtomicU64,
    snapshot_failures: AtomicU64,
}

/// Periodically perturbs every pair in a [`RateStore`].
pub struct RateFluctuator {
    store: Arc<dyn RateStore>,
    feed: Option<RateFeed>,
    rng: Mutex<StdRng>,
    counters: Counters,
    config: FluctuationConfig,
}

impl RateFluctuator {
    /// Create a fluctuator seeded from OS entropy.
    pub fn new(store: Arc<dyn RateStore>, config: FluctuationConfig) -> Self {
        Self {
            store,
            feed: None,
            rng: Mutex::new(StdRng::from_entropy()),
            counters: Counters::default(),
            config,
        }
    }

    /// Use a deterministic random sequence.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Publish every committed record on `feed`.
    pub fn with_feed(mut self, feed: RateFeed) -> Self {
        self.feed = Some(feed);
        self
    }

    /// Get the configuration.
    pub fn config(&self) -> &FluctuationConfig {
        &self.config
    }

    /// Draw a uniform fraction in `[-max_step, +max_step]`.
    fn draw_delta(&self) -> Decimal {
        let bound = (self.config.max_step * Decimal::from(10i64.pow(DRAW_SCALE)))
            .trunc()
            .to_i64()
            .unwrap_or(0)
            .abs();
        let steps = self.rng.lock().gen_range(-bound..=bound);
        Decimal::new(steps, DRAW_SCALE)
    }

    /// Run one fluctuation pass over every pair.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> TickReport {
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);
        let mut report = TickReport::default();

        let rates = match self.store.get_all().await {
            Ok(rates) => rates,
            Err(e) => {
                error!(error = %e, "Failed to read rates for fluctuation");
                self.counters.snapshot_failures.fetch_add(1, Ordering::Relaxed);
                report.snapshot_failed = true;
                return report;
            }
        };

        for (pair, current) in rates {
            let delta = self.draw_delta();
            let next = perturb(current.rate, delta, self.config.clamp);

            match self.store.replace_rate(&current, next).await {
                Ok(Some(updated)) => {
                    debug!(
                        pair = %pair,
                        old = %current.rate,
                        new = %updated.rate,
                        delta = %delta,
                        "Rate fluctuated"
                    );
                    report.updated += 1;
                    if let Some(feed) = &self.feed {
                        feed.publish(updated);
                    }
                }
                Ok(None) => {
                    debug!(pair = %pair, "Rate changed during tick, leaving it");
                    report.skipped += 1;
                }
                Err(e) => {
                    warn!(pair = %pair, error = %e, "Failed to update rate, skipping pair");
                    report.failed += 1;
                }
            }
        }

        self.counters
            .pairs_updated
            .fetch_add(report.updated as u64, Ordering::Relaxed);
        self.counters
            .pair_failures
            .fetch_add(report.failed as u64, Ordering::Relaxed);
        self.counters
            .pairs_skipped
            .fetch_add(report.skipped as u64, Ordering::Relaxed);

        report
    }

    /// Get counters accumulated since creation.
    pub fn stats(&self) -> FluctuationStats {
        FluctuationStats {
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            pairs_updated: self.counters.pairs_updated.load(Ordering::Relaxed),
            pair_failures: self.counters.pair_failures.load(Ordering::Relaxed),
            pairs_skipped: self.counters.pairs_skipped.load(Ordering::Relaxed),
            snapshot_failures: self.counters.snapshot_failures.load(Ordering::Relaxed),
        }
    }

    /// Start the repeating task. The first tick fires one interval from now.
    pub fn spawn(self: Arc<Self>) -> FluctuatorHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let interval = self.config.interval;

        let join = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Starting rate fluctuation");

            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.tick().await;
                        debug!(
                            updated = report.updated,
                            failed = report.failed,
                            skipped = report.skipped,
                            snapshot_failed = report.snapshot_failed,
                            "Fluctuation tick finished"
                        );
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }

            info!("Rate fluctuation stopped");
        });

        FluctuatorHandle { shutdown_tx, join }
    }
}

/// Handle to a running fluctuation task.
///
/// Dropping the handle also stops the task at its next wake-up.
pub struct FluctuatorHandle {
    shutdown_tx: mpsc::Sender<()>,
    join: JoinHandle<()>,
}

impl FluctuatorHandle {
    /// Signal the task to stop and wait for it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.join.await {
            error!(error = %e, "Fluctuation task ended abnormally");
        }
    }
}
