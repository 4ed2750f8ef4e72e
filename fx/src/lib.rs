//! Ratebook FX Engine
//!
//! Exchange-rate table, autonomous rate fluctuation and spread-adjusted quoting.
//!
//! # Features
//!
//! - Swappable rate storage behind the [`RateStore`] trait
//! - Background fluctuation task with bounded per-tick moves
//! - Pure, spread-adjusted conversion quotes
//! - Broadcast feed of committed rate changes
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ratebook_fx::{ExchangeCalculator, MemoryRateStore, RateSeed};
//! use ratebook_common::Currency;
//!
//! let store = Arc::new(MemoryRateStore::new());
//! store.seed(&RateSeed::defaults()).await?;
//!
//! let calculator = ExchangeCalculator::new(store);
//! let quote = calculator.calculate(&Currency::bdt(), &Currency::inr(), dec!(1000)).await?;
//! ```

pub mod rate;
pub mod store;
pub mod feed;
pub mod fluctuator;
pub mod calculator;

pub use rate::{ExchangeRate, RateSeed};
pub use store::{MemoryRateStore, RateStore, SharedRateStore};
pub use feed::RateFeed;
pub use fluctuator::{perturb, FluctuationConfig, FluctuationStats, FluctuatorHandle, RateFluctuator, TickReport};
pub use calculator::{ExchangeCalculator, Quote};
