//! Service configuration.

use std::str::FromStr;
use std::time::Duration;

use ratebook_common::{
    Currency, CurrencySet, DEFAULT_ADMIN_PAGE_LIMIT, DEFAULT_USER_PAGE_LIMIT,
};
use ratebook_fx::rate::default_spread;
use ratebook_fx::{FluctuationConfig, RateSeed};
use rust_decimal::Decimal;

/// Rate table and fluctuation configuration.
#[derive(Debug, Clone)]
pub struct RatesConfig {
    /// Pairs created on first start when absent.
    pub seeds: Vec<RateSeed>,
    /// Spread given to every seeded pair.
    pub default_spread: Decimal,
    /// Time between fluctuation ticks.
    pub fluctuation_interval: Duration,
    /// Largest fractional move per tick.
    pub max_step: Decimal,
    /// Clamp band around the pre-perturbation rate.
    pub clamp: Decimal,
}

impl Default for RatesConfig {
    fn default() -> Self {
        let fluctuation = FluctuationConfig::default();
        Self {
            seeds: RateSeed::defaults(),
            default_spread: default_spread(),
            fluctuation_interval: fluctuation.interval,
            max_step: fluctuation.max_step,
            clamp: fluctuation.clamp,
        }
    }
}

impl RatesConfig {
    /// Fluctuator settings derived from this configuration.
    pub fn fluctuation(&self) -> FluctuationConfig {
        FluctuationConfig {
            interval: self.fluctuation_interval,
            max_step: self.max_step,
            clamp: self.clamp,
        }
    }
}

/// Wallet and listing configuration.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Currencies wallets hold and orders may use.
    pub currencies: CurrencySet,
    /// Page size when a user listing gives no limit.
    pub user_page_limit: usize,
    /// Page size when an administrative listing gives no limit.
    pub admin_page_limit: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            currencies: CurrencySet::default(),
            user_page_limit: DEFAULT_USER_PAGE_LIMIT,
            admin_page_limit: DEFAULT_ADMIN_PAGE_LIMIT,
        }
    }
}

/// Which storage backend to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StorageBackend::Memory),
            "postgres" | "postgresql" => Ok(StorageBackend::Postgres),
            other => Err(format!("Unknown storage backend: {}", other)),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Database URL, used by the Postgres backend.
    pub database_url: String,
    /// Connection pool size.
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            database_url: String::new(),
            max_connections: 20,
        }
    }
}

/// Main service configuration.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    pub rates: RatesConfig,
    pub ledger: LedgerConfig,
    pub storage: StorageConfig,
    /// Log level used when `RUST_LOG` is unset.
    pub log_level: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup, starting from the defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(codes) = lookup("RATEBOOK_CURRENCIES") {
            config.ledger.currencies = CurrencySet::new(
                codes
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(Currency::new),
            );
        }

        if let Some(secs) = lookup("RATEBOOK_FLUCTUATION_INTERVAL_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .map_err(|_| format!("Invalid fluctuation interval: {}", secs))?;
            config.rates.fluctuation_interval = Duration::from_secs(secs);
        }

        if let Some(spread) = lookup("RATEBOOK_DEFAULT_SPREAD") {
            config.rates.default_spread = spread
                .trim()
                .parse()
                .map_err(|_| format!("Invalid default spread: {}", spread))?;
        }

        if let Some(seeds) = lookup("RATEBOOK_SEED_RATES") {
            config.rates.seeds = parse_seed_rates(&seeds)?;
        }
        let spread = config.rates.default_spread;
        config.rates.seeds = config
            .rates
            .seeds
            .into_iter()
            .map(|seed| seed.with_spread(spread))
            .collect();

        if let Some(backend) = lookup("RATEBOOK_STORAGE") {
            config.storage.backend = backend.parse()?;
        }

        if let Some(url) = lookup("DATABASE_URL") {
            config.storage.database_url = url;
        }

        if let Some(max) = lookup("RATEBOOK_DB_MAX_CONNECTIONS") {
            config.storage.max_connections = max
                .trim()
                .parse()
                .map_err(|_| format!("Invalid max connections: {}", max))?;
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = Some(level);
        }

        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        let currencies = &self.ledger.currencies;
        if currencies.len() < 2 {
            return Err("At least two supported currencies are required".to_string());
        }

        if self.rates.fluctuation_interval.is_zero() {
            return Err("Fluctuation interval cannot be 0".to_string());
        }

        if self.rates.default_spread < Decimal::ZERO || self.rates.default_spread >= Decimal::ONE {
            return Err(format!(
                "Default spread must be in [0, 1), got {}",
                self.rates.default_spread
            ));
        }

        for seed in &self.rates.seeds {
            if !currencies.contains(&seed.pair.from) || !currencies.contains(&seed.pair.to) {
                return Err(format!("Seed pair {} uses an unsupported currency", seed.pair));
            }
            if seed.pair.is_degenerate() {
                return Err(format!("Seed pair {} converts a currency into itself", seed.pair));
            }
            if seed.rate <= Decimal::ZERO {
                return Err(format!("Seed rate for {} must be positive", seed.pair));
            }
        }

        if self.ledger.user_page_limit == 0 || self.ledger.admin_page_limit == 0 {
            return Err("Default page limits cannot be 0".to_string());
        }

        if self.storage.backend == StorageBackend::Postgres {
            if self.storage.database_url.is_empty() {
                return Err("Database URL cannot be empty".to_string());
            }
            if self.storage.max_connections == 0 {
                return Err("Max connections cannot be 0".to_string());
            }
        }

        Ok(())
    }
}

/// Parse `FROM:TO:RATE` entries separated by commas.
fn parse_seed_rates(value: &str) -> Result<Vec<RateSeed>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split(':').map(str::trim).collect();
            match parts.as_slice() {
                [from, to, rate] => {
                    let rate: Decimal = rate
                        .parse()
                        .map_err(|_| format!("Invalid seed rate in '{}'", entry))?;
                    Ok(RateSeed::new(Currency::new(*from), Currency::new(*to), rate))
                }
                _ => Err(format!("Seed rate '{}' must look like FROM:TO:RATE", entry)),
            }
        })
        .collect()
}
