use rust_decimal::Decimal;
use std::env;
use std::time::Duration;

use crate::services::{SettlementConfig, TradingConfig};
use crate::types::OpeningBalances;

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database path.
    pub database_path: String,
    /// Seconds between settlement sweeps.
    pub sweep_interval_secs: u64,
    /// Upper bound on a single oracle read (ms).
    pub oracle_timeout_ms: u64,
    /// Bound of the synthetic fallback-price jitter (fraction of price).
    pub fallback_jitter: f64,
    /// Opening real-funds balance for lazily created wallets.
    pub opening_balance: Decimal,
    /// Opening demo balance for lazily created wallets.
    pub opening_demo_balance: Decimal,
    /// Minimum stake per trade.
    pub min_stake: Decimal,
    /// Maximum stake per trade.
    pub max_stake: Decimal,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            database_path: env::var("STRIKE_DB").unwrap_or_else(|_| "strike.db".to_string()),
            sweep_interval_secs: env::var("SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10),
            oracle_timeout_ms: env::var("ORACLE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5_000),
            fallback_jitter: env::var("FALLBACK_JITTER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.005),
            opening_balance: env::var("OPENING_BALANCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| Decimal::from(1000)),
            opening_demo_balance: env::var("OPENING_DEMO_BALANCE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| Decimal::from(10000)),
            min_stake: env::var("MIN_STAKE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(Decimal::ONE),
            max_stake: env::var("MAX_STAKE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| Decimal::from(10000)),
        }
    }

    pub fn opening_balances(&self) -> OpeningBalances {
        OpeningBalances {
            real: self.opening_balance,
            demo: self.opening_demo_balance,
        }
    }

    pub fn settlement(&self) -> SettlementConfig {
        SettlementConfig {
            oracle_timeout: Duration::from_millis(self.oracle_timeout_ms),
            fallback_jitter: self.fallback_jitter,
        }
    }

    pub fn trading(&self) -> TradingConfig {
        TradingConfig {
            min_stake: self.min_stake,
            max_stake: self.max_stake,
            oracle_timeout: Duration::from_millis(self.oracle_timeout_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: "strike.db".to_string(),
            sweep_interval_secs: 10,
            oracle_timeout_ms: 5_000,
            fallback_jitter: 0.005,
            opening_balance: Decimal::from(1000),
            opening_demo_balance: Decimal::from(10000),
            min_stake: Decimal::ONE,
            max_stake: Decimal::from(10000),
        }
    }
}
