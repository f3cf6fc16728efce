//! Strike - binary-options trading simulator core
//!
//! Trade lifecycle and settlement: users place time-boxed call/put bets on
//! asset prices; the settlement engine drives each expired trade to a
//! terminal outcome exactly once and reconciles the wallet ledger
//! atomically. The web layer, auth and deposit workflows live elsewhere and
//! call in through `TradingService` and `SettlementEngine`.

pub mod config;
pub mod oracle;
pub mod services;
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use oracle::{OracleError, PriceOracle, SimulatedFeed};
pub use services::{
    Ledger, PayoutCalculator, SettlementEngine, SqliteStore, TradeStore, TradingService,
};
pub use types::*;
