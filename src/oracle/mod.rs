//! Price Oracle
//!
//! The settlement engine and trading service price assets through this
//! interface. A live feed, a cache-backed feed and the built-in simulator
//! all look the same from the caller's side; failure is always recoverable
//! (callers fall back per the settlement rules).

pub mod simulated;

pub use simulated::SimulatedFeed;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

/// Price oracle errors.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("No price available for {0}")]
    Unavailable(String),
}

/// A pluggable source of current asset prices.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Current price for an asset symbol.
    async fn get_price(&self, symbol: &str) -> Result<Decimal, OracleError>;

    /// 24h change in percent, if the feed tracks it. Used by the payout
    /// calculator to classify volatility.
    async fn change_24h(&self, _symbol: &str) -> Option<Decimal> {
        None
    }

    /// Feed name for logging.
    fn name(&self) -> &str;
}
