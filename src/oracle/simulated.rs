//! Simulated price feed.
//!
//! Drives demo environments and tests without a live market-data provider:
//! each symbol starts from a fixed reference price and random-walks within
//! its configured volatility on every read. The walk is retained across
//! calls so consecutive reads look like a moving market rather than noise
//! around a constant.

use crate::oracle::{OracleError, PriceOracle};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;

/// Reference prices per symbol (decimal strings, parsed on first use).
const REFERENCE_PRICES: &[(&str, &str)] = &[
    ("EURUSD", "1.08450"),
    ("GBPUSD", "1.26320"),
    ("USDJPY", "148.750"),
    ("USDCAD", "1.35200"),
    ("AUDUSD", "0.65310"),
    ("BTCUSD", "43250.00"),
    ("ETHUSD", "2650.00"),
    ("ADAUSD", "0.59800"),
    ("DOTUSD", "7.41000"),
    ("XAUUSD", "2025.50"),
    ("XAGUSD", "22.870"),
    ("CRUDE", "78.45"),
    ("NGAS", "2.563"),
    ("SPX500", "4750.00"),
    ("NASDAQ", "15200.00"),
    ("DOW", "37650.00"),
];

/// Per-read volatility bounds per symbol (fraction of price).
const VOLATILITY: &[(&str, f64)] = &[
    ("EURUSD", 0.001),
    ("GBPUSD", 0.0015),
    ("USDJPY", 0.002),
    ("USDCAD", 0.001),
    ("AUDUSD", 0.0015),
    ("BTCUSD", 0.02),
    ("ETHUSD", 0.025),
    ("ADAUSD", 0.025),
    ("DOTUSD", 0.025),
    ("XAUUSD", 0.01),
    ("XAGUSD", 0.012),
    ("CRUDE", 0.015),
    ("NGAS", 0.02),
    ("SPX500", 0.008),
    ("NASDAQ", 0.01),
    ("DOW", 0.008),
];

const DEFAULT_VOLATILITY: f64 = 0.01;

/// Random-walk price simulator.
pub struct SimulatedFeed {
    /// Last walked price per symbol.
    prices: DashMap<String, Decimal>,
}

impl SimulatedFeed {
    pub fn new() -> Self {
        Self {
            prices: DashMap::new(),
        }
    }

    /// Static reference price for a symbol; unknown symbols get 100.00.
    ///
    /// Also used by the trading service as the placement fallback when the
    /// live oracle is down.
    pub fn reference_price(symbol: &str) -> Decimal {
        REFERENCE_PRICES
            .iter()
            .find(|(s, _)| s.eq_ignore_ascii_case(symbol))
            .and_then(|(_, p)| p.parse().ok())
            .unwrap_or(Decimal::ONE_HUNDRED)
    }

    fn volatility(symbol: &str) -> f64 {
        VOLATILITY
            .iter()
            .find(|(s, _)| s.eq_ignore_ascii_case(symbol))
            .map(|(_, v)| *v)
            .unwrap_or(DEFAULT_VOLATILITY)
    }

    /// Advance the walk for a symbol and return the new price.
    fn step(&self, symbol: &str) -> Decimal {
        let key = symbol.to_uppercase();
        let vol = Self::volatility(&key);
        let change: f64 = rand::thread_rng().gen_range(-vol..=vol);
        let factor = Decimal::ONE + Decimal::from_f64(change).unwrap_or(Decimal::ZERO);

        let mut entry = self
            .prices
            .entry(key)
            .or_insert_with(|| Self::reference_price(symbol));
        let next = (*entry.value() * factor).round_dp(5);
        *entry.value_mut() = next;
        next
    }
}

impl Default for SimulatedFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceOracle for SimulatedFeed {
    async fn get_price(&self, symbol: &str) -> Result<Decimal, OracleError> {
        if symbol.trim().is_empty() {
            return Err(OracleError::Unavailable(symbol.to_string()));
        }
        Ok(self.step(symbol))
    }

    async fn change_24h(&self, symbol: &str) -> Option<Decimal> {
        // Drift of the walk relative to the reference stands in for a real
        // 24h change.
        let reference = Self::reference_price(symbol);
        let current = self
            .prices
            .get(&symbol.to_uppercase())
            .map(|p| *p.value())
            .unwrap_or(reference);
        if reference.is_zero() {
            return None;
        }
        Some(((current - reference) / reference * Decimal::ONE_HUNDRED).round_dp(2))
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prices_stay_within_volatility_bounds() {
        let feed = SimulatedFeed::new();
        let reference = SimulatedFeed::reference_price("EURUSD");

        let mut last = reference;
        for _ in 0..50 {
            let price = feed.get_price("EURUSD").await.unwrap();
            let max_step = last * Decimal::from_f64(0.0011).unwrap();
            assert!((price - last).abs() <= max_step, "step exceeded volatility");
            assert!(price > Decimal::ZERO);
            last = price;
        }
    }

    #[tokio::test]
    async fn test_walk_persists_between_calls() {
        let feed = SimulatedFeed::new();
        let first = feed.get_price("BTCUSD").await.unwrap();
        let second = feed.get_price("BTCUSD").await.unwrap();
        // The second step walks from the first, not from the reference.
        let max_step = first * Decimal::from_f64(0.021).unwrap();
        assert!((second - first).abs() <= max_step);
    }

    #[tokio::test]
    async fn test_unknown_symbol_uses_default_reference() {
        assert_eq!(SimulatedFeed::reference_price("XYZ"), Decimal::ONE_HUNDRED);
        let feed = SimulatedFeed::new();
        assert!(feed.get_price("XYZ").await.is_ok());
    }

    #[tokio::test]
    async fn test_empty_symbol_is_unavailable() {
        let feed = SimulatedFeed::new();
        assert!(feed.get_price("").await.is_err());
    }

    #[tokio::test]
    async fn test_change_24h_reflects_drift() {
        let feed = SimulatedFeed::new();
        // Before any reads the drift is zero.
        assert_eq!(feed.change_24h("EURUSD").await, Some(Decimal::ZERO));
        feed.get_price("EURUSD").await.unwrap();
        assert!(feed.change_24h("EURUSD").await.is_some());
    }
}
