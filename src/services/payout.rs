//! Payout Calculator
//!
//! Computes the payout percentage quoted at placement: per-asset base rate,
//! adjusted for current volatility, time to expiry and market session, then
//! clamped to a sane band. The percentage is stored on the trade so
//! settlement never re-derives it.

use crate::oracle::PriceOracle;
use async_trait::async_trait;
use chrono::Timelike;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::debug;

/// Payout percentage source. Implementations must return a value in
/// [0, 100]; the value is the percent of stake paid as profit on a win.
#[async_trait]
pub trait PayoutCalculator: Send + Sync {
    async fn payout_percentage(&self, asset: &str, expiry_minutes: i64) -> Decimal;
}

/// Base payouts in tenths of a percent (85.0% == 850).
const BASE_PAYOUTS: &[(&str, i64)] = &[
    // Forex - lower volatility, higher payouts
    ("EURUSD", 850),
    ("GBPUSD", 830),
    ("USDJPY", 840),
    ("USDCAD", 820),
    ("AUDUSD", 810),
    // Crypto - higher volatility, variable payouts
    ("BTCUSD", 780),
    ("ETHUSD", 760),
    ("ADAUSD", 750),
    ("DOTUSD", 740),
    // Commodities
    ("XAUUSD", 800),
    ("XAGUSD", 790),
    ("CRUDE", 770),
    ("NGAS", 760),
    // Indices
    ("SPX500", 820),
    ("NASDAQ", 810),
    ("DOW", 830),
];

const DEFAULT_BASE_PAYOUT: i64 = 750;

/// Expiry-time adjustments in tenths of a percent.
const TIME_ADJUSTMENTS: &[(i64, i64)] = &[
    (1, -20),
    (5, 0),
    (15, 10),
    (30, 20),
    (60, 30),
    (240, 25),
    (1440, 10),
];

const FOREX_ASSETS: &[&str] = &["EURUSD", "GBPUSD", "USDJPY", "USDCAD", "AUDUSD"];
const CRYPTO_ASSETS: &[&str] = &["BTCUSD", "ETHUSD", "ADAUSD", "DOTUSD"];

/// Volatility classification from the 24h change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolatilityLevel {
    Low,
    Medium,
    High,
    Extreme,
}

impl VolatilityLevel {
    /// Classify from an absolute 24h change in percent.
    pub fn classify(change_pct: Decimal) -> Self {
        let change = change_pct.abs();
        if change < Decimal::new(5, 1) {
            VolatilityLevel::Low
        } else if change < Decimal::new(15, 1) {
            VolatilityLevel::Medium
        } else if change < Decimal::from(3) {
            VolatilityLevel::High
        } else {
            VolatilityLevel::Extreme
        }
    }

    /// Payout adjustment in tenths of a percent. Calm markets pay more.
    fn adjustment_tenths(&self) -> i64 {
        match self {
            VolatilityLevel::Low => 20,
            VolatilityLevel::Medium => 0,
            VolatilityLevel::High => -30,
            VolatilityLevel::Extreme => -50,
        }
    }
}

/// Payout calculator driven by base rates, volatility, expiry and session.
pub struct VolatilityPayout {
    oracle: Arc<dyn PriceOracle>,
}

impl VolatilityPayout {
    pub fn new(oracle: Arc<dyn PriceOracle>) -> Self {
        Self { oracle }
    }

    fn base_payout(asset: &str) -> Decimal {
        let tenths = BASE_PAYOUTS
            .iter()
            .find(|(a, _)| a.eq_ignore_ascii_case(asset))
            .map(|(_, p)| *p)
            .unwrap_or(DEFAULT_BASE_PAYOUT);
        Decimal::new(tenths, 1)
    }

    fn time_adjustment(expiry_minutes: i64) -> Decimal {
        let tenths = TIME_ADJUSTMENTS
            .iter()
            .find(|(m, _)| *m == expiry_minutes)
            .map(|(_, a)| *a)
            .unwrap_or(0);
        Decimal::new(tenths, 1)
    }

    /// Session adjustment: forex pays more in the London/NY overlap, listed
    /// markets pay less after hours, crypto never closes.
    fn market_hours_adjustment(asset: &str, utc_hour: u32) -> Decimal {
        let upper = asset.to_uppercase();
        if FOREX_ASSETS.contains(&upper.as_str()) {
            if (7..=17).contains(&utc_hour) {
                Decimal::ONE
            } else if utc_hour >= 22 || utc_hour <= 6 {
                Decimal::ZERO
            } else {
                Decimal::new(-5, 1)
            }
        } else if CRYPTO_ASSETS.contains(&upper.as_str()) {
            Decimal::ZERO
        } else if (9..=16).contains(&utc_hour) {
            Decimal::ONE
        } else {
            Decimal::NEGATIVE_ONE
        }
    }

    async fn volatility_level(&self, asset: &str) -> VolatilityLevel {
        match self.oracle.change_24h(asset).await {
            Some(change) => VolatilityLevel::classify(change),
            // No data reads as a normal market, never an error.
            None => VolatilityLevel::Medium,
        }
    }

    fn compose(
        base: Decimal,
        volatility: VolatilityLevel,
        time_adj: Decimal,
        hours_adj: Decimal,
    ) -> Decimal {
        let payout = base + Decimal::new(volatility.adjustment_tenths(), 1) + time_adj + hours_adj;
        payout
            .max(Decimal::from(65))
            .min(Decimal::from(95))
            .round_dp(1)
    }
}

#[async_trait]
impl PayoutCalculator for VolatilityPayout {
    async fn payout_percentage(&self, asset: &str, expiry_minutes: i64) -> Decimal {
        let base = Self::base_payout(asset);
        let volatility = self.volatility_level(asset).await;
        let time_adj = Self::time_adjustment(expiry_minutes);
        let hours_adj = Self::market_hours_adjustment(asset, chrono::Utc::now().hour());

        let payout = Self::compose(base, volatility, time_adj, hours_adj);
        debug!(
            "Payout for {} @{}min: base {} vol {:?} -> {}%",
            asset, expiry_minutes, base, volatility, payout
        );
        payout
    }
}

/// Constant payout, for tests and fixed-rate deployments.
pub struct FixedPayout(Decimal);

impl FixedPayout {
    /// Clamped into [0, 100].
    pub fn new(pct: Decimal) -> Self {
        Self(pct.max(Decimal::ZERO).min(Decimal::ONE_HUNDRED))
    }
}

#[async_trait]
impl PayoutCalculator for FixedPayout {
    async fn payout_percentage(&self, _asset: &str, _expiry_minutes: i64) -> Decimal {
        self.0
    }
}
