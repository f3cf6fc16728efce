//! Trading Service
//!
//! The boundary the (external) web layer calls: validated trade placement
//! plus the read-only views of wallets, trades and transactions. Placement
//! prices the entry via the oracle, quotes the payout, and hands the ledger
//! one atomic unit of work - stake debit, trade insert and transaction
//! record stand or fall together.

use crate::oracle::{PriceOracle, SimulatedFeed};
use crate::services::ledger::{Ledger, LedgerError};
use crate::services::payout::PayoutCalculator;
use crate::services::trade_store::TradeStore;
use crate::types::{Trade, TradeRequest, Transaction, Wallet};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

/// Trading service errors.
#[derive(Debug, Error)]
pub enum TradingError {
    #[error("Invalid trade parameters: {0}")]
    InvalidParameters(String),

    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("Database error: {0}")]
    Database(String),
}

impl From<LedgerError> for TradingError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::InsufficientFunds { needed, available } => {
                TradingError::InsufficientFunds { needed, available }
            }
            LedgerError::InvalidAmount(msg) => TradingError::InvalidParameters(msg),
            LedgerError::InvalidState(msg) | LedgerError::Database(msg) => {
                TradingError::Database(msg)
            }
        }
    }
}

/// Placement limits.
#[derive(Debug, Clone)]
pub struct TradingConfig {
    pub min_stake: Decimal,
    pub max_stake: Decimal,
    /// Upper bound on the entry-price oracle read.
    pub oracle_timeout: Duration,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            min_stake: Decimal::ONE,
            max_stake: Decimal::from(10000),
            oracle_timeout: Duration::from_secs(5),
        }
    }
}

/// Trade placement and user-facing reads.
pub struct TradingService {
    trades: Arc<TradeStore>,
    ledger: Arc<Ledger>,
    oracle: Arc<dyn PriceOracle>,
    payout: Arc<dyn PayoutCalculator>,
    config: TradingConfig,
}

impl TradingService {
    pub fn new(
        trades: Arc<TradeStore>,
        ledger: Arc<Ledger>,
        oracle: Arc<dyn PriceOracle>,
        payout: Arc<dyn PayoutCalculator>,
        config: TradingConfig,
    ) -> Self {
        Self {
            trades,
            ledger,
            oracle,
            payout,
            config,
        }
    }

    /// Place a trade: price the entry, quote the payout, debit the stake and
    /// create the trade in one unit of work.
    pub async fn place_trade(&self, request: TradeRequest) -> Result<Trade, TradingError> {
        request
            .validate()
            .map_err(TradingError::InvalidParameters)?;
        if request.stake < self.config.min_stake || request.stake > self.config.max_stake {
            return Err(TradingError::InvalidParameters(format!(
                "stake {} outside [{}, {}]",
                request.stake, self.config.min_stake, self.config.max_stake
            )));
        }

        let asset = request.asset.trim().to_uppercase();
        let entry_price = self.entry_price(&asset).await;
        let payout_pct = self
            .payout
            .payout_percentage(&asset, request.expiry_minutes)
            .await;
        let expiry_time =
            Utc::now().timestamp_millis() + request.expiry_minutes * 60_000;

        let trade = Trade::new(
            request.user_id,
            asset,
            request.direction,
            request.stake,
            entry_price,
            payout_pct,
            expiry_time,
            request.is_demo,
        );
        self.ledger.place_trade(&trade)?;

        info!(
            "Placed trade {}: {} {} ${} @ {} (payout {}%)",
            trade.id, trade.asset, trade.direction, trade.stake, trade.entry_price, trade.payout_pct
        );
        Ok(trade)
    }

    // ========== Read Surface ==========

    /// A user's open trades, newest first.
    pub fn active_trades(&self, user_id: &str) -> Vec<Trade> {
        self.trades.find_active_for_user(user_id)
    }

    /// A user's trade history, newest first.
    pub fn trade_history(&self, user_id: &str, limit: usize) -> Vec<Trade> {
        self.trades.find_history_for_user(user_id, limit)
    }

    /// A user's wallet, created on first access.
    pub fn wallet(&self, user_id: &str) -> Result<Wallet, TradingError> {
        Ok(self.ledger.wallet(user_id)?)
    }

    /// A user's transaction history, newest first.
    pub fn transactions(&self, user_id: &str, limit: usize) -> Vec<Transaction> {
        self.ledger.transactions(user_id, limit)
    }

    // ========== Internals ==========

    /// Entry price from the oracle, bounded by the timeout; falls back to
    /// the static reference table so placement never fails on a dead feed.
    async fn entry_price(&self, asset: &str) -> Decimal {
        match tokio::time::timeout(self.config.oracle_timeout, self.oracle.get_price(asset)).await
        {
            Ok(Ok(price)) => price,
            Ok(Err(e)) => {
                warn!("No oracle price for {} at placement: {}", asset, e);
                SimulatedFeed::reference_price(asset)
            }
            Err(_) => {
                warn!("Oracle timed out pricing {} at placement", asset);
                SimulatedFeed::reference_price(asset)
            }
        }
    }
}
