//! Settlement Engine
//!
//! Drives every expired active trade to a terminal state exactly once, with
//! a consistent ledger update. Within one trade the steps are strictly
//! ordered: claim -> price -> outcome -> ledger unit of work; if the unit of
//! work fails the claim is released and the trade is retried by a later
//! sweep. Concurrent settlers (periodic sweep, user-triggered checks) are
//! serialized per trade by the `active -> settling` claim, so a trade can
//! never pay out twice.

use crate::oracle::PriceOracle;
use crate::services::ledger::{Ledger, LedgerError};
use crate::services::sqlite_store::{SettlementRecord, StoreError};
use crate::services::trade_store::TradeStore;
use crate::types::{
    Trade, TradeControl, TradeDirection, TradeOutcome, TradeStatus, Transaction, TransactionKind,
};
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Settlement errors.
#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("Trade not found: {0}")]
    NotFound(String),

    #[error("Trade not eligible for settlement yet: {0}")]
    NotEligible(String),

    #[error("Trade already settled: {0}")]
    AlreadySettled(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Ledger failure: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<StoreError> for SettlementError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidState(msg) => SettlementError::InvalidState(msg),
            other => SettlementError::Database(other.to_string()),
        }
    }
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct SettlementConfig {
    /// Upper bound on a single oracle read; a timeout falls back like any
    /// other unavailable price.
    pub oracle_timeout: Duration,
    /// Bound of the synthetic jitter applied to the entry price when the
    /// oracle is unavailable (fraction of price).
    pub fallback_jitter: f64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            oracle_timeout: Duration::from_secs(5),
            fallback_jitter: 0.005,
        }
    }
}

/// Cumulative engine counters.
#[derive(Debug, Default)]
struct EngineCounters {
    settled: AtomicU64,
    wins: AtomicU64,
    losses: AtomicU64,
    cancelled: AtomicU64,
    /// Settlements priced against the synthetic fallback instead of a real
    /// oracle read.
    fallback_prices: AtomicU64,
    failures: AtomicU64,
}

/// Snapshot of the engine counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStats {
    pub settled: u64,
    pub wins: u64,
    pub losses: u64,
    pub cancelled: u64,
    pub fallback_prices: u64,
    pub failures: u64,
}

/// The settlement engine.
pub struct SettlementEngine {
    trades: Arc<TradeStore>,
    ledger: Arc<Ledger>,
    oracle: Arc<dyn PriceOracle>,
    config: SettlementConfig,
    counters: EngineCounters,
}

impl SettlementEngine {
    pub fn new(
        trades: Arc<TradeStore>,
        ledger: Arc<Ledger>,
        oracle: Arc<dyn PriceOracle>,
        config: SettlementConfig,
    ) -> Self {
        Self {
            trades,
            ledger,
            oracle,
            config,
            counters: EngineCounters::default(),
        }
    }

    // ========== Sweep ==========

    /// Settle every active trade expired at the cutoff. Per-trade failures
    /// are logged, rolled back and skipped; the sweep continues. Returns the
    /// number of trades settled.
    pub async fn settle_due_trades(&self, as_of: DateTime<Utc>) -> usize {
        let due = self.trades.find_expired_active(as_of);
        if due.is_empty() {
            return 0;
        }
        debug!("Sweep found {} due trades", due.len());

        let mut settled = 0usize;
        for trade in due {
            match self.trades.try_claim_for_settlement(&trade.id, as_of) {
                Ok(true) => {}
                // Raced by another settler between the scan and the claim.
                Ok(false) => continue,
                Err(e) => {
                    warn!("Error claiming trade {}: {}", trade.id, e);
                    continue;
                }
            }

            match self.settle_claimed(&trade, as_of, None).await {
                Ok(settled_trade) => {
                    settled += 1;
                    info!(
                        "Settled trade {} as {} (P/L {})",
                        settled_trade.id, settled_trade.status, settled_trade.profit_loss
                    );
                }
                Err(e) => {
                    warn!(
                        "Error settling trade {}: {} - left active for retry",
                        trade.id, e
                    );
                }
            }
        }

        info!("Sweep settled {} trades (as of {})", settled, as_of);
        settled
    }

    // ========== Single-Trade Settlement ==========

    /// Settle one trade on demand (user-facing "check my trade").
    ///
    /// Idempotency signals rather than failures: `AlreadySettled` when the
    /// trade is terminal or another settler holds the claim, `NotEligible`
    /// before expiry.
    pub async fn settle_one(&self, trade_id: &str) -> Result<Trade, SettlementError> {
        let now = Utc::now();
        let trade = self
            .trades
            .get(trade_id)
            .ok_or_else(|| SettlementError::NotFound(trade_id.to_string()))?;

        if trade.status.is_terminal() {
            return Err(SettlementError::AlreadySettled(trade_id.to_string()));
        }
        if !trade.is_expired(now.timestamp_millis()) {
            return Err(SettlementError::NotEligible(trade_id.to_string()));
        }
        if !self.trades.try_claim_for_settlement(trade_id, now)? {
            // Lost the race: the claim holder will finish (or roll back) the
            // settlement.
            return Err(SettlementError::AlreadySettled(trade_id.to_string()));
        }

        self.settle_claimed(&trade, now, None).await
    }

    /// Admin override: settle a still-active trade with a chosen outcome,
    /// regardless of expiry. The ledger contract is identical to a market
    /// settlement.
    pub async fn force_settle(
        &self,
        trade_id: &str,
        outcome: TradeOutcome,
    ) -> Result<Trade, SettlementError> {
        let now = Utc::now();
        let trade = self
            .trades
            .get(trade_id)
            .ok_or_else(|| SettlementError::NotFound(trade_id.to_string()))?;

        if !self.trades.try_claim_any(trade_id)? {
            return Err(SettlementError::InvalidState(format!(
                "trade {} is not active (status {})",
                trade_id, trade.status
            )));
        }

        info!("Admin forcing trade {} to {:?}", trade_id, outcome);
        self.settle_claimed(&trade, now, Some(outcome)).await
    }

    /// Admin void: cancel a still-active trade and refund the stake.
    pub async fn cancel_trade(&self, trade_id: &str) -> Result<Trade, SettlementError> {
        let now = Utc::now();
        let trade = self
            .trades
            .get(trade_id)
            .ok_or_else(|| SettlementError::NotFound(trade_id.to_string()))?;

        if !self.trades.try_claim_any(trade_id)? {
            return Err(SettlementError::InvalidState(format!(
                "trade {} is not active (status {})",
                trade_id, trade.status
            )));
        }

        let settlement = SettlementRecord {
            trade_id: trade.id.clone(),
            status: TradeStatus::Cancelled,
            exit_price: None,
            profit_loss: Decimal::ZERO,
            closed_at: now.timestamp_millis(),
            credit: Some(trade.stake),
            record: Transaction::new(
                trade.user_id.clone(),
                TransactionKind::Refund,
                trade.stake,
                format!(
                    "Refund: cancelled {} {} trade - {}",
                    trade.direction.as_str().to_uppercase(),
                    trade.asset,
                    trade.id
                ),
                trade.balance_class(),
            ),
        };
        self.apply_or_release(&trade.id, &settlement)?;
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);

        info!("Cancelled trade {} and refunded {}", trade.id, trade.stake);
        Ok(self.reload(&trade))
    }

    /// Cumulative counters since startup.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            settled: self.counters.settled.load(Ordering::Relaxed),
            wins: self.counters.wins.load(Ordering::Relaxed),
            losses: self.counters.losses.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
            fallback_prices: self.counters.fallback_prices.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    // ========== Internals ==========

    /// Settle a trade whose claim this caller holds.
    async fn settle_claimed(
        &self,
        trade: &Trade,
        as_of: DateTime<Utc>,
        forced: Option<TradeOutcome>,
    ) -> Result<Trade, SettlementError> {
        let oracle_price = self.fetch_price(&trade.asset).await;

        let (outcome, exit_price) = match forced {
            // Admin-chosen outcome; the price is informational only.
            Some(outcome) => (outcome, oracle_price.unwrap_or(trade.entry_price)),
            None => match self.trades.trade_control(&trade.user_id) {
                TradeControl::AlwaysLose => {
                    info!("Forcing trade {} to lose (trade control)", trade.id);
                    (TradeOutcome::Loss, oracle_price.unwrap_or(trade.entry_price))
                }
                TradeControl::AlwaysProfit => {
                    info!("Forcing trade {} to win (trade control)", trade.id);
                    (TradeOutcome::Win, oracle_price.unwrap_or(trade.entry_price))
                }
                TradeControl::Normal => {
                    let exit = match oracle_price {
                        Some(price) => price,
                        None => {
                            let synthetic = self.fallback_price(trade.entry_price);
                            self.counters.fallback_prices.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                "No oracle price for {}; settling trade {} against synthetic {}",
                                trade.asset, trade.id, synthetic
                            );
                            synthetic
                        }
                    };
                    (market_outcome(trade.direction, trade.entry_price, exit), exit)
                }
            },
        };

        let settlement = self.build_settlement(trade, outcome, exit_price, as_of);
        self.apply_or_release(&trade.id, &settlement)?;

        self.counters.settled.fetch_add(1, Ordering::Relaxed);
        match outcome {
            TradeOutcome::Win => self.counters.wins.fetch_add(1, Ordering::Relaxed),
            TradeOutcome::Loss => self.counters.losses.fetch_add(1, Ordering::Relaxed),
        };

        Ok(self.reload(trade))
    }

    /// Profit, credit and transaction record for an outcome.
    ///
    /// A win credits stake plus profit (the stake was fully debited at
    /// placement); a loss leaves the wallet untouched and records a
    /// zero-amount notification. `profit_loss` on the trade is the profit
    /// component only.
    fn build_settlement(
        &self,
        trade: &Trade,
        outcome: TradeOutcome,
        exit_price: Decimal,
        as_of: DateTime<Utc>,
    ) -> SettlementRecord {
        let direction = trade.direction.as_str().to_uppercase();
        match outcome {
            TradeOutcome::Win => {
                let profit = trade.potential_profit();
                let credit = trade.stake + profit;
                SettlementRecord {
                    trade_id: trade.id.clone(),
                    status: TradeStatus::Won,
                    exit_price: Some(exit_price),
                    profit_loss: profit,
                    closed_at: as_of.timestamp_millis(),
                    credit: Some(credit),
                    record: Transaction::new(
                        trade.user_id.clone(),
                        TransactionKind::TradeProfit,
                        credit,
                        format!(
                            "Profit: {} {} trade - won ${}",
                            direction, trade.asset, profit
                        ),
                        trade.balance_class(),
                    ),
                }
            }
            TradeOutcome::Loss => SettlementRecord {
                trade_id: trade.id.clone(),
                status: TradeStatus::Lost,
                exit_price: Some(exit_price),
                profit_loss: -trade.stake,
                closed_at: as_of.timestamp_millis(),
                credit: None,
                record: Transaction::new(
                    trade.user_id.clone(),
                    TransactionKind::TradeLoss,
                    Decimal::ZERO,
                    format!(
                        "Loss: {} {} trade - lost ${}",
                        direction, trade.asset, trade.stake
                    ),
                    trade.balance_class(),
                ),
            },
        }
    }

    /// Apply the settlement unit of work, rolling the claim back on failure
    /// so the trade is retried.
    fn apply_or_release(
        &self,
        trade_id: &str,
        settlement: &SettlementRecord,
    ) -> Result<(), SettlementError> {
        if let Err(e) = self.ledger.apply_settlement(settlement) {
            self.counters.failures.fetch_add(1, Ordering::Relaxed);
            match self.trades.release_claim(trade_id) {
                Ok(true) => {}
                Ok(false) => error!(
                    "Trade {} stuck: settlement failed but claim release found no row",
                    trade_id
                ),
                Err(re) => error!("Error releasing claim on trade {}: {}", trade_id, re),
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Bounded oracle read; timeouts and errors read as "no price".
    async fn fetch_price(&self, symbol: &str) -> Option<Decimal> {
        match tokio::time::timeout(self.config.oracle_timeout, self.oracle.get_price(symbol)).await
        {
            Ok(Ok(price)) => Some(price),
            Ok(Err(e)) => {
                debug!("Oracle {} has no price for {}: {}", self.oracle.name(), symbol, e);
                None
            }
            Err(_) => {
                debug!(
                    "Oracle {} timed out for {} after {:?}",
                    self.oracle.name(),
                    symbol,
                    self.config.oracle_timeout
                );
                None
            }
        }
    }

    /// Entry price perturbed by a small bounded jitter; the last resort when
    /// the oracle is down at expiry.
    fn fallback_price(&self, entry: Decimal) -> Decimal {
        let bound = self.config.fallback_jitter;
        let change: f64 = rand::thread_rng().gen_range(-bound..=bound);
        let factor = Decimal::ONE + Decimal::from_f64(change).unwrap_or(Decimal::ZERO);
        (entry * factor).round_dp(5)
    }

    /// Re-read the settled row; falls back to the pre-claim snapshot if the
    /// read fails.
    fn reload(&self, trade: &Trade) -> Trade {
        self.trades.get(&trade.id).unwrap_or_else(|| trade.clone())
    }
}

/// Market outcome rule: a call wins strictly above the entry, a put strictly
/// below. A tie loses for both directions.
fn market_outcome(direction: TradeDirection, entry: Decimal, exit: Decimal) -> TradeOutcome {
    let won = match direction {
        TradeDirection::Call => exit > entry,
        TradeDirection::Put => exit < entry,
    };
    if won {
        TradeOutcome::Win
    } else {
        TradeOutcome::Loss
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::sqlite_store::SqliteStore;
    use crate::types::{BalanceClass, OpeningBalances};
    use crate::oracle::OracleError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Oracle test double with a settable price; `None` reads as down.
    struct TestOracle {
        price: Mutex<Option<Decimal>>,
    }

    impl TestOracle {
        fn up(price: &str) -> Arc<Self> {
            Arc::new(Self {
                price: Mutex::new(Some(price.parse().unwrap())),
            })
        }

        fn down() -> Arc<Self> {
            Arc::new(Self {
                price: Mutex::new(None),
            })
        }

        fn set(&self, price: Option<&str>) {
            *self.price.lock().unwrap() = price.map(|p| p.parse().unwrap());
        }
    }

    #[async_trait]
    impl PriceOracle for TestOracle {
        async fn get_price(&self, symbol: &str) -> Result<Decimal, OracleError> {
            (*self.price.lock().unwrap())
                .ok_or_else(|| OracleError::Unavailable(symbol.to_string()))
        }

        fn name(&self) -> &str {
            "test"
        }
    }

    struct Fixture {
        engine: Arc<SettlementEngine>,
        trades: Arc<TradeStore>,
        ledger: Arc<Ledger>,
        oracle: Arc<TestOracle>,
    }

    fn setup(oracle: Arc<TestOracle>) -> Fixture {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        let trades = Arc::new(TradeStore::new(store.clone()));
        let ledger = Arc::new(Ledger::new(store, OpeningBalances::default()));
        let engine = Arc::new(SettlementEngine::new(
            trades.clone(),
            ledger.clone(),
            oracle.clone(),
            SettlementConfig::default(),
        ));
        Fixture {
            engine,
            trades,
            ledger,
            oracle,
        }
    }

    /// Place a demo trade that expired one minute ago.
    fn place_expired(fixture: &Fixture, direction: TradeDirection, entry: &str) -> Trade {
        let trade = Trade::new(
            "user-1".to_string(),
            "EURUSD".to_string(),
            direction,
            Decimal::from(100),
            entry.parse().unwrap(),
            Decimal::from(90),
            Utc::now().timestamp_millis() - 60_000,
            true,
        );
        fixture.ledger.place_trade(&trade).unwrap();
        trade
    }

    fn demo_balance(fixture: &Fixture) -> Decimal {
        fixture.ledger.wallet("user-1").unwrap().demo_balance
    }

    #[tokio::test]
    async fn test_call_win_credits_stake_plus_profit() {
        let f = setup(TestOracle::up("1.1050"));
        let trade = place_expired(&f, TradeDirection::Call, "1.1000");
        assert_eq!(demo_balance(&f), Decimal::from(9900));

        let settled = f.engine.settle_one(&trade.id).await.unwrap();
        assert_eq!(settled.status, TradeStatus::Won);
        assert_eq!(settled.profit_loss, Decimal::from(90));
        assert_eq!(settled.exit_price, Some("1.1050".parse().unwrap()));
        assert!(settled.closed_at.is_some());
        // 9900 + 100 stake + 90 profit
        assert_eq!(demo_balance(&f), Decimal::from(10090));
        assert!(f
            .ledger
            .reconcile("user-1", BalanceClass::Demo)
            .unwrap()
            .is_consistent());

        let stats = f.engine.stats();
        assert_eq!(stats.settled, 1);
        assert_eq!(stats.wins, 1);
        assert_eq!(stats.fallback_prices, 0);
    }

    #[tokio::test]
    async fn test_tie_loses_for_call() {
        let f = setup(TestOracle::up("1.1000"));
        let trade = place_expired(&f, TradeDirection::Call, "1.1000");

        let settled = f.engine.settle_one(&trade.id).await.unwrap();
        assert_eq!(settled.status, TradeStatus::Lost);
        assert_eq!(settled.profit_loss, Decimal::from(-100));
        // Stake already forfeit at placement.
        assert_eq!(demo_balance(&f), Decimal::from(9900));
        assert!(f
            .ledger
            .reconcile("user-1", BalanceClass::Demo)
            .unwrap()
            .is_consistent());
    }

    #[tokio::test]
    async fn test_tie_loses_for_put() {
        let f = setup(TestOracle::up("1.1000"));
        let trade = place_expired(&f, TradeDirection::Put, "1.1000");

        let settled = f.engine.settle_one(&trade.id).await.unwrap();
        assert_eq!(settled.status, TradeStatus::Lost);
    }

    #[tokio::test]
    async fn test_put_wins_below_entry() {
        let f = setup(TestOracle::up("1.0950"));
        let trade = place_expired(&f, TradeDirection::Put, "1.1000");

        let settled = f.engine.settle_one(&trade.id).await.unwrap();
        assert_eq!(settled.status, TradeStatus::Won);
        assert_eq!(demo_balance(&f), Decimal::from(10090));
    }

    #[tokio::test]
    async fn test_always_lose_beats_winning_price() {
        let f = setup(TestOracle::up("1.2000"));
        f.trades
            .set_trade_control("user-1", TradeControl::AlwaysLose)
            .unwrap();
        let trade = place_expired(&f, TradeDirection::Call, "1.1000");

        let settled = f.engine.settle_one(&trade.id).await.unwrap();
        assert_eq!(settled.status, TradeStatus::Lost);
        assert_eq!(settled.profit_loss, Decimal::from(-100));
        assert_eq!(settled.exit_price, Some("1.2000".parse().unwrap()));
        assert_eq!(demo_balance(&f), Decimal::from(9900));
    }

    #[tokio::test]
    async fn test_always_profit_beats_losing_price() {
        let f = setup(TestOracle::up("1.0000"));
        f.trades
            .set_trade_control("user-1", TradeControl::AlwaysProfit)
            .unwrap();
        let trade = place_expired(&f, TradeDirection::Call, "1.1000");

        let settled = f.engine.settle_one(&trade.id).await.unwrap();
        assert_eq!(settled.status, TradeStatus::Won);
        assert_eq!(demo_balance(&f), Decimal::from(10090));
    }

    #[tokio::test]
    async fn test_oracle_down_still_settles_with_fallback() {
        let f = setup(TestOracle::down());
        let trade = place_expired(&f, TradeDirection::Call, "1.1000");

        let settled = f.engine.settle_one(&trade.id).await.unwrap();
        assert!(settled.status.is_terminal());

        // Exit price stays within the jitter bound of the entry.
        let exit = settled.exit_price.unwrap();
        let entry: Decimal = "1.1000".parse().unwrap();
        let bound = entry * Decimal::new(6, 3); // 0.006 > 0.005 jitter
        assert!((exit - entry).abs() <= bound);

        assert_eq!(f.engine.stats().fallback_prices, 1);
        assert!(f
            .ledger
            .reconcile("user-1", BalanceClass::Demo)
            .unwrap()
            .is_consistent());
    }

    #[tokio::test]
    async fn test_override_fallback_is_plain_entry() {
        let f = setup(TestOracle::down());
        f.trades
            .set_trade_control("user-1", TradeControl::AlwaysLose)
            .unwrap();
        let trade = place_expired(&f, TradeDirection::Call, "1.1000");

        let settled = f.engine.settle_one(&trade.id).await.unwrap();
        assert_eq!(settled.exit_price, Some("1.1000".parse().unwrap()));
        // Informational price only; not a synthetic-settlement event.
        assert_eq!(f.engine.stats().fallback_prices, 0);
    }

    #[tokio::test]
    async fn test_settle_one_is_idempotent() {
        let f = setup(TestOracle::up("1.1050"));
        let trade = place_expired(&f, TradeDirection::Call, "1.1000");

        f.engine.settle_one(&trade.id).await.unwrap();
        let err = f.engine.settle_one(&trade.id).await.unwrap_err();
        assert!(matches!(err, SettlementError::AlreadySettled(_)));

        // No further side effects.
        assert_eq!(demo_balance(&f), Decimal::from(10090));
        assert_eq!(f.engine.stats().settled, 1);
    }

    #[tokio::test]
    async fn test_settle_one_rejects_unexpired_and_unknown() {
        let f = setup(TestOracle::up("1.1050"));

        let open = Trade::new(
            "user-1".to_string(),
            "EURUSD".to_string(),
            TradeDirection::Call,
            Decimal::from(100),
            "1.1000".parse().unwrap(),
            Decimal::from(90),
            Utc::now().timestamp_millis() + 600_000,
            true,
        );
        f.ledger.place_trade(&open).unwrap();

        assert!(matches!(
            f.engine.settle_one(&open.id).await.unwrap_err(),
            SettlementError::NotEligible(_)
        ));
        assert!(matches!(
            f.engine.settle_one("missing").await.unwrap_err(),
            SettlementError::NotFound(_)
        ));
        assert_eq!(
            f.trades.get(&open.id).unwrap().status,
            TradeStatus::Active
        );
    }

    #[tokio::test]
    async fn test_force_settle_ignores_expiry_and_market() {
        let f = setup(TestOracle::up("1.0000"));
        let open = Trade::new(
            "user-1".to_string(),
            "EURUSD".to_string(),
            TradeDirection::Call,
            Decimal::from(100),
            "1.1000".parse().unwrap(),
            Decimal::from(90),
            Utc::now().timestamp_millis() + 600_000,
            true,
        );
        f.ledger.place_trade(&open).unwrap();

        let settled = f
            .engine
            .force_settle(&open.id, TradeOutcome::Win)
            .await
            .unwrap();
        assert_eq!(settled.status, TradeStatus::Won);
        assert_eq!(demo_balance(&f), Decimal::from(10090));

        // Terminal trades reject a second override.
        let err = f
            .engine
            .force_settle(&open.id, TradeOutcome::Loss)
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_cancel_refunds_stake() {
        let f = setup(TestOracle::up("1.1050"));
        let trade = place_expired(&f, TradeDirection::Call, "1.1000");
        assert_eq!(demo_balance(&f), Decimal::from(9900));

        let cancelled = f.engine.cancel_trade(&trade.id).await.unwrap();
        assert_eq!(cancelled.status, TradeStatus::Cancelled);
        assert_eq!(cancelled.profit_loss, Decimal::ZERO);
        assert_eq!(demo_balance(&f), Decimal::from(10000));
        assert!(f
            .ledger
            .reconcile("user-1", BalanceClass::Demo)
            .unwrap()
            .is_consistent());

        // And it is gone from the settlement engine's reach.
        assert!(matches!(
            f.engine.settle_one(&trade.id).await.unwrap_err(),
            SettlementError::AlreadySettled(_)
        ));
    }

    #[tokio::test]
    async fn test_sweep_settles_all_due_and_skips_open() {
        let f = setup(TestOracle::up("1.1050"));
        let due_a = place_expired(&f, TradeDirection::Call, "1.1000");
        let due_b = place_expired(&f, TradeDirection::Put, "1.1000");
        let open = Trade::new(
            "user-1".to_string(),
            "EURUSD".to_string(),
            TradeDirection::Call,
            Decimal::from(50),
            "1.1000".parse().unwrap(),
            Decimal::from(90),
            Utc::now().timestamp_millis() + 600_000,
            true,
        );
        f.ledger.place_trade(&open).unwrap();

        let settled = f.engine.settle_due_trades(Utc::now()).await;
        assert_eq!(settled, 2);
        assert_eq!(f.trades.get(&due_a.id).unwrap().status, TradeStatus::Won);
        assert_eq!(f.trades.get(&due_b.id).unwrap().status, TradeStatus::Lost);
        assert_eq!(f.trades.get(&open.id).unwrap().status, TradeStatus::Active);

        // Second sweep is a no-op.
        assert_eq!(f.engine.settle_due_trades(Utc::now()).await, 0);
    }

    #[tokio::test]
    async fn test_sweep_uses_explicit_cutoff() {
        let f = setup(TestOracle::up("1.1050"));
        place_expired(&f, TradeDirection::Call, "1.1000");

        // A cutoff before the expiry leaves the trade alone.
        let past = Utc::now() - chrono::Duration::minutes(5);
        assert_eq!(f.engine.settle_due_trades(past).await, 0);
        assert_eq!(f.engine.settle_due_trades(Utc::now()).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_settlement_pays_at_most_once() {
        let f = setup(TestOracle::up("1.1050"));
        let trade = place_expired(&f, TradeDirection::Call, "1.1000");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = f.engine.clone();
            let id = trade.id.clone();
            handles.push(tokio::spawn(async move { engine.settle_one(&id).await }));
        }

        let mut wins = 0;
        let mut already = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(SettlementError::AlreadySettled(_)) => already += 1,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(already, 7);

        // Exactly one credit applied.
        assert_eq!(demo_balance(&f), Decimal::from(10090));
        assert_eq!(f.engine.stats().settled, 1);
        assert!(f
            .ledger
            .reconcile("user-1", BalanceClass::Demo)
            .unwrap()
            .is_consistent());
    }

    #[tokio::test]
    async fn test_oracle_recovery_mid_run() {
        let f = setup(TestOracle::down());
        let first = place_expired(&f, TradeDirection::Call, "1.1000");
        f.engine.settle_one(&first.id).await.unwrap();
        assert_eq!(f.engine.stats().fallback_prices, 1);

        // Feed comes back; the next settlement is a real read.
        f.oracle.set(Some("1.1050"));
        let second = place_expired(&f, TradeDirection::Call, "1.1000");
        let settled = f.engine.settle_one(&second.id).await.unwrap();
        assert_eq!(settled.exit_price, Some("1.1050".parse().unwrap()));
        assert_eq!(f.engine.stats().fallback_prices, 1);
    }
}
