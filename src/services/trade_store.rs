//! Trade Store
//!
//! Query and claim surface for trade entities. Trade rows are created by the
//! ledger's placement unit of work (creation and stake debit are one SQLite
//! transaction); this service covers everything after that: lookups, due
//! scans, user views, the settlement claim and the per-user trade-control
//! override.

use crate::services::sqlite_store::{SqliteStore, StoreError};
use crate::types::{Trade, TradeControl};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Trade queries and settlement claims.
#[derive(Clone)]
pub struct TradeStore {
    store: Arc<SqliteStore>,
}

impl TradeStore {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    /// Get a trade by id.
    pub fn get(&self, trade_id: &str) -> Option<Trade> {
        self.store.get_trade(trade_id)
    }

    /// All active trades due at the cutoff, oldest expiry first.
    pub fn find_expired_active(&self, as_of: DateTime<Utc>) -> Vec<Trade> {
        self.store.find_expired_active(as_of.timestamp_millis())
    }

    /// A user's open trades, newest first.
    pub fn find_active_for_user(&self, user_id: &str) -> Vec<Trade> {
        self.store.find_active_for_user(user_id)
    }

    /// A user's trade history, newest first.
    pub fn find_history_for_user(&self, user_id: &str, limit: usize) -> Vec<Trade> {
        self.store.find_history_for_user(user_id, limit)
    }

    /// Atomically claim a due trade for settlement (`active -> settling`).
    /// Returns false when the trade is missing, already claimed, terminal,
    /// or not yet due.
    pub fn try_claim_for_settlement(
        &self,
        trade_id: &str,
        due_before: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.store
            .try_claim_for_settlement(trade_id, Some(due_before.timestamp_millis()))
    }

    /// Claim an active trade regardless of expiry (admin force/cancel).
    pub fn try_claim_any(&self, trade_id: &str) -> Result<bool, StoreError> {
        self.store.try_claim_for_settlement(trade_id, None)
    }

    /// Roll a claim back (`settling -> active`) after a failed settlement.
    pub fn release_claim(&self, trade_id: &str) -> Result<bool, StoreError> {
        self.store.release_claim(trade_id)
    }

    /// The user's settlement override (defaults to normal).
    pub fn trade_control(&self, user_id: &str) -> TradeControl {
        self.store.trade_control(user_id)
    }

    /// Set the user's settlement override (admin only).
    pub fn set_trade_control(
        &self,
        user_id: &str,
        mode: TradeControl,
    ) -> Result<(), StoreError> {
        self.store.set_trade_control(user_id, mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::Ledger;
    use crate::types::{OpeningBalances, Trade, TradeDirection, TradeStatus};
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn setup() -> (TradeStore, Ledger) {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        (
            TradeStore::new(store.clone()),
            Ledger::new(store, OpeningBalances::default()),
        )
    }

    fn place(ledger: &Ledger, expiry_millis: i64) -> Trade {
        let trade = Trade::new(
            "user-1".to_string(),
            "EURUSD".to_string(),
            TradeDirection::Call,
            Decimal::from(100),
            "1.1000".parse().unwrap(),
            Decimal::from(85),
            expiry_millis,
            true,
        );
        ledger.place_trade(&trade).unwrap();
        trade
    }

    #[test]
    fn test_due_scan_and_claim() {
        let (trades, ledger) = setup();
        let placed = place(&ledger, 60_000);

        let before = Utc.timestamp_millis_opt(30_000).unwrap();
        let after = Utc.timestamp_millis_opt(60_000).unwrap();

        assert!(trades.find_expired_active(before).is_empty());
        assert_eq!(trades.find_expired_active(after).len(), 1);

        assert!(!trades.try_claim_for_settlement(&placed.id, before).unwrap());
        assert!(trades.try_claim_for_settlement(&placed.id, after).unwrap());
        assert_eq!(trades.get(&placed.id).unwrap().status, TradeStatus::Settling);

        // A claimed trade no longer shows up in due scans.
        assert!(trades.find_expired_active(after).is_empty());

        assert!(trades.release_claim(&placed.id).unwrap());
        assert_eq!(trades.get(&placed.id).unwrap().status, TradeStatus::Active);
    }

    #[test]
    fn test_claim_missing_trade_is_false() {
        let (trades, _ledger) = setup();
        assert!(!trades.try_claim_any("no-such-trade").unwrap());
        assert!(!trades.release_claim("no-such-trade").unwrap());
    }

    #[test]
    fn test_trade_control_defaults_to_normal() {
        let (trades, _ledger) = setup();
        assert_eq!(trades.trade_control("user-1"), TradeControl::Normal);
        trades
            .set_trade_control("user-1", TradeControl::AlwaysProfit)
            .unwrap();
        assert_eq!(trades.trade_control("user-1"), TradeControl::AlwaysProfit);
    }
}
