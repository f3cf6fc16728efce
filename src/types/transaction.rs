//! Transaction Types
//!
//! Append-only ledger entries. For each user and balance class, the sum of
//! transaction amounts equals the wallet balance at any consistent snapshot;
//! zero-amount entries are informational notifications (e.g. a recorded loss
//! whose stake was already debited at placement).

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::BalanceClass;

/// Why a balance changed (or a zero-amount notification of an event).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    /// Stake debited when a trade is placed.
    TradeStake,
    /// Stake plus profit credited when a trade wins.
    TradeProfit,
    /// Zero-amount record of a lost trade.
    TradeLoss,
    /// Stake returned when an admin cancels an active trade.
    Refund,
    /// Manual admin balance adjustment.
    Adjustment,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::TradeStake => "trade_stake",
            TransactionKind::TradeProfit => "trade_profit",
            TransactionKind::TradeLoss => "trade_loss",
            TransactionKind::Refund => "refund",
            TransactionKind::Adjustment => "adjustment",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deposit" => Some(TransactionKind::Deposit),
            "withdrawal" => Some(TransactionKind::Withdrawal),
            "trade_stake" => Some(TransactionKind::TradeStake),
            "trade_profit" => Some(TransactionKind::TradeProfit),
            "trade_loss" => Some(TransactionKind::TradeLoss),
            "refund" => Some(TransactionKind::Refund),
            "adjustment" => Some(TransactionKind::Adjustment),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Completed,
    Pending,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Completed => "completed",
            TransactionStatus::Pending => "pending",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(TransactionStatus::Completed),
            "pending" => Some(TransactionStatus::Pending),
            _ => None,
        }
    }
}

/// An immutable ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub user_id: String,
    pub kind: TransactionKind,
    /// Signed amount applied to the balance; zero for notifications.
    pub amount: Decimal,
    pub description: String,
    pub status: TransactionStatus,
    /// Which balance class this entry belongs to.
    pub is_demo: bool,
    /// Epoch millis.
    pub created_at: i64,
}

impl Transaction {
    pub fn new(
        user_id: String,
        kind: TransactionKind,
        amount: Decimal,
        description: String,
        class: BalanceClass,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            kind,
            amount,
            description,
            status: TransactionStatus::Completed,
            is_demo: class.is_demo(),
            created_at: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn balance_class(&self) -> BalanceClass {
        BalanceClass::from_is_demo(self.is_demo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            TransactionKind::Deposit,
            TransactionKind::Withdrawal,
            TransactionKind::TradeStake,
            TransactionKind::TradeProfit,
            TransactionKind::TradeLoss,
            TransactionKind::Refund,
            TransactionKind::Adjustment,
        ] {
            assert_eq!(TransactionKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(TransactionKind::parse("staking"), None);
    }

    #[test]
    fn test_new_transaction_defaults() {
        let tx = Transaction::new(
            "user-1".to_string(),
            TransactionKind::Deposit,
            Decimal::from(250),
            "Deposit via card".to_string(),
            BalanceClass::Real,
        );
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert!(!tx.is_demo);
        assert_eq!(tx.balance_class(), BalanceClass::Real);
        assert!(tx.created_at > 0);
    }
}
