//! Trade Types
//!
//! Binary-options trade entities: a trade is a time-boxed directional bet
//! (call/put) on an asset price, settled once at expiry.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::BalanceClass;

/// Direction of a binary-options bet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    /// Price will be above the entry price at expiry.
    Call,
    /// Price will be below the entry price at expiry.
    Put,
}

impl TradeDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeDirection::Call => "call",
            TradeDirection::Put => "put",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "call" => Some(TradeDirection::Call),
            "put" => Some(TradeDirection::Put),
            _ => None,
        }
    }
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Trade lifecycle status.
///
/// `Settling` is the transient claim state that serializes concurrent
/// settlement attempts; a trade in `Settling` is owned by exactly one
/// settler until it either reaches a terminal state or is released back
/// to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeStatus {
    Active,
    Settling,
    Won,
    Lost,
    Cancelled,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Active => "active",
            TradeStatus::Settling => "settling",
            TradeStatus::Won => "won",
            TradeStatus::Lost => "lost",
            TradeStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(TradeStatus::Active),
            "settling" => Some(TradeStatus::Settling),
            "won" => Some(TradeStatus::Won),
            "lost" => Some(TradeStatus::Lost),
            "cancelled" => Some(TradeStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal statuses admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeStatus::Won | TradeStatus::Lost | TradeStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolved outcome of a settled trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeOutcome {
    Win,
    Loss,
}

/// Per-user admin override consulted before the market outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeControl {
    #[default]
    Normal,
    AlwaysLose,
    AlwaysProfit,
}

impl TradeControl {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeControl::Normal => "normal",
            TradeControl::AlwaysLose => "always_lose",
            TradeControl::AlwaysProfit => "always_profit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "normal" => Some(TradeControl::Normal),
            "always_lose" => Some(TradeControl::AlwaysLose),
            "always_profit" => Some(TradeControl::AlwaysProfit),
            _ => None,
        }
    }
}

/// A binary-options trade.
///
/// Created `Active` by placement, mutated exactly once by the settlement
/// engine. Once terminal, `exit_price`, `profit_loss` and `closed_at` are
/// immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    pub id: String,
    pub user_id: String,
    /// Asset symbol, e.g. "EURUSD" or "BTCUSD".
    pub asset: String,
    pub direction: TradeDirection,
    /// Amount wagered, debited from the wallet at placement.
    pub stake: Decimal,
    pub entry_price: Decimal,
    /// Market price at settlement; None until settled.
    pub exit_price: Option<Decimal>,
    /// Percent of stake paid as profit on a win.
    pub payout_pct: Decimal,
    /// Profit component only: +stake*payout/100 on a win, -stake on a loss.
    pub profit_loss: Decimal,
    pub status: TradeStatus,
    /// Demo (simulated funds) vs real funds.
    pub is_demo: bool,
    /// Epoch millis.
    pub placed_at: i64,
    /// Epoch millis; strictly after `placed_at`.
    pub expiry_time: i64,
    pub closed_at: Option<i64>,
}

impl Trade {
    /// Create a new active trade from validated placement inputs.
    pub fn new(
        user_id: String,
        asset: String,
        direction: TradeDirection,
        stake: Decimal,
        entry_price: Decimal,
        payout_pct: Decimal,
        expiry_time: i64,
        is_demo: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            asset,
            direction,
            stake,
            entry_price,
            exit_price: None,
            payout_pct,
            profit_loss: Decimal::ZERO,
            status: TradeStatus::Active,
            is_demo,
            placed_at: chrono::Utc::now().timestamp_millis(),
            expiry_time,
            closed_at: None,
        }
    }

    /// Which wallet balance this trade stakes.
    pub fn balance_class(&self) -> BalanceClass {
        if self.is_demo {
            BalanceClass::Demo
        } else {
            BalanceClass::Real
        }
    }

    pub fn is_expired(&self, as_of_millis: i64) -> bool {
        self.expiry_time <= as_of_millis
    }

    /// Profit paid on top of the returned stake if this trade wins.
    pub fn potential_profit(&self) -> Decimal {
        (self.stake * self.payout_pct / Decimal::from(100)).round_dp(2)
    }
}

/// Validated placement request, constructed once at the system boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeRequest {
    pub user_id: String,
    pub asset: String,
    pub direction: TradeDirection,
    pub stake: Decimal,
    pub expiry_minutes: i64,
    pub is_demo: bool,
}

impl TradeRequest {
    /// Basic shape validation; stake bounds are checked against config by
    /// the trading service.
    pub fn validate(&self) -> Result<(), String> {
        if self.user_id.trim().is_empty() {
            return Err("user id must not be empty".to_string());
        }
        if self.asset.trim().is_empty() {
            return Err("asset must not be empty".to_string());
        }
        if self.stake <= Decimal::ZERO {
            return Err(format!("stake must be positive, got {}", self.stake));
        }
        if self.expiry_minutes < 1 {
            return Err(format!(
                "expiry must be at least one minute, got {}",
                self.expiry_minutes
            ));
        }
        Ok(())
    }
}
