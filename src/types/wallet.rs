//! Wallet Types
//!
//! One wallet per user, holding two independent balances: real funds and
//! simulated (demo) funds. Balances never go negative; all mutation goes
//! through the ledger.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which of the two wallet balances an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceClass {
    /// Real funds.
    Real,
    /// Simulated (demo) funds.
    Demo,
}

impl BalanceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceClass::Real => "real",
            BalanceClass::Demo => "demo",
        }
    }

    pub fn from_is_demo(is_demo: bool) -> Self {
        if is_demo {
            BalanceClass::Demo
        } else {
            BalanceClass::Real
        }
    }

    pub fn is_demo(&self) -> bool {
        matches!(self, BalanceClass::Demo)
    }
}

impl std::fmt::Display for BalanceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user's wallet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Wallet {
    pub user_id: String,
    /// Real-funds balance.
    pub balance: Decimal,
    /// Simulated-funds balance.
    pub demo_balance: Decimal,
    /// Epoch millis.
    pub created_at: i64,
    pub updated_at: i64,
}

impl Wallet {
    /// Create a wallet with the given opening balances.
    pub fn new(user_id: String, balance: Decimal, demo_balance: Decimal) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            user_id,
            balance,
            demo_balance,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn balance_for(&self, class: BalanceClass) -> Decimal {
        match class {
            BalanceClass::Real => self.balance,
            BalanceClass::Demo => self.demo_balance,
        }
    }
}

/// Opening balances applied when a wallet is created lazily on first access.
#[derive(Debug, Clone)]
pub struct OpeningBalances {
    pub real: Decimal,
    pub demo: Decimal,
}

impl Default for OpeningBalances {
    fn default() -> Self {
        Self {
            real: Decimal::from(1000),
            demo: Decimal::from(10000),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance_class_mapping() {
        assert_eq!(BalanceClass::from_is_demo(true), BalanceClass::Demo);
        assert_eq!(BalanceClass::from_is_demo(false), BalanceClass::Real);
        assert!(BalanceClass::Demo.is_demo());
        assert!(!BalanceClass::Real.is_demo());
    }

    #[test]
    fn test_balance_for() {
        let wallet = Wallet::new(
            "user-1".to_string(),
            Decimal::from(1000),
            Decimal::from(10000),
        );
        assert_eq!(wallet.balance_for(BalanceClass::Real), Decimal::from(1000));
        assert_eq!(wallet.balance_for(BalanceClass::Demo), Decimal::from(10000));
    }
}
