//! Ledger Service
//!
//! The only component permitted to mutate wallet balances, and the system of
//! record for why a balance changed. Every mutation is paired with an
//! append-only transaction row inside one SQLite transaction, so the
//! per-class reconciliation invariant (sum of amounts == balance) holds at
//! every consistent snapshot.

use crate::services::sqlite_store::{SettlementRecord, SqliteStore, StoreError};
use crate::types::{
    BalanceClass, OpeningBalances, Trade, Transaction, TransactionKind, Wallet,
};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientFunds { needed, available } => {
                LedgerError::InsufficientFunds { needed, available }
            }
            StoreError::InvalidState(msg) => LedgerError::InvalidState(msg),
            StoreError::Database(msg) => LedgerError::Database(msg),
        }
    }
}

/// Balance-vs-ledger comparison for one balance class.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub user_id: String,
    pub class: BalanceClass,
    pub balance: Decimal,
    pub ledger_sum: Decimal,
}

impl Reconciliation {
    pub fn is_consistent(&self) -> bool {
        self.balance == self.ledger_sum
    }
}

/// Wallet balances and the transaction log.
#[derive(Clone)]
pub struct Ledger {
    store: Arc<SqliteStore>,
    opening: OpeningBalances,
}

impl Ledger {
    /// Create a ledger over the given store. `opening` seeds wallets created
    /// lazily on first access.
    pub fn new(store: Arc<SqliteStore>, opening: OpeningBalances) -> Self {
        Self { store, opening }
    }

    /// Get a user's wallet, creating it on first access.
    pub fn wallet(&self, user_id: &str) -> Result<Wallet, LedgerError> {
        Ok(self.store.get_or_create_wallet(user_id, &self.opening)?)
    }

    /// Atomically check and decrement a balance, recording why.
    /// Fails without mutating when the balance is insufficient.
    pub fn debit(
        &self,
        user_id: &str,
        class: BalanceClass,
        amount: Decimal,
        kind: TransactionKind,
        description: String,
    ) -> Result<Wallet, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "debit amount must be positive, got {}",
                amount
            )));
        }
        self.wallet(user_id)?;

        let record = Transaction::new(user_id.to_string(), kind, -amount, description, class);
        let wallet = self
            .store
            .execute_adjustment(user_id, class, -amount, &record)?;
        debug!("Debited {} from {} ({} balance)", amount, user_id, class);
        Ok(wallet)
    }

    /// Atomically increment a balance, recording why.
    pub fn credit(
        &self,
        user_id: &str,
        class: BalanceClass,
        amount: Decimal,
        kind: TransactionKind,
        description: String,
    ) -> Result<Wallet, LedgerError> {
        if amount < Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!(
                "credit amount must be non-negative, got {}",
                amount
            )));
        }
        self.wallet(user_id)?;

        let record = Transaction::new(user_id.to_string(), kind, amount, description, class);
        let wallet = self
            .store
            .execute_adjustment(user_id, class, amount, &record)?;
        debug!("Credited {} to {} ({} balance)", amount, user_id, class);
        Ok(wallet)
    }

    /// Append an informational transaction row (zero-amount notifications).
    pub fn record(&self, record: &Transaction) -> Result<(), LedgerError> {
        Ok(self.store.append_transaction(record)?)
    }

    /// Placement unit of work: debit the stake and create the trade with its
    /// stake record, all-or-nothing. The trade must be freshly constructed
    /// and active.
    pub fn place_trade(&self, trade: &Trade) -> Result<(), LedgerError> {
        self.wallet(&trade.user_id)?;

        let record = Transaction::new(
            trade.user_id.clone(),
            TransactionKind::TradeStake,
            -trade.stake,
            format!(
                "Trade: {} {} ${} - {}",
                trade.asset,
                trade.direction.as_str().to_uppercase(),
                trade.stake,
                trade.id
            ),
            trade.balance_class(),
        );
        self.store.execute_placement(trade, &record)?;
        Ok(())
    }

    /// Settlement unit of work: terminal trade update, optional credit and
    /// transaction record, all-or-nothing. On error nothing is applied and
    /// the caller must release the settlement claim.
    pub fn apply_settlement(&self, settlement: &SettlementRecord) -> Result<(), LedgerError> {
        if let Some(credit) = settlement.credit {
            if credit < Decimal::ZERO {
                return Err(LedgerError::InvalidAmount(format!(
                    "settlement credit must be non-negative, got {}",
                    credit
                )));
            }
        }
        self.store.execute_settlement(settlement)?;
        Ok(())
    }

    /// Compare a balance against the sum of its ledger entries.
    pub fn reconcile(&self, user_id: &str, class: BalanceClass) -> Result<Reconciliation, LedgerError> {
        let wallet = self
            .store
            .get_wallet(user_id)
            .ok_or_else(|| LedgerError::InvalidState(format!("wallet missing for {}", user_id)))?;

        let reconciliation = Reconciliation {
            user_id: user_id.to_string(),
            class,
            balance: wallet.balance_for(class),
            ledger_sum: self.store.transaction_sum(user_id, class),
        };
        if !reconciliation.is_consistent() {
            warn!(
                "Ledger drift for {} ({}): balance {} vs ledger {}",
                user_id, class, reconciliation.balance, reconciliation.ledger_sum
            );
        }
        Ok(reconciliation)
    }

    /// A user's transaction history, newest first.
    pub fn transactions(&self, user_id: &str, limit: usize) -> Vec<Transaction> {
        self.store.transactions_for_user(user_id, limit)
    }
}
