//! SQLite persistence layer for wallets, trades and the transaction log.
//!
//! This is the single system of record. Every money-moving operation is one
//! of three units of work, each executed inside a single SQLite transaction
//! so partial application is impossible:
//! - placement: balance check + debit + trade insert + transaction insert
//! - settlement: terminal trade update + optional credit + transaction insert
//! - adjustment: standalone credit/debit + transaction insert
//!
//! The `active -> settling` claim is a compare-and-set UPDATE and is the
//! mutual-exclusion primitive that keeps concurrent settlers from paying a
//! trade twice.

use crate::types::{
    BalanceClass, OpeningBalances, Trade, TradeControl, TradeDirection, TradeStatus, Transaction,
    TransactionKind, TransactionStatus, Wallet,
};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;
use tracing::{debug, error, info};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: Decimal, available: Decimal },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Everything a settlement applies in one unit of work.
///
/// `credit` is the wallet credit paired with the terminal update (stake plus
/// profit on a win, the bare stake on an admin cancel, absent on a loss).
/// The transaction record's user and balance class decide which wallet the
/// credit lands on.
#[derive(Debug, Clone)]
pub struct SettlementRecord {
    pub trade_id: String,
    pub status: TradeStatus,
    pub exit_price: Option<Decimal>,
    pub profit_loss: Decimal,
    pub closed_at: i64,
    pub credit: Option<Decimal>,
    pub record: Transaction,
}

/// SQLite store behind a single connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Create a new SQLite store at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, rusqlite::Error> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("SQLite store initialized");
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub fn new_in_memory() -> Result<Self, rusqlite::Error> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory SQLite store initialized");
        Ok(store)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<(), rusqlite::Error> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS wallets (
                user_id TEXT PRIMARY KEY,
                balance TEXT NOT NULL,
                demo_balance TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trades (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                asset TEXT NOT NULL,
                direction TEXT NOT NULL,
                stake TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                exit_price TEXT,
                payout_pct TEXT NOT NULL,
                profit_loss TEXT NOT NULL,
                status TEXT NOT NULL,
                is_demo INTEGER NOT NULL,
                placed_at INTEGER NOT NULL,
                expiry_time INTEGER NOT NULL,
                closed_at INTEGER
            )",
            [],
        )?;

        // Due-trade scans hit (status, expiry_time); user views hit
        // (user_id, status).
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_due ON trades(status, expiry_time)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_trades_user ON trades(user_id, status)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                amount TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                is_demo INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_user
             ON transactions(user_id, created_at DESC)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS trade_controls (
                user_id TEXT PRIMARY KEY,
                mode TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        info!("SQLite schema initialized");
        Ok(())
    }

    // ========== Wallet Methods ==========

    /// Get a wallet by user id.
    pub fn get_wallet(&self, user_id: &str) -> Option<Wallet> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            "SELECT user_id, balance, demo_balance, created_at, updated_at
             FROM wallets WHERE user_id = ?1",
            params![user_id],
            map_wallet_row,
        );

        match result {
            Ok(wallet) => Some(wallet),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => {
                error!("Error fetching wallet for {}: {}", user_id, e);
                None
            }
        }
    }

    /// Get a wallet, creating it with the opening balances on first access.
    ///
    /// The opening amounts are recorded as deposit transactions so the
    /// per-class reconciliation invariant holds from the start.
    pub fn get_or_create_wallet(
        &self,
        user_id: &str,
        opening: &OpeningBalances,
    ) -> Result<Wallet, StoreError> {
        if let Some(wallet) = self.get_wallet(user_id) {
            return Ok(wallet);
        }

        let wallet = Wallet::new(user_id.to_string(), opening.real, opening.demo);
        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;

            // A concurrent creator may have won the race; keep their row.
            let inserted = tx.execute(
                "INSERT OR IGNORE INTO wallets
                 (user_id, balance, demo_balance, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    wallet.user_id,
                    wallet.balance.to_string(),
                    wallet.demo_balance.to_string(),
                    wallet.created_at,
                    wallet.updated_at,
                ],
            )?;

            if inserted == 1 {
                for (class, amount) in [
                    (BalanceClass::Real, opening.real),
                    (BalanceClass::Demo, opening.demo),
                ] {
                    if amount.is_zero() {
                        continue;
                    }
                    let record = Transaction::new(
                        user_id.to_string(),
                        TransactionKind::Deposit,
                        amount,
                        "Opening balance".to_string(),
                        class,
                    );
                    insert_transaction(&tx, &record)?;
                }
            }
            tx.commit()?;
        }

        self.get_wallet(user_id)
            .ok_or_else(|| StoreError::InvalidState(format!("wallet missing for {}", user_id)))
    }

    // ========== Units of Work ==========

    /// Placement: check funds, debit the stake, insert the trade and its
    /// transaction record. All-or-nothing.
    pub fn execute_placement(
        &self,
        trade: &Trade,
        record: &Transaction,
    ) -> Result<(), StoreError> {
        let class = trade.balance_class();
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let available = balance_in(&tx, &trade.user_id, class)?;
        if available < trade.stake {
            // Rolls back on drop.
            return Err(StoreError::InsufficientFunds {
                needed: trade.stake,
                available,
            });
        }
        set_balance_in(&tx, &trade.user_id, class, available - trade.stake)?;

        tx.execute(
            "INSERT INTO trades
             (id, user_id, asset, direction, stake, entry_price, exit_price,
              payout_pct, profit_loss, status, is_demo, placed_at, expiry_time, closed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                trade.id,
                trade.user_id,
                trade.asset,
                trade.direction.as_str(),
                trade.stake.to_string(),
                trade.entry_price.to_string(),
                trade.exit_price.map(|p| p.to_string()),
                trade.payout_pct.to_string(),
                trade.profit_loss.to_string(),
                trade.status.as_str(),
                trade.is_demo as i64,
                trade.placed_at,
                trade.expiry_time,
                trade.closed_at,
            ],
        )?;

        insert_transaction(&tx, record)?;
        tx.commit()?;

        debug!("Placed trade {} ({} {})", trade.id, trade.asset, trade.direction);
        Ok(())
    }

    /// Settlement: move a claimed trade to its terminal state, apply the
    /// optional wallet credit and append the transaction record.
    /// All-or-nothing; fails with `InvalidState` when the claim is not held.
    pub fn execute_settlement(&self, settlement: &SettlementRecord) -> Result<(), StoreError> {
        if !settlement.status.is_terminal() {
            return Err(StoreError::InvalidState(format!(
                "settlement target status {} is not terminal",
                settlement.status
            )));
        }

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE trades
             SET status = ?1, exit_price = ?2, profit_loss = ?3, closed_at = ?4
             WHERE id = ?5 AND status = 'settling'",
            params![
                settlement.status.as_str(),
                settlement.exit_price.map(|p| p.to_string()),
                settlement.profit_loss.to_string(),
                settlement.closed_at,
                settlement.trade_id,
            ],
        )?;
        if changed != 1 {
            return Err(StoreError::InvalidState(format!(
                "trade {} is not claimed for settlement",
                settlement.trade_id
            )));
        }

        if let Some(credit) = settlement.credit {
            let user_id = &settlement.record.user_id;
            let class = settlement.record.balance_class();
            let balance = balance_in(&tx, user_id, class)?;
            set_balance_in(&tx, user_id, class, balance + credit)?;
        }

        insert_transaction(&tx, &settlement.record)?;
        tx.commit()?;

        debug!(
            "Settled trade {} as {} (P/L {})",
            settlement.trade_id, settlement.status, settlement.profit_loss
        );
        Ok(())
    }

    /// Standalone credit/debit with its paired record (deposits, admin
    /// adjustments). Negative deltas fail without mutating when the balance
    /// is insufficient.
    pub fn execute_adjustment(
        &self,
        user_id: &str,
        class: BalanceClass,
        delta: Decimal,
        record: &Transaction,
    ) -> Result<Wallet, StoreError> {
        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;

            let balance = balance_in(&tx, user_id, class)?;
            let next = balance + delta;
            if next < Decimal::ZERO {
                return Err(StoreError::InsufficientFunds {
                    needed: -delta,
                    available: balance,
                });
            }
            set_balance_in(&tx, user_id, class, next)?;
            insert_transaction(&tx, record)?;
            tx.commit()?;
        }

        self.get_wallet(user_id)
            .ok_or_else(|| StoreError::InvalidState(format!("wallet missing for {}", user_id)))
    }

    /// Append an informational transaction without touching any balance.
    pub fn append_transaction(&self, record: &Transaction) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        insert_transaction(&conn, record)?;
        Ok(())
    }

    // ========== Trade Queries ==========

    /// Get a trade by id.
    pub fn get_trade(&self, trade_id: &str) -> Option<Trade> {
        let conn = self.conn.lock().unwrap();
        let result = conn.query_row(
            &format!("SELECT {} FROM trades WHERE id = ?1", TRADE_COLUMNS),
            params![trade_id],
            map_trade_row,
        );

        match result {
            Ok(trade) => Some(trade),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => {
                error!("Error fetching trade {}: {}", trade_id, e);
                None
            }
        }
    }

    /// All active trades whose expiry has passed the cutoff.
    pub fn find_expired_active(&self, as_of_millis: i64) -> Vec<Trade> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(&format!(
            "SELECT {} FROM trades
             WHERE status = 'active' AND expiry_time <= ?1
             ORDER BY expiry_time ASC",
            TRADE_COLUMNS
        )) {
            Ok(stmt) => stmt,
            Err(e) => {
                error!("Error preparing due-trade query: {}", e);
                return Vec::new();
            }
        };

        stmt.query_map(params![as_of_millis], map_trade_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    /// A user's open trades (active or mid-settlement), newest first.
    pub fn find_active_for_user(&self, user_id: &str) -> Vec<Trade> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(&format!(
            "SELECT {} FROM trades
             WHERE user_id = ?1 AND status IN ('active', 'settling')
             ORDER BY placed_at DESC",
            TRADE_COLUMNS
        )) {
            Ok(stmt) => stmt,
            Err(e) => {
                error!("Error preparing active-trade query: {}", e);
                return Vec::new();
            }
        };

        stmt.query_map(params![user_id], map_trade_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    /// A user's trade history, newest first.
    pub fn find_history_for_user(&self, user_id: &str, limit: usize) -> Vec<Trade> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(&format!(
            "SELECT {} FROM trades
             WHERE user_id = ?1
             ORDER BY placed_at DESC
             LIMIT ?2",
            TRADE_COLUMNS
        )) {
            Ok(stmt) => stmt,
            Err(e) => {
                error!("Error preparing trade-history query: {}", e);
                return Vec::new();
            }
        };

        stmt.query_map(params![user_id, limit as i64], map_trade_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    // ========== Settlement Claims ==========

    /// Atomically claim a trade for settlement (`active -> settling`).
    ///
    /// With `due_before` set, only claims trades already expired at that
    /// cutoff; without it, claims any active trade (admin paths). Returns
    /// false when the trade is missing, already claimed, terminal, or not
    /// yet due.
    pub fn try_claim_for_settlement(
        &self,
        trade_id: &str,
        due_before: Option<i64>,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = match due_before {
            Some(cutoff) => conn.execute(
                "UPDATE trades SET status = 'settling'
                 WHERE id = ?1 AND status = 'active' AND expiry_time <= ?2",
                params![trade_id, cutoff],
            )?,
            None => conn.execute(
                "UPDATE trades SET status = 'settling'
                 WHERE id = ?1 AND status = 'active'",
                params![trade_id],
            )?,
        };
        Ok(changed == 1)
    }

    /// Roll a failed claim back (`settling -> active`) so the trade is
    /// retried by a later sweep.
    pub fn release_claim(&self, trade_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE trades SET status = 'active'
             WHERE id = ?1 AND status = 'settling'",
            params![trade_id],
        )?;
        Ok(changed == 1)
    }

    // ========== Trade Control ==========

    /// Per-user settlement override; defaults to normal.
    pub fn trade_control(&self, user_id: &str) -> TradeControl {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT mode FROM trade_controls WHERE user_id = ?1",
            params![user_id],
            |row| row.get::<_, String>(0),
        )
        .ok()
        .and_then(|mode| TradeControl::parse(&mode))
        .unwrap_or_default()
    }

    /// Set the per-user settlement override (admin only).
    pub fn set_trade_control(&self, user_id: &str, mode: TradeControl) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO trade_controls (user_id, mode, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id) DO UPDATE SET
                mode = excluded.mode,
                updated_at = excluded.updated_at",
            params![
                user_id,
                mode.as_str(),
                chrono::Utc::now().timestamp_millis()
            ],
        )?;
        Ok(())
    }

    // ========== Transaction Queries ==========

    /// A user's transactions, newest first.
    pub fn transactions_for_user(&self, user_id: &str, limit: usize) -> Vec<Transaction> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(
            "SELECT id, user_id, kind, amount, description, status, is_demo, created_at
             FROM transactions
             WHERE user_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2",
        ) {
            Ok(stmt) => stmt,
            Err(e) => {
                error!("Error preparing transaction query: {}", e);
                return Vec::new();
            }
        };

        stmt.query_map(params![user_id, limit as i64], map_transaction_row)
            .map(|rows| rows.filter_map(|r| r.ok()).collect())
            .unwrap_or_default()
    }

    /// Sum of completed transaction amounts for one balance class. At any
    /// consistent snapshot this equals the wallet balance.
    pub fn transaction_sum(&self, user_id: &str, class: BalanceClass) -> Decimal {
        let conn = self.conn.lock().unwrap();
        let mut stmt = match conn.prepare(
            "SELECT amount FROM transactions
             WHERE user_id = ?1 AND is_demo = ?2 AND status = 'completed'",
        ) {
            Ok(stmt) => stmt,
            Err(e) => {
                error!("Error preparing reconciliation query: {}", e);
                return Decimal::ZERO;
            }
        };

        stmt.query_map(params![user_id, class.is_demo() as i64], |row| {
            row.get::<_, String>(0)
        })
        .map(|rows| {
            rows.filter_map(|r| r.ok())
                .filter_map(|s| s.parse::<Decimal>().ok())
                .sum()
        })
        .unwrap_or(Decimal::ZERO)
    }
}

const TRADE_COLUMNS: &str = "id, user_id, asset, direction, stake, entry_price, exit_price, \
     payout_pct, profit_loss, status, is_demo, placed_at, expiry_time, closed_at";

fn insert_transaction(conn: &Connection, record: &Transaction) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO transactions
         (id, user_id, kind, amount, description, status, is_demo, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.id,
            record.user_id,
            record.kind.as_str(),
            record.amount.to_string(),
            record.description,
            record.status.as_str(),
            record.is_demo as i64,
            record.created_at,
        ],
    )?;
    Ok(())
}

fn balance_in(
    conn: &Connection,
    user_id: &str,
    class: BalanceClass,
) -> Result<Decimal, StoreError> {
    let column = balance_column(class);
    let result = conn.query_row(
        &format!("SELECT {} FROM wallets WHERE user_id = ?1", column),
        params![user_id],
        |row| row.get::<_, String>(0),
    );

    match result {
        Ok(s) => Ok(parse_decimal(&s)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Err(StoreError::InvalidState(format!(
            "wallet missing for {}",
            user_id
        ))),
        Err(e) => Err(e.into()),
    }
}

fn set_balance_in(
    conn: &Connection,
    user_id: &str,
    class: BalanceClass,
    balance: Decimal,
) -> Result<(), StoreError> {
    let column = balance_column(class);
    conn.execute(
        &format!(
            "UPDATE wallets SET {} = ?1, updated_at = ?2 WHERE user_id = ?3",
            column
        ),
        params![
            balance.round_dp(2).to_string(),
            chrono::Utc::now().timestamp_millis(),
            user_id,
        ],
    )?;
    Ok(())
}

fn balance_column(class: BalanceClass) -> &'static str {
    match class {
        BalanceClass::Real => "balance",
        BalanceClass::Demo => "demo_balance",
    }
}

fn parse_decimal(s: &str) -> Decimal {
    s.parse().unwrap_or(Decimal::ZERO)
}

fn map_wallet_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Wallet> {
    Ok(Wallet {
        user_id: row.get(0)?,
        balance: parse_decimal(&row.get::<_, String>(1)?),
        demo_balance: parse_decimal(&row.get::<_, String>(2)?),
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn map_trade_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Trade> {
    let direction: String = row.get(3)?;
    let status: String = row.get(9)?;
    Ok(Trade {
        id: row.get(0)?,
        user_id: row.get(1)?,
        asset: row.get(2)?,
        direction: TradeDirection::parse(&direction).unwrap_or(TradeDirection::Call),
        stake: parse_decimal(&row.get::<_, String>(4)?),
        entry_price: parse_decimal(&row.get::<_, String>(5)?),
        exit_price: row
            .get::<_, Option<String>>(6)?
            .map(|s| parse_decimal(&s)),
        payout_pct: parse_decimal(&row.get::<_, String>(7)?),
        profit_loss: parse_decimal(&row.get::<_, String>(8)?),
        status: TradeStatus::parse(&status).unwrap_or(TradeStatus::Active),
        is_demo: row.get::<_, i64>(10)? != 0,
        placed_at: row.get(11)?,
        expiry_time: row.get(12)?,
        closed_at: row.get(13)?,
    })
}

fn map_transaction_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transaction> {
    let kind: String = row.get(2)?;
    let status: String = row.get(5)?;
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        kind: TransactionKind::parse(&kind).unwrap_or(TransactionKind::Adjustment),
        amount: parse_decimal(&row.get::<_, String>(3)?),
        description: row.get(4)?,
        status: TransactionStatus::parse(&status).unwrap_or_default(),
        is_demo: row.get::<_, i64>(6)? != 0,
        created_at: row.get(7)?,
    })
}
