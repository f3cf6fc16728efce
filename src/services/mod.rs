pub mod ledger;
pub mod payout;
pub mod settlement;
pub mod sqlite_store;
pub mod trade_store;
pub mod trading;

pub use ledger::{Ledger, LedgerError, Reconciliation};
pub use payout::{FixedPayout, PayoutCalculator, VolatilityLevel, VolatilityPayout};
pub use settlement::{EngineStats, SettlementConfig, SettlementEngine, SettlementError};
pub use sqlite_store::{SettlementRecord, SqliteStore, StoreError};
pub use trade_store::TradeStore;
pub use trading::{TradingConfig, TradingError, TradingService};
