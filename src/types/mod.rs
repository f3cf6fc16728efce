pub mod trade;
pub mod transaction;
pub mod wallet;

pub use trade::*;
pub use transaction::*;
pub use wallet::*;
