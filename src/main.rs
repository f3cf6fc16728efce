//! Settlement daemon: wires the store, oracle and engine, then sweeps due
//! trades on an interval. Placement and reads are driven by the (external)
//! web layer through the library crate.

use std::sync::Arc;
use std::time::Duration;
use strike::config::Config;
use strike::oracle::SimulatedFeed;
use strike::services::{Ledger, SettlementEngine, SqliteStore, TradeStore};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strike=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env();
    info!(
        "Starting strike settlement daemon (db: {})",
        config.database_path
    );

    // Wire the services
    let store = Arc::new(SqliteStore::new(&config.database_path)?);
    let trades = Arc::new(TradeStore::new(store.clone()));
    let ledger = Arc::new(Ledger::new(store, config.opening_balances()));
    let oracle = Arc::new(SimulatedFeed::new());
    let engine = Arc::new(SettlementEngine::new(
        trades,
        ledger,
        oracle,
        config.settlement(),
    ));

    // Periodic settlement sweep
    {
        let engine = engine.clone();
        let interval = Duration::from_secs(config.sweep_interval_secs);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let settled = engine.settle_due_trades(chrono::Utc::now()).await;
                if settled > 0 {
                    let stats = engine.stats();
                    info!(
                        "Lifetime: {} settled ({} wins / {} losses, {} fallback-priced, {} failures)",
                        stats.settled,
                        stats.wins,
                        stats.losses,
                        stats.fallback_prices,
                        stats.failures
                    );
                }
            }
        });
    }

    info!(
        "Sweeping every {}s - Ctrl-C to stop",
        config.sweep_interval_secs
    );
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    Ok(())
}
