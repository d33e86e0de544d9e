//! Demo binary: runs one simulated bingo round against the in-memory store
//! with all notifications rendered to the log.
//!
//! Configuration comes from `BINGO_CONFIG` (TOML path) plus `BINGO_*`
//! environment overrides.

use bingohall::config::{ConfigLoader, EngineConfig};
use bingohall::engine::BingoEngine;
use bingohall::ledger::Reason;
use bingohall::notify::TracingSink;
use bingohall::AccountId;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = match std::env::var("BINGO_CONFIG") {
        Ok(path) => ConfigLoader::new().with_path(path).load()?,
        Err(_) => {
            // Short timings so the demo round finishes quickly.
            let config = EngineConfig {
                countdown_secs: 3,
                call_interval_ms: 250,
                ..EngineConfig::default()
            };
            ConfigLoader::new().validate(&config)?;
            config
        }
    };

    info!(
        card_cost = config.card_cost,
        countdown_secs = config.countdown_secs,
        "starting demo round"
    );

    let engine = BingoEngine::new(config, Arc::new(TracingSink));

    for (name, card_id) in [("alice", 1), ("bob", 2), ("carol", 3)] {
        let ack = engine.join_lobby(AccountId::from(name), card_id)?;
        info!(
            player = name,
            position = ack.position,
            balance = ack.new_balance,
            "joined the lobby"
        );
    }

    // Wait for the countdown to start a session, then for it to settle.
    while engine.live_session_ids().is_empty() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    while !engine.live_session_ids().is_empty() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    for name in ["alice", "bob", "carol"] {
        let account = AccountId::from(name);
        info!(
            player = name,
            balance = engine.get_balance(&account),
            transactions = engine.transaction_history(&account, 10).len(),
            "final state"
        );
    }

    engine.admin_credit(&AccountId::from("alice"), 500, Reason::Deposit)?;
    info!(
        balance = engine.get_balance(&AccountId::from("alice")),
        "admin credited alice"
    );

    let statement =
        serde_json::to_string_pretty(&engine.transaction_history(&AccountId::from("alice"), 10))?;
    info!("alice statement:\n{}", statement);

    engine.shutdown();
    Ok(())
}
