use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::broadcast;

use recoin_core::events::ChatEvent;
use recoin_engine::ThreadEngine;
use recoin_store::Database;

/// Chat server for item listings: one thread per user pair per item.
#[derive(Parser)]
#[command(name = "recoin", version, about)]
struct Cli {
    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Path to the SQLite database file
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Starting recoin chat server");

    let db_path = cli
        .db_path
        .unwrap_or_else(|| dirs_home().join(".recoin").join("database").join("chat.db"));

    let db = Database::open(&db_path).expect("Failed to open database");

    // Event broadcast channel
    let (event_tx, _) = broadcast::channel::<ChatEvent>(1024);

    let engine = Arc::new(ThreadEngine::new(db.clone(), event_tx.clone()));

    // Start server
    let mut config = recoin_server::ServerConfig::default();
    if let Some(port) = cli.port {
        config.port = port;
    }
    let port = config.port;
    let _handle = recoin_server::start(config, db, engine, event_tx)
        .await
        .expect("Failed to start server");

    tracing::info!(port = port, "Recoin server ready");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for ctrl+c");

    tracing::info!("Shutting down");
}

fn dirs_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}
