//! forgor-sync coordination server.
//!
//! Holds only ciphertext, public keys, signatures, and ordering metadata;
//! never a private key, never plaintext.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use forgor_server::{build_router, AppState, ServerConfig};
use forgor_store::SqliteStore;

#[derive(Parser)]
#[command(name = "forgor-server", about = "forgor-sync vault coordination server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "forgor.toml")]
    config: PathBuf,

    /// Listen address override
    #[arg(short, long)]
    listen: Option<String>,

    /// Database path override
    #[arg(short, long)]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        ServerConfig::load(&cli.config)?
    } else {
        ServerConfig::default()
    };
    if let Some(listen) = cli.listen {
        config.listen_addr = listen;
    }
    if let Some(database) = cli.database {
        config.db_path = database;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(config.log_level.parse()?),
        )
        .init();

    tracing::info!(
        listen_addr = %config.listen_addr,
        db_path = %config.db_path.display(),
        "starting forgor coordination server"
    );

    let store = SqliteStore::open(&config.db_path)?;
    let state = AppState::new(store, &config);
    let app = build_router(state, &config);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutting down server...");
}
