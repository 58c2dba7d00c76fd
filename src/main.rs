//! Card Duel Server
//!
//! Accepts WebSocket connections, pairs players and runs their duels.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use card_duel::{
    network::{AuthConfig, GameServer, ServerConfig},
    DuelConfig, VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    info!("Card Duel Server v{}", VERSION);

    let config = ServerConfig::from_env();
    let auth = AuthConfig::from_env();
    if auth.dev_mode {
        warn!("AUTH_DEV_MODE is on; unauthenticated uid parameters are accepted");
    } else if !auth.is_configured() {
        warn!("No AUTH_SECRET or AUTH_PUBLIC_KEY_PEM set; every connection will be rejected");
    }

    let catalog = config
        .load_catalog()
        .with_context(|| format!("Failed to load card catalog from {:?}", config.card_catalog_path))?;
    info!("Loaded {} cards", catalog.len());

    let server = Arc::new(GameServer::new(config, auth, catalog, DuelConfig::default()));

    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            signal_server.shutdown();
        }
    });

    server.run().await?;
    info!("Server stopped");
    Ok(())
}
