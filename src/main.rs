//! Gambit Server
//!
//! Chess session server. Configuration comes from `GAMBIT_*` and `AUTH_*`
//! environment variables; log filtering from `RUST_LOG`.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gambit::{
    network::{GameServer, ServerConfig},
    persist::{Finalizer, JsonLinesMatchStore, MatchStore, MemoryMatchStore},
    VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::from_env();
    info!("Gambit Server v{}", VERSION);
    info!(
        addr = %config.bind_addr,
        max_connections = config.max_connections,
        grace_ms = config.grace_period.as_millis() as u64,
        verify_timeouts = config.verify_timeouts,
        auth = config.auth.is_configured(),
        "Configuration loaded"
    );

    let store: Arc<dyn MatchStore> = match &config.record_path {
        Some(path) => {
            let journal = JsonLinesMatchStore::open(path)
                .await
                .with_context(|| format!("opening match journal {}", path.display()))?;
            info!(path = %path.display(), "Recording matches to journal");
            Arc::new(journal)
        }
        None => {
            warn!("GAMBIT_RECORD_PATH unset, match history is kept in memory only");
            Arc::new(MemoryMatchStore::new())
        }
    };
    let (finalizer, worker) = Finalizer::spawn(store);

    let server = Arc::new(GameServer::new(config, finalizer));
    let signal_server = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received");
            signal_server.shutdown();
        }
    });

    server.run().await.context("game server failed")?;

    // dropping the server closes the finalizer queue once sessions drain
    drop(server);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), worker).await;
    info!("Server stopped");
    Ok(())
}
