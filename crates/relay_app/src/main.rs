mod logging;
mod paths;

use anyhow::{Context, Result};
use tracing::{error, info};

use relay_hub::{RelayConfig, RelayServer};

use crate::paths::RelayPaths;

#[tokio::main]
async fn main() -> Result<()> {
    let paths = RelayPaths::from_env()?;
    let _log_guard = logging::init_logging(&paths.logs)
        .with_context(|| format!("Failed to initialize logging in {}", paths.logs.display()))?;

    info!("Starting relay v{}", env!("CARGO_PKG_VERSION"));

    let config = RelayConfig::load_or_default(&paths.config).with_env_overrides();
    info!("Config: {} (listen {}, admin {})", paths.config.display(), config.listen_addr, config.admin_addr);

    let mut server = RelayServer::new(config);
    server
        .start()
        .await
        .context("Failed to start relay")?;

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }
    info!("Shutdown requested");
    server.stop().await;

    Ok(())
}
