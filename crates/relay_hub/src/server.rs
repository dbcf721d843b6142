//! RelayServer: top-level coordinator for the relay.
//!
//! [`RelayServer`] owns the shared [`RelayHub`] and the background tasks that
//! feed it:
//! - WebSocket listener (one session task per connection)
//! - Admin HTTP listener (optional)
//! - Liveness monitor

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::admin;
use crate::config::RelayConfig;
use crate::error::RelayError;
use crate::hub::RelayHub;
use crate::liveness::LivenessMonitor;
use crate::transport;

/// How long [`RelayServer::stop`] waits for sessions to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// The relay process.
///
/// Call [`start()`](RelayServer::start) to bind the listeners and spawn the
/// background tasks, and [`stop()`](RelayServer::stop) to shut them down.
pub struct RelayServer {
    config: RelayConfig,
    hub: RelayHub,
    /// Shutdown signal broadcaster.
    shutdown_tx: Option<broadcast::Sender<()>>,
    running: bool,
    /// Bound WebSocket address, known once started.
    local_addr: Option<SocketAddr>,
    /// Bound admin address, if the admin surface is enabled.
    admin_addr: Option<SocketAddr>,
}

impl RelayServer {
    pub fn new(config: RelayConfig) -> Self {
        let hub = RelayHub::new(config.duplicate_policy);
        Self {
            config,
            hub,
            shutdown_tx: None,
            running: false,
            local_addr: None,
            admin_addr: None,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(RelayConfig::default())
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Handle to the shared registry.
    pub fn hub(&self) -> &RelayHub {
        &self.hub
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn admin_addr(&self) -> Option<SocketAddr> {
        self.admin_addr
    }

    /// Bind the listeners and spawn the transport, admin and liveness tasks.
    pub async fn start(&mut self) -> Result<(), RelayError> {
        if self.running {
            return Ok(());
        }

        // Bind everything first so a failure leaves nothing running.
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let admin_listener = if self.config.admin_enabled {
            Some(TcpListener::bind(self.config.admin_addr).await?)
        } else {
            None
        };

        let (shutdown_tx, _) = broadcast::channel(8);

        let hub = self.hub.clone();
        let server_shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = transport::start_server(listener, hub, server_shutdown).await {
                error!("WebSocket server error: {e}");
            }
        });

        if let Some(admin_listener) = admin_listener {
            self.admin_addr = Some(admin_listener.local_addr()?);
            let hub = self.hub.clone();
            let admin_shutdown = shutdown_tx.subscribe();
            tokio::spawn(async move {
                if let Err(e) = admin::start_admin(admin_listener, hub, admin_shutdown).await {
                    error!("Admin server error: {e}");
                }
            });
        }

        LivenessMonitor::new(
            self.hub.clone(),
            self.config.liveness_sweep_interval,
            self.config.liveness_timeout,
        )
        .spawn(shutdown_tx.subscribe());

        self.shutdown_tx = Some(shutdown_tx);
        self.local_addr = Some(local_addr);
        self.running = true;
        info!(
            "Relay started on {local_addr} (admin: {})",
            self.admin_addr
                .map(|a| a.to_string())
                .unwrap_or_else(|| "disabled".into())
        );
        Ok(())
    }

    /// Stop the listeners, close every connection and wait briefly for the
    /// sessions to tear down.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        self.hub.close_all("relay shutting down");

        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while self.hub.stats().total > 0 {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        if drained.is_err() {
            debug!(
                "{} peer(s) still registered after shutdown drain",
                self.hub.stats().total
            );
        }

        self.running = false;
        self.local_addr = None;
        self.admin_addr = None;
        info!("Relay stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
