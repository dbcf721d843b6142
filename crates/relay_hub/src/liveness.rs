//! Liveness monitor: evicts peers that stopped pinging.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::hub::RelayHub;
use crate::peer::PeerId;

/// Periodic sweep over the registry.
///
/// Eviction goes through the same teardown path as a closed connection, so
/// the partner is notified and the role indices are cleaned up identically.
#[derive(Debug, Clone)]
pub struct LivenessMonitor {
    hub: RelayHub,
    interval: Duration,
    timeout: Duration,
}

impl LivenessMonitor {
    pub fn new(hub: RelayHub, interval: Duration, timeout: Duration) -> Self {
        Self {
            hub,
            interval,
            timeout,
        }
    }

    /// Run one sweep against the current time.
    pub fn sweep(&self) -> Vec<PeerId> {
        self.sweep_at(Utc::now())
    }

    /// Run one sweep as if the clock read `now`.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> Vec<PeerId> {
        let evicted = self.hub.evict_stale(now, self.timeout);
        if !evicted.is_empty() {
            info!("Liveness sweep evicted {} peer(s)", evicted.len());
        }
        evicted
    }

    /// Sweep every `interval` until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    self.sweep();
                }
                _ = shutdown.recv() => {
                    debug!("Liveness monitor shutting down");
                    break;
                }
            }
        }
    }

    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Outbox, Outgoing};
    use crate::peer::Role;

    #[test]
    fn test_sweep_keeps_fresh_peers() {
        let hub = RelayHub::default();
        let (outbox, _rx) = Outbox::channel();
        hub.register(PeerId::from("C1"), Role::Client, outbox).unwrap();

        let monitor = LivenessMonitor::new(hub.clone(), Duration::from_secs(60), Duration::from_secs(120));
        assert!(monitor.sweep().is_empty());
        assert_eq!(hub.stats().total, 1);
    }

    #[test]
    fn test_sweep_evicts_silent_peer_and_notifies_partner() {
        let hub = RelayHub::default();
        let (s_outbox, mut s_rx) = Outbox::channel();
        let (c_outbox, _c_rx) = Outbox::channel();
        let s1 = PeerId::from("S1");
        let c1 = PeerId::from("C1");
        hub.register(s1.clone(), Role::Server, s_outbox).unwrap();
        hub.register(c1.clone(), Role::Client, c_outbox).unwrap();
        hub.manual_connect(&c1, &s1).unwrap();

        let monitor = LivenessMonitor::new(hub.clone(), Duration::from_secs(60), Duration::from_secs(120));
        let evicted = monitor.sweep_at(Utc::now() + chrono::Duration::seconds(180));

        // Neither pinged, both go; each saw at most one notice.
        assert_eq!(evicted.len(), 2);
        assert_eq!(hub.stats().total, 0);
        let mut partner_notices = 0;
        while let Ok(frame) = s_rx.try_recv() {
            if let Outgoing::Text(text) = frame {
                assert!(text.contains("partner_disconnected"));
                partner_notices += 1;
            }
        }
        assert!(partner_notices <= 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let hub = RelayHub::default();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let monitor = LivenessMonitor::new(hub, Duration::from_millis(10), Duration::from_secs(120));
        let handle = monitor.spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(30)).await;
        shutdown_tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("monitor did not stop")
            .unwrap();
    }
}
