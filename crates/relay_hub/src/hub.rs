//! Relay hub: the shared, lock-guarded owner of the peer registry.
//!
//! Every session, the liveness monitor and the admin surface go through a
//! cloned [`RelayHub`]. All reads and writes of pairing state happen inside
//! one `parking_lot::Mutex`; sends happen after the guard is dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::Outbox;
use crate::config::DuplicatePolicy;
use crate::error::RelayError;
use crate::message::{MessageKind, Notice};
use crate::pairing::{Delivery, Teardown};
use crate::peer::{PeerId, PeerMetadata, PeerRegistry, PeerView, RegistryStats, Role};

/// Outcome of a forwarding attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Forward {
    /// Queued on the partner's channel.
    Delivered(PeerId),
    /// The sender is not registered (already torn down).
    UnknownSender,
    /// The sender's role may not send this kind.
    RoleMismatch,
    /// The sender has no registered partner.
    NoPartner,
    /// The partner is being torn down or its channel is broken.
    PartnerInactive(PeerId),
    /// The partner's channel refused the frame; it is now marked inactive.
    SendFailed(PeerId),
}

/// Shared handle to the relay's registry.
#[derive(Debug, Clone)]
pub struct RelayHub {
    registry: Arc<Mutex<PeerRegistry>>,
    duplicate_policy: DuplicatePolicy,
}

impl RelayHub {
    pub fn new(duplicate_policy: DuplicatePolicy) -> Self {
        Self {
            registry: Arc::new(Mutex::new(PeerRegistry::new())),
            duplicate_policy,
        }
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicate_policy
    }

    /// Register a new connection and return its session token.
    pub fn register(&self, id: PeerId, role: Role, outbox: Outbox) -> Result<Uuid, RelayError> {
        let mut superseded: Option<Teardown> = None;
        let session = {
            let mut registry = self.registry.lock();
            if registry.contains(&id) {
                match self.duplicate_policy {
                    DuplicatePolicy::Reject => {
                        warn!("Rejecting connection for {id}: id already registered");
                        return Err(RelayError::DuplicatePeer(id.0));
                    }
                    DuplicatePolicy::Replace => {
                        warn!("Replacing existing connection for {id}");
                        superseded = registry.teardown(&id);
                    }
                }
            }
            registry.register(id.clone(), role, outbox, Utc::now())?.session
        };

        if let Some(old) = superseded {
            old.removed.outbox.close("superseded by a new connection");
            self.deliver(old.notify);
        }
        info!("Registered {role} {id}");
        Ok(session)
    }

    /// Store `identify` metadata; clients are then offered a server.
    ///
    /// Ignored unless `session` still owns the entry for `id`.
    pub fn identify(&self, id: &PeerId, session: Uuid, info: PeerMetadata) {
        let deliveries = {
            let mut registry = self.registry.lock();
            let Some(role) = registry.owned(id, session).map(|p| p.role) else {
                debug!("Ignoring identify from a superseded session of {id}");
                return;
            };
            registry.set_info(id, info);
            match role {
                Role::Client => registry.auto_connect(id),
                Role::Server => Vec::new(),
            }
        };
        self.deliver(deliveries);
    }

    /// Record a liveness signal and return the peer's own outbox.
    ///
    /// `None` if `session` no longer owns the entry for `id`.
    pub fn record_liveness(&self, id: &PeerId, session: Uuid) -> Option<Outbox> {
        let mut registry = self.registry.lock();
        let outbox = registry.owned(id, session)?.outbox.clone();
        registry.touch(id, Utc::now());
        Some(outbox)
    }

    /// Forward `text` verbatim from `from` to its partner, applying role
    /// gating for `kind`. A sender whose `session` no longer owns its entry
    /// is treated as unknown.
    pub fn forward(&self, from: &PeerId, session: Uuid, kind: MessageKind, text: &str) -> Forward {
        let (target, target_session, outbox) = {
            let registry = self.registry.lock();
            let Some(sender) = registry.owned(from, session) else {
                return Forward::UnknownSender;
            };
            if kind.forwarding_role() != Some(sender.role) {
                return Forward::RoleMismatch;
            }
            let Some(partner) = sender.partner.as_ref().and_then(|p| registry.get(p)) else {
                return Forward::NoPartner;
            };
            if !partner.is_sendable() {
                return Forward::PartnerInactive(partner.id.clone());
            }
            (partner.id.clone(), partner.session, partner.outbox.clone())
        };

        match outbox.send(text) {
            Ok(()) => Forward::Delivered(target),
            Err(_) => {
                debug!("{}", RelayError::SendFailure(target.to_string()));
                self.registry.lock().mark_inactive(&target, target_session);
                Forward::SendFailed(target)
            }
        }
    }

    /// Pair two registered peers by hand.
    pub fn manual_connect(&self, a: &PeerId, b: &PeerId) -> Result<(), RelayError> {
        self.registry.lock().manual_connect(a, b)
    }

    /// Unpair `id` from its partner without notifying either side.
    pub fn disconnect(&self, id: &PeerId) -> Result<Option<PeerId>, RelayError> {
        self.registry.lock().disconnect(id)
    }

    /// Teardown on behalf of the session that owns the entry.
    pub fn teardown_session(&self, id: &PeerId, session: Uuid) -> bool {
        let outcome = self.registry.lock().teardown_session(id, session);
        self.finish_teardown(outcome)
    }

    /// Evict every peer whose last liveness signal is older than `timeout`
    /// at `now`. Returns the evicted ids.
    pub fn evict_stale(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<PeerId> {
        let outcomes: Vec<Teardown> = {
            let mut registry = self.registry.lock();
            registry
                .stale(now, timeout)
                .into_iter()
                .filter_map(|(id, session)| registry.teardown_session(&id, session))
                .collect()
        };

        let mut evicted = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            warn!("Evicting {} after liveness timeout", outcome.removed.id);
            outcome.removed.outbox.close("liveness timeout");
            evicted.push(outcome.removed.id.clone());
            self.deliver(outcome.notify);
        }
        evicted
    }

    /// Ask every connection to close.
    pub fn close_all(&self, reason: &str) {
        let outboxes = self.registry.lock().outboxes();
        for outbox in outboxes {
            outbox.close(reason);
        }
    }

    /// Read-only view of one peer.
    pub fn peer(&self, id: &PeerId) -> Option<PeerView> {
        self.registry.lock().get(id).map(|p| p.view())
    }

    /// All peers in registration order.
    pub fn snapshot(&self) -> Vec<PeerView> {
        self.registry.lock().snapshot()
    }

    pub fn stats(&self) -> RegistryStats {
        self.registry.lock().stats()
    }

    fn finish_teardown(&self, outcome: Option<Teardown>) -> bool {
        match outcome {
            Some(outcome) => {
                info!("Removed {} {}", outcome.removed.role, outcome.removed.id);
                self.deliver(outcome.notify);
                true
            }
            None => false,
        }
    }

    /// Send notices outside the lock. Failures are logged and swallowed.
    fn deliver(&self, deliveries: impl IntoIterator<Item = Delivery>) {
        for delivery in deliveries {
            let json = match delivery.notice.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to encode notice for {}: {e}", delivery.to);
                    continue;
                }
            };
            if let Err(e) = delivery.outbox.send(json) {
                debug!("Notice to {} dropped: {e}", delivery.to);
                self.registry
                    .lock()
                    .mark_inactive(&delivery.to, delivery.session);
            }
        }
    }
}

impl Default for RelayHub {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default())
    }
}

/// Encode a `pong` for the current time.
pub(crate) fn pong() -> Result<String, serde_json::Error> {
    Notice::pong_now().to_json()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
