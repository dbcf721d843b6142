//! Pairing engine: linking clients to servers and unwinding those links.
//!
//! Every operation here runs against a locked [`PeerRegistry`] and keeps
//! partner symmetry intact before returning. Notifications are not sent from
//! here; they are handed back as [`Delivery`] values for the caller to send
//! once the lock is released.

use tracing::{debug, info};
use uuid::Uuid;

use crate::channel::Outbox;
use crate::error::RelayError;
use crate::message::Notice;
use crate::peer::{Peer, PeerId, PeerRegistry, Role};

/// A notice addressed to a specific peer connection.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub to: PeerId,
    pub session: Uuid,
    pub outbox: Outbox,
    pub notice: Notice,
}

impl Delivery {
    fn to_peer(peer: &Peer, notice: Notice) -> Self {
        Self {
            to: peer.id.clone(),
            session: peer.session,
            outbox: peer.outbox.clone(),
            notice,
        }
    }
}

/// Result of removing a peer through teardown.
#[derive(Debug)]
pub struct Teardown {
    /// The entry that was removed.
    pub removed: Peer,
    /// `partner_disconnected` for the former partner, if it was active.
    pub notify: Option<Delivery>,
}

impl PeerRegistry {
    /// Pair `client_id` with the first active, unpaired server in
    /// registration order.
    ///
    /// Returns the `connected` / `client_connected` notices, or nothing if
    /// the client cannot be paired right now.
    pub fn auto_connect(&mut self, client_id: &PeerId) -> Vec<Delivery> {
        let Some(client) = self.get(client_id) else {
            return Vec::new();
        };
        if client.role != Role::Client || !client.active {
            return Vec::new();
        }
        if let Some(partner) = &client.partner {
            if self.contains(partner) {
                debug!("Client {client_id} already paired with {partner}");
                return Vec::new();
            }
        }

        let server_id = self
            .servers()
            .iter()
            .find(|id| {
                self.get(id)
                    .is_some_and(|s| s.is_sendable() && s.partner.is_none())
            })
            .cloned();

        let Some(server_id) = server_id else {
            info!("No available server for client {client_id}; leaving it unpaired");
            return Vec::new();
        };

        self.set_partner(client_id, &server_id);
        self.set_partner(&server_id, client_id);
        info!("Paired client {client_id} with server {server_id}");

        let mut deliveries = Vec::with_capacity(2);
        if let (Some(client), Some(server)) = (self.get(client_id), self.get(&server_id)) {
            deliveries.push(Delivery::to_peer(
                client,
                Notice::Connected {
                    partner: server_id.clone(),
                    partner_role: Role::Server,
                },
            ));
            deliveries.push(Delivery::to_peer(
                server,
                Notice::ClientConnected {
                    partner: client_id.clone(),
                    client_info: client.info.clone(),
                },
            ));
        }
        deliveries
    }

    /// Link `a` and `b` regardless of role.
    ///
    /// Any other partner either side had is unlinked first, so no one-sided
    /// link is left behind. No notices are produced.
    pub fn manual_connect(&mut self, a: &PeerId, b: &PeerId) -> Result<(), RelayError> {
        for id in [a, b] {
            if !self.contains(id) {
                return Err(RelayError::PeerNotFound(id.to_string()));
            }
        }
        if a == b {
            return Err(RelayError::SelfPairing(a.to_string()));
        }

        for (id, other) in [(a, b), (b, a)] {
            if let Some(previous) = self.clear_partner(id) {
                if &previous != other && self.get(&previous).and_then(|p| p.partner.as_ref()) == Some(id) {
                    self.clear_partner(&previous);
                    debug!("Unlinked {previous} from {id} before manual pairing");
                }
            }
        }

        self.set_partner(a, b);
        self.set_partner(b, a);
        info!("Manually paired {a} with {b}");
        Ok(())
    }

    /// Clear `id`'s pairing on both sides. Returns the former partner.
    ///
    /// The partner is not notified.
    pub fn disconnect(&mut self, id: &PeerId) -> Result<Option<PeerId>, RelayError> {
        if !self.contains(id) {
            return Err(RelayError::PeerNotFound(id.to_string()));
        }
        let partner = self.clear_partner(id);
        if let Some(partner) = &partner {
            if self.get(partner).and_then(|p| p.partner.as_ref()) == Some(id) {
                self.clear_partner(partner);
            }
            info!("Unpaired {id} from {partner}");
        }
        Ok(partner)
    }

    /// Remove `id`, unwinding its partner link first. No-op if absent.
    pub fn teardown(&mut self, id: &PeerId) -> Option<Teardown> {
        let peer = self.get_mut(id)?;
        peer.active = false;
        let partner = peer.partner.clone();

        let mut notify = None;
        if let Some(partner_id) = partner {
            if let Some(partner) = self.get_mut(&partner_id) {
                if partner.partner.as_ref() == Some(id) {
                    partner.partner = None;
                }
                if partner.is_sendable() {
                    notify = Some(Delivery::to_peer(
                        partner,
                        Notice::PartnerDisconnected {
                            partner_id: id.clone(),
                        },
                    ));
                }
            }
        }

        let removed = self.remove(id)?;
        debug!("Tore down {} peer {id}", removed.role);
        Some(Teardown { removed, notify })
    }

    /// [`teardown`](Self::teardown) only if the entry still belongs to
    /// `session`.
    pub fn teardown_session(&mut self, id: &PeerId, session: Uuid) -> Option<Teardown> {
        if self.get(id)?.session != session {
            debug!("Skipping teardown of {id}: entry belongs to a newer session");
            return None;
        }
        self.teardown(id)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::Outgoing;
    use chrono::Utc;
    use tokio::sync::mpsc;

    struct Harness {
        registry: PeerRegistry,
        receivers: Vec<(PeerId, mpsc::UnboundedReceiver<Outgoing>)>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                registry: PeerRegistry::new(),
                receivers: Vec::new(),
            }
        }

        fn add(&mut self, id: &str, role: Role) -> PeerId {
            let (outbox, rx) = Outbox::channel();
            let id = PeerId::from(id);
            self.registry
                .register(id.clone(), role, outbox, Utc::now())
                .unwrap();
            self.receivers.push((id.clone(), rx));
            id
        }

        fn partner(&self, id: &PeerId) -> Option<PeerId> {
            self.registry.get(id).and_then(|p| p.partner.clone())
        }

        fn assert_symmetric(&self) {
            for view in self.registry.snapshot() {
                if let Some(partner) = &view.partner {
                    if let Some(other) = self.registry.get(partner) {
                        assert_eq!(
                            other.partner.as_ref(),
                            Some(&view.peer_id),
                            "{} -> {partner} is one-sided",
                            view.peer_id
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_auto_connect_pairs_first_available_server() {
        let mut h = Harness::new();
        let s1 = h.add("S1", Role::Server);
        let s2 = h.add("S2", Role::Server);
        let c0 = h.add("C0", Role::Client);
        h.registry.manual_connect(&c0, &s2).unwrap();

        let c1 = h.add("C1", Role::Client);
        let deliveries = h.registry.auto_connect(&c1);

        assert_eq!(h.partner(&c1), Some(s1.clone()));
        assert_eq!(h.partner(&s1), Some(c1.clone()));
        assert_eq!(h.partner(&s2), Some(c0));
        assert_eq!(deliveries.len(), 2);
        assert_eq!(deliveries[0].to, c1);
        assert_eq!(
            deliveries[0].notice,
            Notice::Connected {
                partner: s1.clone(),
                partner_role: Role::Server,
            }
        );
        assert_eq!(deliveries[1].to, s1);
        h.assert_symmetric();
    }

    #[test]
    fn test_auto_connect_skips_paired_first_server() {
        let mut h = Harness::new();
        let s1 = h.add("S1", Role::Server);
        let s2 = h.add("S2", Role::Server);
        let c0 = h.add("C0", Role::Client);
        h.registry.manual_connect(&c0, &s1).unwrap();

        let c1 = h.add("C1", Role::Client);
        h.registry.auto_connect(&c1);
        assert_eq!(h.partner(&c1), Some(s2));
        h.assert_symmetric();
    }

    #[test]
    fn test_auto_connect_skips_inactive_server() {
        let mut h = Harness::new();
        let s1 = h.add("S1", Role::Server);
        let s2 = h.add("S2", Role::Server);
        let session = h.registry.get(&s1).unwrap().session;
        h.registry.mark_inactive(&s1, session);

        let c1 = h.add("C1", Role::Client);
        h.registry.auto_connect(&c1);
        assert_eq!(h.partner(&c1), Some(s2));
    }

    #[test]
    fn test_auto_connect_without_server_is_noop() {
        let mut h = Harness::new();
        let c1 = h.add("C1", Role::Client);
        assert!(h.registry.auto_connect(&c1).is_empty());
        assert!(h.partner(&c1).is_none());
    }

    #[test]
    fn test_auto_connect_ignores_servers_and_paired_clients() {
        let mut h = Harness::new();
        let s1 = h.add("S1", Role::Server);
        let s2 = h.add("S2", Role::Server);
        assert!(h.registry.auto_connect(&s1).is_empty());

        let c1 = h.add("C1", Role::Client);
        assert_eq!(h.registry.auto_connect(&c1).len(), 2);
        // A second identify does not hop to another server.
        assert!(h.registry.auto_connect(&c1).is_empty());
        assert_eq!(h.partner(&c1), Some(s1));
        assert!(h.partner(&s2).is_none());
    }

    #[test]
    fn test_client_info_in_client_connected() {
        let mut h = Harness::new();
        h.add("S1", Role::Server);
        let c1 = h.add("C1", Role::Client);
        let mut info = crate::peer::PeerMetadata::new();
        info.insert("os".into(), serde_json::json!("x"));
        h.registry.set_info(&c1, info.clone());

        let deliveries = h.registry.auto_connect(&c1);
        assert_eq!(
            deliveries[1].notice,
            Notice::ClientConnected {
                partner: c1,
                client_info: info,
            }
        );
    }

    #[test]
    fn test_manual_connect_unknown_peer() {
        let mut h = Harness::new();
        let c2 = h.add("C2", Role::Client);
        let result = h.registry.manual_connect(&c2, &PeerId::from("S2"));
        assert!(matches!(result, Err(RelayError::PeerNotFound(id)) if id == "S2"));
        assert!(h.partner(&c2).is_none());
        assert_eq!(h.registry.len(), 1);
    }

    #[test]
    fn test_manual_connect_self() {
        let mut h = Harness::new();
        let c1 = h.add("C1", Role::Client);
        assert!(matches!(
            h.registry.manual_connect(&c1, &c1),
            Err(RelayError::SelfPairing(_))
        ));
    }

    #[test]
    fn test_manual_connect_unlinks_previous_partners() {
        let mut h = Harness::new();
        let c1 = h.add("C1", Role::Client);
        let s1 = h.add("S1", Role::Server);
        let c2 = h.add("C2", Role::Client);
        let s2 = h.add("S2", Role::Server);
        h.registry.manual_connect(&c1, &s1).unwrap();
        h.registry.manual_connect(&c2, &s2).unwrap();

        h.registry.manual_connect(&c1, &s2).unwrap();

        assert_eq!(h.partner(&c1), Some(s2.clone()));
        assert_eq!(h.partner(&s2), Some(c1));
        assert!(h.partner(&s1).is_none());
        assert!(h.partner(&c2).is_none());
        h.assert_symmetric();
    }

    #[test]
    fn test_manual_connect_is_role_agnostic() {
        let mut h = Harness::new();
        let a = h.add("A", Role::Client);
        let b = h.add("B", Role::Client);
        h.registry.manual_connect(&a, &b).unwrap();
        assert_eq!(h.partner(&a), Some(b));
    }

    #[test]
    fn test_disconnect_clears_both_sides() {
        let mut h = Harness::new();
        let c1 = h.add("C1", Role::Client);
        let s1 = h.add("S1", Role::Server);
        h.registry.manual_connect(&c1, &s1).unwrap();

        let former = h.registry.disconnect(&c1).unwrap();
        assert_eq!(former, Some(s1.clone()));
        assert!(h.partner(&c1).is_none());
        assert!(h.partner(&s1).is_none());

        // Unpaired peer: fine, nothing to clear.
        assert_eq!(h.registry.disconnect(&c1).unwrap(), None);
        assert!(matches!(
            h.registry.disconnect(&PeerId::from("ghost")),
            Err(RelayError::PeerNotFound(_))
        ));
    }

    #[test]
    fn test_teardown_notifies_active_partner() {
        let mut h = Harness::new();
        let c1 = h.add("C1", Role::Client);
        let s1 = h.add("S1", Role::Server);
        h.registry.manual_connect(&c1, &s1).unwrap();

        let outcome = h.registry.teardown(&s1).unwrap();
        assert_eq!(outcome.removed.id, s1);
        let notify = outcome.notify.unwrap();
        assert_eq!(notify.to, c1);
        assert_eq!(
            notify.notice,
            Notice::PartnerDisconnected { partner_id: s1.clone() }
        );
        assert!(h.partner(&c1).is_none());
        assert!(!h.registry.contains(&s1));
        assert!(h.registry.servers().is_empty());
    }

    #[test]
    fn test_teardown_skips_inactive_partner() {
        let mut h = Harness::new();
        let c1 = h.add("C1", Role::Client);
        let s1 = h.add("S1", Role::Server);
        h.registry.manual_connect(&c1, &s1).unwrap();
        let session = h.registry.get(&c1).unwrap().session;
        h.registry.mark_inactive(&c1, session);

        let outcome = h.registry.teardown(&s1).unwrap();
        assert!(outcome.notify.is_none());
        assert!(h.partner(&c1).is_none());
    }

    #[test]
    fn test_teardown_is_idempotent() {
        let mut h = Harness::new();
        let c1 = h.add("C1", Role::Client);
        let s1 = h.add("S1", Role::Server);
        h.registry.manual_connect(&c1, &s1).unwrap();

        assert!(h.registry.teardown(&s1).is_some());
        let after_first = h.registry.snapshot();
        assert!(h.registry.teardown(&s1).is_none());
        assert_eq!(h.registry.snapshot(), after_first);
    }

    #[test]
    fn test_teardown_session_ignores_other_sessions() {
        let mut h = Harness::new();
        let c1 = h.add("C1", Role::Client);
        assert!(h.registry.teardown_session(&c1, Uuid::new_v4()).is_none());
        assert!(h.registry.contains(&c1));

        let session = h.registry.get(&c1).unwrap().session;
        assert!(h.registry.teardown_session(&c1, session).is_some());
        assert!(!h.registry.contains(&c1));
    }
}
