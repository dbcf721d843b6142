//! Peer registry: tracking live connections, their roles and partners.
//!
//! The registry is plain data: it never performs I/O and never locks. The
//! [`RelayHub`](crate::hub::RelayHub) owns the one instance behind its
//! mutex, and the pairing operations in [`crate::pairing`] are the only code
//! that links peers to each other.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::channel::Outbox;
use crate::error::RelayError;

/// Free-form metadata a peer reports about itself in `identify`.
pub type PeerMetadata = serde_json::Map<String, serde_json::Value>;

/// Caller-chosen identifier of a connected peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerId(pub String);

impl PeerId {
    /// Create a PeerId from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Return the inner string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for PeerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which side of a pairing a peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Server,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Client => "client",
            Self::Server => "server",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(Self::Client),
            "server" => Ok(Self::Server),
            other => Err(RelayError::InvalidAddress(format!("unknown role '{other}'"))),
        }
    }
}

/// A registered peer.
#[derive(Debug, Clone)]
pub struct Peer {
    pub id: PeerId,
    pub role: Role,
    /// Write handle of the owning session.
    pub outbox: Outbox,
    /// Token of the session that registered this entry.
    pub session: Uuid,
    pub partner: Option<PeerId>,
    pub info: PeerMetadata,
    pub connected_at: DateTime<Utc>,
    pub last_liveness: DateTime<Utc>,
    /// Cleared while tearing down or once the outbox is known to be broken.
    pub active: bool,
    seq: u64,
}

impl Peer {
    /// Whether the peer may be sent to right now.
    pub fn is_sendable(&self) -> bool {
        self.active && !self.outbox.is_closed()
    }

    /// Whether the last liveness signal is older than `timeout` at `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match (now - self.last_liveness).to_std() {
            Ok(age) => age > timeout,
            // Liveness in the future of `now`: not stale.
            Err(_) => false,
        }
    }

    pub fn view(&self) -> PeerView {
        PeerView {
            peer_id: self.id.clone(),
            role: self.role,
            partner: self.partner.clone(),
            info: self.info.clone(),
            connected_at: self.connected_at,
            last_liveness: self.last_liveness,
            active: self.active,
        }
    }
}

/// Read-only projection of a peer, without its channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerView {
    pub peer_id: PeerId,
    pub role: Role,
    pub partner: Option<PeerId>,
    pub info: PeerMetadata,
    pub connected_at: DateTime<Utc>,
    pub last_liveness: DateTime<Utc>,
    pub active: bool,
}

/// Aggregate counts over the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total: usize,
    pub active: usize,
    pub servers: usize,
    pub clients: usize,
    /// Peers whose partner is registered.
    pub paired_peers: usize,
}

impl RegistryStats {
    /// Number of established pairs.
    pub fn pairs(&self) -> usize {
        self.paired_peers / 2
    }
}

/// Registry of all connected peers plus the per-role indices.
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, Peer>,
    /// Client ids in registration order.
    clients: Vec<PeerId>,
    /// Server ids in registration order.
    servers: Vec<PeerId>,
    next_seq: u64,
}

impl PeerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new peer with no partner and no metadata.
    ///
    /// Fails with [`RelayError::DuplicatePeer`] if the id is taken; callers
    /// that want to replace an entry must tear the old one down first.
    pub fn register(
        &mut self,
        id: PeerId,
        role: Role,
        outbox: Outbox,
        now: DateTime<Utc>,
    ) -> Result<&Peer, RelayError> {
        if self.peers.contains_key(&id) {
            return Err(RelayError::DuplicatePeer(id.0));
        }

        match role {
            Role::Client => self.clients.push(id.clone()),
            Role::Server => self.servers.push(id.clone()),
        }

        self.next_seq += 1;
        let peer = Peer {
            id: id.clone(),
            role,
            outbox,
            session: Uuid::new_v4(),
            partner: None,
            info: PeerMetadata::new(),
            connected_at: now,
            last_liveness: now,
            active: true,
            seq: self.next_seq,
        };
        Ok(self.peers.entry(id).or_insert(peer))
    }

    /// Get a peer by ID.
    pub fn get(&self, id: &PeerId) -> Option<&Peer> {
        self.peers.get(id)
    }

    /// Get a mutable reference to a peer by ID.
    pub fn get_mut(&mut self, id: &PeerId) -> Option<&mut Peer> {
        self.peers.get_mut(id)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    /// Remove a peer from the map and both role indices. No-op if absent.
    pub fn remove(&mut self, id: &PeerId) -> Option<Peer> {
        let removed = self.peers.remove(id)?;
        self.clients.retain(|c| c != id);
        self.servers.retain(|s| s != id);
        Some(removed)
    }

    /// Point `id` at `partner`. One-sided; see [`crate::pairing`].
    pub fn set_partner(&mut self, id: &PeerId, partner: &PeerId) {
        if let Some(peer) = self.peers.get_mut(id) {
            peer.partner = Some(partner.clone());
        }
    }

    /// Clear `id`'s partner and return what it was. One-sided.
    pub fn clear_partner(&mut self, id: &PeerId) -> Option<PeerId> {
        self.peers.get_mut(id).and_then(|peer| peer.partner.take())
    }

    /// The entry for `id`, only while it still belongs to `session`.
    pub fn owned(&self, id: &PeerId, session: Uuid) -> Option<&Peer> {
        self.peers.get(id).filter(|peer| peer.session == session)
    }

    /// Record a liveness signal.
    pub fn touch(&mut self, id: &PeerId, now: DateTime<Utc>) -> bool {
        match self.peers.get_mut(id) {
            Some(peer) => {
                peer.last_liveness = now;
                true
            }
            None => false,
        }
    }

    /// Replace the metadata reported by `identify`.
    pub fn set_info(&mut self, id: &PeerId, info: PeerMetadata) -> bool {
        match self.peers.get_mut(id) {
            Some(peer) => {
                peer.info = info;
                true
            }
            None => false,
        }
    }

    /// Mark the entry inactive if it still belongs to `session`.
    pub fn mark_inactive(&mut self, id: &PeerId, session: Uuid) {
        if let Some(peer) = self.peers.get_mut(id) {
            if peer.session == session {
                peer.active = false;
            }
        }
    }

    /// Server ids in registration order.
    pub fn servers(&self) -> &[PeerId] {
        &self.servers
    }

    /// Client ids in registration order.
    pub fn clients(&self) -> &[PeerId] {
        &self.clients
    }

    /// Ids and sessions of peers whose liveness has lapsed.
    pub fn stale(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<(PeerId, Uuid)> {
        let mut stale: Vec<&Peer> = self
            .peers
            .values()
            .filter(|p| p.is_stale(now, timeout))
            .collect();
        stale.sort_by_key(|p| p.seq);
        stale.into_iter().map(|p| (p.id.clone(), p.session)).collect()
    }

    /// All peers in registration order, without their channels.
    pub fn snapshot(&self) -> Vec<PeerView> {
        let mut peers: Vec<&Peer> = self.peers.values().collect();
        peers.sort_by_key(|p| p.seq);
        peers.into_iter().map(Peer::view).collect()
    }

    /// Outboxes of every registered peer.
    pub fn outboxes(&self) -> Vec<Outbox> {
        self.peers.values().map(|p| p.outbox.clone()).collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let paired_peers = self
            .peers
            .values()
            .filter(|p| p.partner.as_ref().is_some_and(|partner| self.contains(partner)))
            .count();
        RegistryStats {
            total: self.peers.len(),
            active: self.peers.values().filter(|p| p.active).count(),
            servers: self.servers.len(),
            clients: self.clients.len(),
            paired_peers,
        }
    }

    /// Return the total number of registered peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
