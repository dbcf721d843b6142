//! Relay Hub: pairs client peers with server peers and relays their messages.
//!
//! Peers connect over WebSocket and declare a role. Clients are paired with a
//! free server on `identify`; afterwards each side's messages are forwarded
//! verbatim to its partner, gated by message kind and sender role.
//!
//! # Architecture
//!
//! - **Hub**: one lock-guarded [`PeerRegistry`] shared by every task.
//! - **Pairing**: automatic on client `identify`, manual through the admin
//!   surface, unwound on teardown with a `partner_disconnected` notice.
//! - **Sessions**: one task per connection, feeding frames to the router in
//!   arrival order and tearing down exactly once.
//! - **Liveness**: periodic sweep evicting peers that stopped pinging.
//! - **Transport**: WebSocket via `tokio-tungstenite`, addressed as
//!   `/ws/{peer_id}/{role}`.
//! - **Admin**: small HTTP/1.1 JSON surface for inspection and manual pairing.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use relay_hub::{RelayConfig, RelayServer};
//!
//! # async fn example() {
//! let mut server = RelayServer::new(RelayConfig::default());
//!
//! server.start().await.unwrap();
//! // ... peers connect to ws://0.0.0.0:8000/ws/{peer_id}/{role} ...
//! server.stop().await;
//! # }
//! ```

pub mod admin;
pub mod channel;
pub mod config;
pub mod error;
pub mod hub;
pub mod liveness;
pub mod message;
pub mod pairing;
pub mod peer;
pub mod router;
pub mod server;
pub mod session;
pub mod transport;

// Re-exports for convenience

pub use channel::{InboundChannel, Outbox, Outgoing};
pub use config::{DuplicatePolicy, RelayConfig};
pub use error::RelayError;
pub use hub::{Forward, RelayHub};
pub use liveness::LivenessMonitor;
pub use message::{Inbound, MessageKind, Notice};
pub use peer::{Peer, PeerId, PeerMetadata, PeerRegistry, PeerView, RegistryStats, Role};
pub use router::{Dispatch, MessageRouter};
pub use server::RelayServer;
pub use session::{Session, SessionExit, SessionReport, SessionState};
