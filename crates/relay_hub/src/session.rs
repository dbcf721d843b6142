//! Session handler: binds one connection to the hub for its lifetime.
//!
//! A session registers its peer, feeds every inbound frame to the
//! [`MessageRouter`] in arrival order and, however the connection ends,
//! runs teardown exactly once.

use tracing::{debug, info, trace, warn};

use crate::channel::{InboundChannel, Outbox};
use crate::hub::RelayHub;
use crate::peer::{PeerId, Role};
use crate::router::MessageRouter;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Why a session left the active state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// Registration was refused; the peer never became active.
    Rejected,
    /// The peer closed the connection.
    Closed,
    /// Reading from the connection failed.
    ReadError,
    /// The outbound side went away (eviction, replacement or shutdown).
    OutboxClosed,
}

/// Summary returned when a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub exit: SessionExit,
    /// Number of frames handed to the router.
    pub frames: u64,
}

enum Event {
    Frame(String),
    Closed,
    ReadError,
    OutboxClosed,
}

/// One peer connection.
pub struct Session<C> {
    id: PeerId,
    role: Role,
    hub: RelayHub,
    router: MessageRouter,
    inbound: C,
    outbox: Outbox,
    state: SessionState,
}

impl<C: InboundChannel> Session<C> {
    pub fn new(hub: RelayHub, id: PeerId, role: Role, inbound: C, outbox: Outbox) -> Self {
        Self {
            id,
            role,
            router: MessageRouter::new(hub.clone()),
            hub,
            inbound,
            outbox,
            state: SessionState::Connecting,
        }
    }

    fn transition(&mut self, next: SessionState) {
        trace!("Session {} {:?} -> {next:?}", self.id, self.state);
        self.state = next;
    }

    /// Drive the session until the connection ends.
    pub async fn run(mut self) -> SessionReport {
        let session = match self.hub.register(self.id.clone(), self.role, self.outbox.clone()) {
            Ok(session) => session,
            Err(e) => {
                warn!("Refusing {} {}: {e}", self.role, self.id);
                self.outbox.close(e.to_string());
                self.transition(SessionState::Closed);
                return SessionReport {
                    exit: SessionExit::Rejected,
                    frames: 0,
                };
            }
        };
        self.transition(SessionState::Active);
        info!("Session for {} {} active", self.role, self.id);

        let mut frames = 0u64;
        let exit = loop {
            let event = tokio::select! {
                received = self.inbound.recv() => match received {
                    Some(Ok(text)) => Event::Frame(text),
                    Some(Err(e)) => {
                        debug!("Read error from {}: {e}", self.id);
                        Event::ReadError
                    }
                    None => Event::Closed,
                },
                _ = self.outbox.closed() => Event::OutboxClosed,
            };

            match event {
                Event::Frame(text) => {
                    frames += 1;
                    self.router.dispatch(&self.id, session, &text);
                }
                Event::Closed => break SessionExit::Closed,
                Event::ReadError => break SessionExit::ReadError,
                Event::OutboxClosed => break SessionExit::OutboxClosed,
            }
        };

        self.transition(SessionState::Closing);
        if !self.hub.teardown_session(&self.id, session) {
            debug!("{} was already removed before its session closed", self.id);
        }
        self.transition(SessionState::Closed);
        info!("Session for {} closed ({exit:?}, {frames} frames)", self.id);

        SessionReport { exit, frames }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
