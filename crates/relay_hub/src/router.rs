//! Message router: answers control messages and forwards everything else.

use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::hub::{self, Forward, RelayHub};
use crate::message::{Inbound, MessageKind};
use crate::peer::PeerId;

/// What the router did with one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// `identify` metadata stored (and auto-pairing attempted for clients).
    Identified,
    /// `ping` answered with `pong`.
    Ponged,
    /// Relay attempt and its outcome.
    Forwarded(MessageKind, Forward),
    /// Unparseable or unknown frame, dropped.
    Dropped,
}

/// Routes inbound frames of a session to the hub.
#[derive(Debug, Clone)]
pub struct MessageRouter {
    hub: RelayHub,
}

impl MessageRouter {
    pub fn new(hub: RelayHub) -> Self {
        Self { hub }
    }

    /// Dispatch one text frame received from `from` on connection `session`.
    ///
    /// Frames from a session that no longer owns `from` touch nothing.
    pub fn dispatch(&self, from: &PeerId, session: Uuid, text: &str) -> Dispatch {
        let inbound = match Inbound::parse(text) {
            Ok(inbound) => inbound,
            Err(e) => {
                debug!("Dropping frame from {from}: {e}");
                return Dispatch::Dropped;
            }
        };

        match inbound {
            Inbound::Identify(info) => {
                debug!("Dispatching identify from {from}");
                self.hub.identify(from, session, info);
                Dispatch::Identified
            }
            Inbound::Ping => {
                trace!("Ping from {from}");
                if let Some(outbox) = self.hub.record_liveness(from, session) {
                    match hub::pong() {
                        Ok(pong) => {
                            if let Err(e) = outbox.send(pong) {
                                debug!("Pong to {from} dropped: {e}");
                            }
                        }
                        Err(e) => warn!("Failed to encode pong: {e}"),
                    }
                }
                Dispatch::Ponged
            }
            Inbound::Relay(kind) => {
                let outcome = self.hub.forward(from, session, kind, text);
                match &outcome {
                    Forward::Delivered(to) => trace!("Relayed {} {from} -> {to}", kind.as_str()),
                    other => debug!("Not relaying {} from {from}: {other:?}", kind.as_str()),
                }
                Dispatch::Forwarded(kind, outcome)
            }
            Inbound::Unknown(tag) => {
                debug!("Dropping unknown message type '{tag}' from {from}");
                Dispatch::Dropped
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
