//! Relay message protocol: typed classification of inbound frames and the
//! notices the coordinator originates.
//!
//! The relay never re-encodes forwarded traffic: inbound frames are parsed
//! only far enough to read their `type` tag (and `info` for `identify`); the
//! original text is what reaches the partner.

use serde::{Deserialize, Serialize};

use crate::error::RelayError;
use crate::peer::{PeerId, PeerMetadata, Role};

/// Recognized values of the inbound `type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    // ── Control ────────────────────────────────────────────────────
    /// Peer reports its metadata; clients get auto-paired.
    Identify,
    /// Liveness signal, answered with `pong`.
    Ping,

    // ── Server → client ────────────────────────────────────────────
    Command,
    ModuleDownload,
    InfoRequest,

    // ── Client → server ────────────────────────────────────────────
    CommandResult,
    ModuleSuccess,
    ModuleError,
    InfoResponse,
}

impl MessageKind {
    /// Parse a wire tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Some(match tag {
            "identify" => Self::Identify,
            "ping" => Self::Ping,
            "command" => Self::Command,
            "module_download" => Self::ModuleDownload,
            "info_request" => Self::InfoRequest,
            "command_result" => Self::CommandResult,
            "module_success" => Self::ModuleSuccess,
            "module_error" => Self::ModuleError,
            "info_response" => Self::InfoResponse,
            _ => return None,
        })
    }

    /// The wire tag for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Identify => "identify",
            Self::Ping => "ping",
            Self::Command => "command",
            Self::ModuleDownload => "module_download",
            Self::InfoRequest => "info_request",
            Self::CommandResult => "command_result",
            Self::ModuleSuccess => "module_success",
            Self::ModuleError => "module_error",
            Self::InfoResponse => "info_response",
        }
    }

    /// The role allowed to send this kind for forwarding, or `None` for
    /// control messages the coordinator answers itself.
    pub fn forwarding_role(&self) -> Option<Role> {
        match self {
            Self::Identify | Self::Ping => None,
            Self::Command | Self::ModuleDownload | Self::InfoRequest => Some(Role::Server),
            Self::CommandResult | Self::ModuleSuccess | Self::ModuleError | Self::InfoResponse => {
                Some(Role::Client)
            }
        }
    }
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// `identify` with its metadata object (empty if omitted).
    Identify(PeerMetadata),
    /// `ping`.
    Ping,
    /// A message to relay verbatim to the partner.
    Relay(MessageKind),
    /// Well-formed but carrying a `type` the relay does not know.
    Unknown(String),
}

impl Inbound {
    /// Classify a text frame.
    ///
    /// Fails with [`RelayError::MalformedMessage`] if the text is not a JSON
    /// object with a string `type` field.
    pub fn parse(text: &str) -> Result<Self, RelayError> {
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| RelayError::MalformedMessage(e.to_string()))?;
        let serde_json::Value::Object(mut fields) = value else {
            return Err(RelayError::MalformedMessage("expected a JSON object".into()));
        };
        let tag = match fields.remove("type") {
            Some(serde_json::Value::String(tag)) => tag,
            Some(_) => return Err(RelayError::MalformedMessage("type must be a string".into())),
            None => return Err(RelayError::MalformedMessage("missing type".into())),
        };

        let Some(kind) = MessageKind::from_tag(&tag) else {
            return Ok(Self::Unknown(tag));
        };

        Ok(match kind {
            MessageKind::Identify => match fields.remove("info") {
                Some(serde_json::Value::Object(info)) => Self::Identify(info),
                None | Some(serde_json::Value::Null) => Self::Identify(PeerMetadata::new()),
                Some(_) => {
                    return Err(RelayError::MalformedMessage(
                        "identify info must be an object".into(),
                    ));
                }
            },
            MessageKind::Ping => Self::Ping,
            relayed => Self::Relay(relayed),
        })
    }
}

/// Messages originated by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// Answer to `ping`; Unix seconds.
    Pong { timestamp: i64 },
    /// Sent to a client once it is paired with a server.
    Connected { partner: PeerId, partner_role: Role },
    /// Sent to a server once a client is paired with it.
    ClientConnected {
        partner: PeerId,
        client_info: PeerMetadata,
    },
    /// Sent to a peer whose partner went away.
    PartnerDisconnected { partner_id: PeerId },
}

impl Notice {
    pub fn pong_now() -> Self {
        Self::Pong {
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    /// Serialize the notice to a JSON string for transmission.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
