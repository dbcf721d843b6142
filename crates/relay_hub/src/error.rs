//! Relay error types.

/// Errors that can occur in the relay_hub crate.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// The requested peer is not registered.
    #[error("Peer not found: {0}")]
    PeerNotFound(String),

    /// A peer with the same id is already registered.
    #[error("Peer already connected: {0}")]
    DuplicatePeer(String),

    /// A manual pairing tried to link a peer with itself.
    #[error("Cannot pair peer {0} with itself")]
    SelfPairing(String),

    /// An inbound payload could not be parsed or has no usable `type`.
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// The peer's channel has been closed.
    #[error("Transport closed")]
    TransportClosed,

    /// A frame could not be handed to the target peer's channel.
    #[error("Send to {0} failed")]
    SendFailure(String),

    /// A transport-level error (WebSocket accept/read/write).
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection address did not name a peer id and role.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// JSON serialization / deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// HTTP status used when the error is reported by the admin surface.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::PeerNotFound(_) => 404,
            Self::DuplicatePeer(_) => 409,
            Self::SelfPairing(_) | Self::MalformedMessage(_) | Self::InvalidAddress(_) => 400,
            Self::TransportClosed
            | Self::SendFailure(_)
            | Self::Transport(_)
            | Self::Serialization(_)
            | Self::Io(_) => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(RelayError::PeerNotFound("s1".into()).status_code(), 404);
        assert_eq!(RelayError::DuplicatePeer("s1".into()).status_code(), 409);
        assert_eq!(RelayError::SelfPairing("s1".into()).status_code(), 400);
        assert_eq!(RelayError::TransportClosed.status_code(), 500);
    }

    #[test]
    fn test_display_names_the_peer() {
        let err = RelayError::PeerNotFound("C2".into());
        assert_eq!(err.to_string(), "Peer not found: C2");
    }
}
