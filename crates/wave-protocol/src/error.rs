use wave_transport::{ChannelId, PeerIdentity};

use crate::floor::FloorState;

/// Protocol-level errors.
///
/// Wraps transport errors and adds protocol-specific variants (codec,
/// floor misuse, runtime lifecycle, discovery beacon).
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("transport error: {0}")]
    Transport(#[from] wave_transport::TransportError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),

    #[error("empty control message")]
    EmptyMessage,

    #[error("unknown control message kind {0}")]
    UnknownMessageKind(u8),

    #[error("identity mismatch: message claims {claimed}, sent by {sender}")]
    IdentityMismatch {
        claimed: PeerIdentity,
        sender: PeerIdentity,
    },

    #[error("cannot request the floor while {state:?}")]
    CannotRequest { state: FloorState },

    #[error("not the floor holder")]
    NotHolder,

    #[error("no pending floor request")]
    NoPendingRequest,

    #[error("channel not joined: {0}")]
    ChannelNotJoined(ChannelId),

    #[error("runtime shut down")]
    Shutdown,

    #[error("discovery beacon is not running")]
    BeaconNotRunning,

    #[error("invalid beacon message: {0}")]
    Beacon(String),

    #[error("signature verification failed")]
    InvalidSignature,
}

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ProtocolError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        ProtocolError::Deserialization(e.to_string())
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Beacon(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_unknown_kind() {
        let err = ProtocolError::UnknownMessageKind(42);
        assert_eq!(err.to_string(), "unknown control message kind 42");
    }

    #[test]
    fn display_cannot_request() {
        let err = ProtocolError::CannotRequest {
            state: FloorState::Granted,
        };
        assert_eq!(err.to_string(), "cannot request the floor while Granted");
    }

    #[test]
    fn display_shutdown() {
        assert_eq!(ProtocolError::Shutdown.to_string(), "runtime shut down");
    }

    #[test]
    fn from_decode_error() {
        let err: ProtocolError = rmp_serde::from_slice::<u64>(&[0xc1])
            .unwrap_err()
            .into();
        assert!(matches!(err, ProtocolError::Deserialization(_)));
    }
}
