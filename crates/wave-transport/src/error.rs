use std::net::SocketAddrV4;

/// Errors returned by the PTT transport layer.
///
/// Only `start()` and the building blocks surface these; the `send_*`
/// boundary reports plain success/failure and the receive path drops.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {group}: {source}")]
    Bind {
        group: SocketAddrV4,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to join multicast group {group}: {source}")]
    JoinGroup {
        group: SocketAddrV4,
        #[source]
        source: std::io::Error,
    },

    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("malformed frame: {reason}")]
    MalformedFrame { reason: &'static str },

    #[error("datagram too large: {size} bytes (max {max})")]
    DatagramTooLarge { size: usize, max: usize },

    #[error("invalid channel id ({len} bytes)")]
    InvalidChannelId { len: usize },

    #[error("invalid peer identity: {0}")]
    InvalidIdentity(String),

    #[error("no active channel key")]
    NoActiveChannel,

    #[error("transport is not running")]
    NotRunning,

    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_malformed() {
        let err = TransportError::MalformedFrame {
            reason: "truncated sender",
        };
        assert_eq!(err.to_string(), "malformed frame: truncated sender");
    }

    #[test]
    fn display_too_large() {
        let err = TransportError::DatagramTooLarge {
            size: 2000,
            max: 1400,
        };
        assert_eq!(err.to_string(), "datagram too large: 2000 bytes (max 1400)");
    }
}
