//! Mesh PTT transport layer.
//!
//! Two multicast lanes (audio, control) carrying signed-then-encrypted
//! datagrams between peers of a push-to-talk mesh.
//!
//! Frame: `[2B channel id len][channel id][32B sender][lane fields][payload]`.
//! Crypto: Ed25519 signatures + XChaCha20-Poly1305 with per-channel keys.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use wave_transport::{ChannelId, Identity, SecureTransport, TransportConfig};
//!
//! # async fn example() -> Result<(), wave_transport::TransportError> {
//! let transport = SecureTransport::new(Identity::generate(), TransportConfig::new());
//! transport.start().await?;
//!
//! let channel = ChannelId::random();
//! transport.set_active_channel(Some(channel.clone())).await;
//! let mut control = transport.control_packets();
//!
//! transport.send_control(&channel, &[8]).await;
//! if let Ok(packet) = control.recv().await {
//!     println!("control from {}: {:?}", packet.sender, packet.payload);
//! }
//!
//! transport.stop().await;
//! # Ok(())
//! # }
//! ```

mod config;
pub mod crypto;
mod error;
pub mod frame;
mod identity;
pub mod link;
pub mod memory;
mod node;
mod stats;

pub use config::{TransportConfig, DEFAULT_AUDIO_GROUP, DEFAULT_CONTROL_GROUP, DEFAULT_DISCOVERY_GROUP};
pub use crypto::{ChannelKey, CryptoProvider, MeshCrypto};
pub use error::TransportError;
pub use frame::{AudioPacket, ControlPacket, Frame, Lane};
pub use identity::Identity;
pub use link::{Datagram, LinkBinder, LinkOptions, UdpMulticastBinder};
pub use memory::MemoryHub;
pub use node::SecureTransport;
pub use stats::{DropReason, StatsSnapshot, TransportStats};

use std::fmt;
use std::str::FromStr;

use base64::Engine as _;

/// Participant identity, an Ed25519 public key (32 bytes).
///
/// Ordered lexicographically over the raw bytes, which is what floor
/// tie-breaks rely on. Displayed and parsed as hex.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerIdentity([u8; 32]);

impl PeerIdentity {
    /// Wrap raw public key bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw 32-byte public key.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Copy out of a slice; `None` if it is not exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(&self.0[..6]);
        write!(f, "PeerIdentity({hex}...)")
    }
}

impl FromStr for PeerIdentity {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| TransportError::InvalidIdentity(s.to_string()))?;
        Self::from_slice(&bytes).ok_or_else(|| TransportError::InvalidIdentity(s.to_string()))
    }
}

impl serde::Serialize for PeerIdentity {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> serde::Deserialize<'de> for PeerIdentity {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = deserializer.deserialize_any(BytesOrText::Hex)?;
        Self::from_slice(&bytes)
            .ok_or_else(|| serde::de::Error::invalid_length(bytes.len(), &"32 bytes"))
    }
}

/// Maximum channel id length (bounded by the 2-byte wire length prefix).
pub const MAX_CHANNEL_ID_LEN: usize = u16::MAX as usize;

/// Length of ids produced by [`ChannelId::random`].
pub const RANDOM_CHANNEL_ID_LEN: usize = 16;

/// Opaque channel identifier. Keys all per-channel state.
///
/// Displayed as standard base64, the encoding used by the discovery beacon.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(Vec<u8>);

impl ChannelId {
    /// Build from raw bytes. Fails on empty or oversize ids.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self, TransportError> {
        let bytes = bytes.into();
        if bytes.is_empty() || bytes.len() > MAX_CHANNEL_ID_LEN {
            return Err(TransportError::InvalidChannelId { len: bytes.len() });
        }
        Ok(Self(bytes))
    }

    /// Fresh random 16-byte id.
    pub fn random() -> Self {
        use chacha20poly1305::aead::rand_core::{OsRng, RngCore};
        let mut bytes = vec![0u8; RANDOM_CHANNEL_ID_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse the base64 form used on the discovery wire.
    pub fn from_base64(s: &str) -> Result<Self, TransportError> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(|_| TransportError::InvalidChannelId { len: s.len() })?;
        Self::from_bytes(bytes)
    }

    /// Base64 form.
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({})", self.to_base64())
    }
}

impl FromStr for ChannelId {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base64(s)
    }
}

impl serde::Serialize for ChannelId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_base64())
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

impl<'de> serde::Deserialize<'de> for ChannelId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = deserializer.deserialize_any(BytesOrText::Base64)?;
        Self::from_bytes(bytes).map_err(serde::de::Error::custom)
    }
}

/// Visitor accepting raw bytes, a byte sequence, or a text encoding.
enum BytesOrText {
    Hex,
    Base64,
}

impl<'de> serde::de::Visitor<'de> for BytesOrText {
    type Value = Vec<u8>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BytesOrText::Hex => f.write_str("bytes or a hex string"),
            BytesOrText::Base64 => f.write_str("bytes or a base64 string"),
        }
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
        match self {
            BytesOrText::Hex => hex::decode(v).map_err(E::custom),
            BytesOrText::Base64 => base64::engine::general_purpose::STANDARD
                .decode(v)
                .map_err(E::custom),
        }
    }

    fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        Ok(v.to_vec())
    }

    fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> Result<Self::Value, E> {
        Ok(v)
    }

    fn visit_seq<A: serde::de::SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut out = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(b) = seq.next_element::<u8>()? {
            out.push(b);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_hex_roundtrip() {
        let id = PeerIdentity::from_bytes([7u8; 32]);
        let parsed: PeerIdentity = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
        assert!(format!("{id:?}").starts_with("PeerIdentity(070707"));
    }

    #[test]
    fn identity_rejects_wrong_length() {
        assert!("abcd".parse::<PeerIdentity>().is_err());
        assert!("zz".parse::<PeerIdentity>().is_err());
    }

    #[test]
    fn identity_orders_bytewise() {
        let mut low = [0u8; 32];
        let mut high = [0u8; 32];
        low[31] = 1;
        high[0] = 1;
        assert!(PeerIdentity::from_bytes(low) < PeerIdentity::from_bytes(high));
    }

    #[test]
    fn identity_json_is_hex() {
        let id = PeerIdentity::from_bytes([0xAB; 32]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        let back: PeerIdentity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn channel_id_validation() {
        assert!(ChannelId::from_bytes(Vec::new()).is_err());
        assert!(ChannelId::from_bytes(vec![0u8; MAX_CHANNEL_ID_LEN + 1]).is_err());
        assert!(ChannelId::from_bytes(b"alpha".to_vec()).is_ok());
    }

    #[test]
    fn channel_id_base64_roundtrip() {
        let id = ChannelId::random();
        assert_eq!(id.len(), RANDOM_CHANNEL_ID_LEN);
        let parsed = ChannelId::from_base64(&id.to_base64()).unwrap();
        assert_eq!(parsed, id);
        assert_ne!(ChannelId::random(), id);
    }

    #[test]
    fn channel_id_json_is_base64() {
        let id = ChannelId::from_bytes(b"ops".to_vec()).unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"b3Bz\"");
        let back: ChannelId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
