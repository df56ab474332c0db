//! Discovery beacon wire types.
//!
//! One JSON object per datagram on the discovery group, camelCase fields:
//! `type`, `channelId` (base64), `sender` (hex), `senderName`, `timestamp`
//! (Unix ms), optional `signature` (base64 Ed25519 over the JSON of the
//! same message without the signature), plus channel metadata on announces.

use std::net::SocketAddr;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use wave_transport::{CryptoProvider, Identity};

use crate::error::ProtocolError;
use crate::types::{ChannelId, PeerIdentity, Priority};

// ── Constants ────────────────────────────────────────────────────────────

/// Periodic announce of joined channels (5 seconds).
pub const ANNOUNCE_INTERVAL_MS: u64 = 5_000;

/// Staleness sweep period (10 seconds).
pub const SWEEP_INTERVAL_MS: u64 = 10_000;

/// Discovered channels not refreshed within this window are evicted (30 seconds).
pub const STALE_TIMEOUT_MS: u64 = 30_000;

/// Delete notifications are repeated; the link does not guarantee delivery.
pub const DELETE_REPEAT_COUNT: u32 = 3;

/// Delay between repeated delete notifications (100 ms).
pub const DELETE_REPEAT_DELAY_MS: u64 = 100;

/// Maximum allowed clock drift into the future (5 minutes).
pub const MAX_FUTURE_DRIFT_MS: u64 = 5 * 60 * 1000;

/// Oldest acceptable message (1 hour).
pub const MAX_AGE_MS: u64 = 60 * 60 * 1000;

// ── ChannelMetadata ──────────────────────────────────────────────────────

/// What an announce says about a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub member_count: u32,
    pub creator_key: PeerIdentity,
}

// ── BeaconMessage ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BeaconKind {
    Announce(ChannelMetadata),
    Join,
    Delete,
}

impl BeaconKind {
    pub fn name(&self) -> &'static str {
        match self {
            BeaconKind::Announce(_) => "announce",
            BeaconKind::Join => "join",
            BeaconKind::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconMessage {
    #[serde(flatten)]
    pub kind: BeaconKind,
    pub channel_id: ChannelId,
    pub sender: PeerIdentity,
    pub sender_name: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl BeaconMessage {
    pub fn new(
        kind: BeaconKind,
        channel_id: ChannelId,
        sender: PeerIdentity,
        sender_name: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            kind,
            channel_id,
            sender,
            sender_name: sender_name.into(),
            timestamp,
            signature: None,
        }
    }

    /// The bytes the signature covers: this message's JSON without `signature`.
    pub fn signing_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let unsigned = BeaconMessage {
            signature: None,
            ..self.clone()
        };
        Ok(serde_json::to_vec(&unsigned)?)
    }

    /// Sign in place. `identity` must match `sender`.
    pub fn sign(&mut self, crypto: &dyn CryptoProvider, identity: &Identity) -> Result<(), ProtocolError> {
        let bytes = self.signing_bytes()?;
        let signature = crypto.sign(identity, &bytes);
        self.signature = Some(base64::engine::general_purpose::STANDARD.encode(signature));
        Ok(())
    }

    /// `Ok(true)` signed and valid, `Ok(false)` unsigned.
    pub fn verify(&self, crypto: &dyn CryptoProvider) -> Result<bool, ProtocolError> {
        let Some(signature) = &self.signature else {
            return Ok(false);
        };
        let signature = base64::engine::general_purpose::STANDARD
            .decode(signature)
            .map_err(|_| ProtocolError::InvalidSignature)?;
        let bytes = self.signing_bytes()?;
        crypto
            .verify(&self.sender, &bytes, &signature)
            .map_err(|_| ProtocolError::InvalidSignature)?;
        Ok(true)
    }

    /// Whether this message is within acceptable clock drift.
    pub fn is_timestamp_valid(&self, now: u64) -> bool {
        // Not too far in the future
        if self.timestamp > now.saturating_add(MAX_FUTURE_DRIFT_MS) {
            return false;
        }
        // Not absurdly old
        if now > self.timestamp && now - self.timestamp > MAX_AGE_MS {
            return false;
        }
        true
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

// ── DiscoveredChannel ────────────────────────────────────────────────────

/// Who announced a channel, and from where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcer {
    pub identity: PeerIdentity,
    pub name: String,
    pub address: SocketAddr,
}

/// A channel announced by a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredChannel {
    pub channel_id: ChannelId,
    pub metadata: ChannelMetadata,
    pub announcer: Announcer,
    /// Local monotonic ms of the last announce.
    pub last_seen: u64,
}

// ── DiscoveryEvent ───────────────────────────────────────────────────────

/// Events emitted by the discovery beacon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// First announce for a channel.
    ChannelDiscovered(DiscoveredChannel),

    /// Announce with changed metadata or announcer.
    ChannelUpdated(DiscoveredChannel),

    /// A peer deleted the channel. It is suppressed from now on.
    ChannelDeleted { channel_id: ChannelId, sender: PeerIdentity },

    /// No announce within the staleness window. Not suppressed.
    ChannelExpired { channel_id: ChannelId },

    /// A peer asked to join a channel we have joined.
    JoinRequested {
        channel_id: ChannelId,
        sender: PeerIdentity,
        sender_name: String,
    },
}

// ── BeaconConfig ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BeaconConfig {
    pub announce_interval_ms: u64,
    pub sweep_interval_ms: u64,
    pub stale_timeout_ms: u64,
    pub delete_repeat_count: u32,
    pub delete_repeat_delay_ms: u64,
    /// Accept messages without a signature.
    pub accept_unsigned: bool,
    /// Capacity of the event channel.
    pub event_buffer: usize,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self {
            announce_interval_ms: ANNOUNCE_INTERVAL_MS,
            sweep_interval_ms: SWEEP_INTERVAL_MS,
            stale_timeout_ms: STALE_TIMEOUT_MS,
            delete_repeat_count: DELETE_REPEAT_COUNT,
            delete_repeat_delay_ms: DELETE_REPEAT_DELAY_MS,
            accept_unsigned: false,
            event_buffer: 256,
        }
    }
}
