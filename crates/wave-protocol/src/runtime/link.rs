use tokio::sync::broadcast;
use wave_transport::{ChannelId, ControlPacket, PeerIdentity, SecureTransport};

/// What the floor runtime needs from the network.
///
/// In production: implemented by [`SecureTransport`] (control lane).
/// In tests: implemented by `MockLink` (records sends, injects packets).
#[async_trait::async_trait]
pub trait ControlLink: Send + Sync {
    /// Identity our packets are signed with.
    fn local_id(&self) -> PeerIdentity;

    /// Broadcast one control payload on `channel`. `false` on any failure.
    async fn send_control(&self, channel: &ChannelId, payload: &[u8]) -> bool;

    /// Authenticated control packets from peers (never our own).
    fn subscribe(&self) -> broadcast::Receiver<ControlPacket>;

    /// Install the key for `channel`, or clear it.
    async fn activate(&self, channel: Option<ChannelId>);
}

// ── Impl for SecureTransport (production) ───────────────────────────────

#[async_trait::async_trait]
impl ControlLink for SecureTransport {
    fn local_id(&self) -> PeerIdentity {
        self.id()
    }

    async fn send_control(&self, channel: &ChannelId, payload: &[u8]) -> bool {
        SecureTransport::send_control(self, channel, payload).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ControlPacket> {
        self.control_packets()
    }

    async fn activate(&self, channel: Option<ChannelId>) {
        self.set_active_channel(channel).await
    }
}

// ── MockLink (tests) ────────────────────────────────────────────────────
