use crate::arbiter::ArbiterRole;
use crate::floor::FloorState;
use crate::types::{ChannelId, PeerIdentity, RequestId};

/// Floor and arbitration events delivered to the application.
///
/// Delivery is at-most-once and best-effort (`try_send`); a slow consumer
/// loses events rather than stalling the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FloorEvent {
    /// Local floor state changed.
    StateChanged {
        channel: ChannelId,
        state: FloorState,
    },
    /// We hold the floor.
    Granted {
        channel: ChannelId,
        request_id: RequestId,
        duration_ms: u64,
    },
    /// Our request was refused.
    Denied {
        channel: ChannelId,
        request_id: RequestId,
        reason: String,
    },
    /// Our request waits in the arbiter's queue.
    Queued {
        channel: ChannelId,
        request_id: RequestId,
        position: u32,
        total: u32,
    },
    /// We lost the floor before releasing it.
    Revoked {
        channel: ChannelId,
        request_id: RequestId,
        reason: String,
    },
    /// No answer to our request in time.
    RequestTimedOut {
        channel: ChannelId,
        request_id: RequestId,
    },
    /// Someone (possibly us) now holds the floor, or nobody does.
    HolderChanged {
        channel: ChannelId,
        holder: Option<PeerIdentity>,
    },
    /// Our arbitration role changed.
    RoleChanged {
        channel: ChannelId,
        role: ArbiterRole,
    },
    /// The known primary arbiter changed.
    PrimaryChanged {
        channel: ChannelId,
        primary: Option<PeerIdentity>,
    },
    /// The channel cannot serve our request any more.
    ChannelUnreachable { channel: ChannelId, reason: String },
}

impl FloorEvent {
    pub fn channel(&self) -> &ChannelId {
        match self {
            FloorEvent::StateChanged { channel, .. }
            | FloorEvent::Granted { channel, .. }
            | FloorEvent::Denied { channel, .. }
            | FloorEvent::Queued { channel, .. }
            | FloorEvent::Revoked { channel, .. }
            | FloorEvent::RequestTimedOut { channel, .. }
            | FloorEvent::HolderChanged { channel, .. }
            | FloorEvent::RoleChanged { channel, .. }
            | FloorEvent::PrimaryChanged { channel, .. }
            | FloorEvent::ChannelUnreachable { channel, .. } => channel,
        }
    }
}
