//! Mesh PTT protocol layer.
//!
//! Implements floor control (exclusive talk permission), centralized
//! arbitration with leader election, and channel discovery on top of
//! `wave-transport` (signed and encrypted multicast lanes).
//!
//! Control wire format: `[1B kind][MessagePack body]`.
//! Discovery wire format: signed JSON beacons.

pub mod action;
pub mod arbiter;
pub mod discovery;
pub mod error;
pub mod event;
pub mod floor;
pub mod message;
pub mod runtime;
pub mod types;

pub use action::{Action, Timer, TimerKind};
pub use arbiter::{
    identity_hash, outranks, rank, ArbiterConfig, ArbiterRole, ArbitrationState, ChannelArbiter,
    ElectionRank, FloorQueue, QueueFull, QueuedRequest,
};
pub use discovery::{
    Announcer, BeaconConfig, BeaconKind, BeaconMessage, ChannelMetadata, ChannelRepository,
    DiscoveredChannel, DiscoveryBeacon, DiscoveryEvent, DiscoveryTable, InMemoryChannelRepository,
    JoinedChannel, SuppressionSet, Upsert,
};
pub use error::ProtocolError;
pub use event::FloorEvent;
pub use floor::{FloorConfig, FloorMachine, FloorState};
pub use message::{
    ArbiterHeartbeat, ControlMessage, FloorDenial, FloorGrant, FloorTaken, MessageKind,
    QueuePosition, Revocation, QUEUE_FULL_REASON,
};
pub use runtime::{ControlLink, FloorHandle, FloorRuntime, RuntimeConfig};
pub use types::{
    unix_ms, ChannelId, FloorHolder, FloorRequest, HolderSummary, LamportClock, PeerIdentity,
    Priority, RequestId,
};
