//! Channel discovery beacon.
//!
//! Signed JSON announcements on a dedicated multicast group tell peers
//! which channels exist. Deletions are repeated and remembered in a
//! suppression set so late announces cannot bring a channel back.

pub mod beacon;
pub mod repository;
pub mod table;
pub mod types;

pub use beacon::DiscoveryBeacon;
pub use repository::{ChannelRepository, InMemoryChannelRepository, JoinedChannel};
pub use table::{DiscoveryTable, SuppressionSet, Upsert};
pub use types::{
    Announcer, BeaconConfig, BeaconKind, BeaconMessage, ChannelMetadata, DiscoveredChannel, DiscoveryEvent,
};
