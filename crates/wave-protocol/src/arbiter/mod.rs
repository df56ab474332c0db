//! Centralized floor arbitration for a channel.
//!
//! One elected primary per channel owns the authoritative queue, grants,
//! denies and preempts, and heartbeats its liveness. Participants watch the
//! heartbeat and run a deterministic election when it stops. Pure state
//! machines, no I/O.

pub mod channel;
pub mod election;
pub mod queue;

pub use channel::{ArbiterConfig, ArbiterRole, ArbitrationState, ChannelArbiter};
pub use election::{identity_hash, outranks, rank, ElectionRank};
pub use queue::{FloorQueue, QueueFull, QueuedRequest};
