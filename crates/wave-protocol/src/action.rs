//! Intentions returned by the pure floor and arbiter state machines.
//!
//! Every `handle_*` / `on_*` method returns `Vec<Action>`; the runtime
//! executor is the only place that turns them into I/O and timer tasks.
use crate::event::FloorEvent;
use crate::message::ControlMessage;
use crate::types::RequestId;

/// One-shot timer with the data needed when it fires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timer {
    /// No answer to a pending request (also bounds `Releasing`).
    RequestTimeout(RequestId),
    /// End of the peer-mode collision window.
    CollisionWindow,
    /// Our own grant runs out.
    HoldExpiry(RequestId),
    /// A remote holder's grant runs out.
    HolderExpiry(RequestId),
    /// Arbiter-side automatic release.
    AutoRelease(RequestId),
    /// Primary heartbeat; re-armed while still primary.
    Heartbeat,
    /// Primary liveness check; re-armed while the channel is joined.
    HealthMonitor,
    /// Candidate election window ends.
    ElectionEnd,
}

/// Timer slot. At most one task per `(channel, kind)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    RequestTimeout,
    CollisionWindow,
    HoldExpiry,
    HolderExpiry,
    AutoRelease,
    Heartbeat,
    HealthMonitor,
    ElectionEnd,
}

impl Timer {
    pub fn kind(&self) -> TimerKind {
        match self {
            Timer::RequestTimeout(_) => TimerKind::RequestTimeout,
            Timer::CollisionWindow => TimerKind::CollisionWindow,
            Timer::HoldExpiry(_) => TimerKind::HoldExpiry,
            Timer::HolderExpiry(_) => TimerKind::HolderExpiry,
            Timer::AutoRelease(_) => TimerKind::AutoRelease,
            Timer::Heartbeat => TimerKind::Heartbeat,
            Timer::HealthMonitor => TimerKind::HealthMonitor,
            Timer::ElectionEnd => TimerKind::ElectionEnd,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Send on the control lane of this channel.
    Broadcast(ControlMessage),
    /// Arm a timer, replacing any timer of the same kind.
    Schedule { timer: Timer, after_ms: u64 },
    /// Disarm a timer slot. No-op if empty.
    Cancel(TimerKind),
    /// Deliver an event to the application.
    Emit(FloorEvent),
}
