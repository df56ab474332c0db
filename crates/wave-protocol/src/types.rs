use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use wave_transport::{ChannelId, PeerIdentity};

// ── Priority ─────────────────────────────────────────────────────────────

/// Floor priority. `Emergency` always preempts.
///
/// Wire form is the ordinal (0..=3) in binary encodings and the lowercase
/// name in human-readable ones (beacon JSON, TOML config).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum Priority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Emergency = 3,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Emergency => "emergency",
        }
    }

    pub fn is_emergency(&self) -> bool {
        *self == Priority::Emergency
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "emergency" => Ok(Priority::Emergency),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

impl Serialize for Priority {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(self.as_str())
        } else {
            serializer.serialize_u8(u8::from(*self))
        }
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PriorityVisitor)
    }
}

struct PriorityVisitor;

impl<'de> serde::de::Visitor<'de> for PriorityVisitor {
    type Value = Priority;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a priority ordinal 0..=3 or name")
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Priority, E> {
        u8::try_from(v)
            .ok()
            .and_then(|b| Priority::try_from(b).ok())
            .ok_or_else(|| E::custom(format!("invalid priority ordinal {v}")))
    }

    fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Priority, E> {
        let v = u64::try_from(v).map_err(|_| E::custom(format!("invalid priority ordinal {v}")))?;
        self.visit_u64(v)
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Priority, E> {
        v.parse().map_err(E::custom)
    }
}

// ── LamportClock ─────────────────────────────────────────────────────────

/// Per-node logical clock used to break ties between equal-priority requests.
#[derive(Debug, Default)]
pub struct LamportClock(AtomicU64);

impl LamportClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value without advancing.
    pub fn current(&self) -> u64 {
        self.0.load(AtomicOrdering::SeqCst)
    }

    /// Advance for a local event; returns the new value.
    pub fn tick(&self) -> u64 {
        self.0.fetch_add(1, AtomicOrdering::SeqCst) + 1
    }

    /// Merge a received clock: `max(local, remote) + 1`. Returns the new value.
    pub fn observe(&self, remote: u64) -> u64 {
        let mut current = self.0.load(AtomicOrdering::SeqCst);
        loop {
            let next = current.max(remote).saturating_add(1);
            match self.0.compare_exchange_weak(
                current,
                next,
                AtomicOrdering::SeqCst,
                AtomicOrdering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

// ── RequestId ────────────────────────────────────────────────────────────

/// Unique id of one floor request (UUID v4).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0.simple().to_string();
        write!(f, "RequestId({}..)", &s[..8])
    }
}

// ── FloorRequest ─────────────────────────────────────────────────────────

/// A request for the floor.
///
/// Ordered so that the request that should win sorts first: higher
/// priority, then smaller clock, then smaller identity, then request id.
/// Every peer computing this order over the same set agrees on the minimum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloorRequest {
    pub request_id: RequestId,
    pub requester: PeerIdentity,
    pub priority: Priority,
    pub clock: u64,
    pub duration_ms: u64,
}

impl FloorRequest {
    pub fn new(requester: PeerIdentity, priority: Priority, clock: u64, duration_ms: u64) -> Self {
        Self {
            request_id: RequestId::new(),
            requester,
            priority,
            clock,
            duration_ms,
        }
    }

    /// Whether `self` orders ahead of `other`.
    pub fn wins_over(&self, other: &FloorRequest) -> bool {
        self < other
    }
}

impl Ord for FloorRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.clock.cmp(&other.clock))
            .then_with(|| self.requester.cmp(&other.requester))
            .then_with(|| self.request_id.cmp(&other.request_id))
            .then_with(|| self.duration_ms.cmp(&other.duration_ms))
    }
}

impl PartialOrd for FloorRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ── FloorHolder ──────────────────────────────────────────────────────────

/// Current holder of a channel's floor, in the local millisecond domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloorHolder {
    pub identity: PeerIdentity,
    pub request_id: RequestId,
    pub priority: Priority,
    pub granted_at: u64,
    pub expires_at: u64,
    pub is_emergency: bool,
}

impl FloorHolder {
    pub fn new(request: &FloorRequest, now: u64, duration_ms: u64) -> Self {
        Self {
            identity: request.requester,
            request_id: request.request_id,
            priority: request.priority,
            granted_at: now,
            expires_at: now.saturating_add(duration_ms),
            is_emergency: request.priority.is_emergency(),
        }
    }

    /// Time left, clamped at zero.
    pub fn remaining_ms(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.remaining_ms(now) == 0
    }

    /// Wire form: only the remaining duration travels.
    pub fn summary(&self, now: u64) -> HolderSummary {
        HolderSummary {
            identity: self.identity,
            request_id: self.request_id,
            priority: self.priority,
            remaining_ms: self.remaining_ms(now),
            emergency: self.is_emergency,
        }
    }

    /// Rebase a received summary onto the local clock.
    pub fn from_summary(summary: &HolderSummary, now: u64) -> Self {
        Self {
            identity: summary.identity,
            request_id: summary.request_id,
            priority: summary.priority,
            granted_at: now,
            expires_at: now.saturating_add(summary.remaining_ms),
            is_emergency: summary.emergency,
        }
    }
}

/// Holder as carried in arbiter heartbeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderSummary {
    pub identity: PeerIdentity,
    pub request_id: RequestId,
    pub priority: Priority,
    pub remaining_ms: u64,
    pub emergency: bool,
}

/// Current Unix time in milliseconds (wall clock, for beacon timestamps).
pub fn unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
