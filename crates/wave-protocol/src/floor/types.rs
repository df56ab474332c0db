use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────

/// No answer to a request within this window → timed out (3 seconds).
pub const REQUEST_TIMEOUT_MS: u64 = 3_000;

/// Peer-mode requests seen within this window contend together (200 ms).
pub const COLLISION_WINDOW_MS: u64 = 200;

/// Requested hold duration (30 seconds).
pub const HOLD_DURATION_MS: u64 = 30_000;

/// Requested hold duration for emergency traffic (60 seconds).
pub const EMERGENCY_HOLD_DURATION_MS: u64 = 60_000;

/// Local floor state for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FloorState {
    /// Nobody holds the floor as far as we know.
    Idle,
    /// Our request is out, no answer yet (or queued).
    PendingRequest,
    /// We hold the floor.
    Granted,
    /// We released and wait for the arbiter to settle.
    Releasing,
    /// Someone else holds the floor.
    Taken,
}

impl FloorState {
    /// A new request is allowed from `Idle` and `Taken`.
    pub fn can_request(&self) -> bool {
        matches!(self, FloorState::Idle | FloorState::Taken)
    }
}

/// Floor timing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FloorConfig {
    pub request_timeout_ms: u64,
    pub collision_window_ms: u64,
    pub hold_duration_ms: u64,
    pub emergency_hold_duration_ms: u64,
}

impl Default for FloorConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: REQUEST_TIMEOUT_MS,
            collision_window_ms: COLLISION_WINDOW_MS,
            hold_duration_ms: HOLD_DURATION_MS,
            emergency_hold_duration_ms: EMERGENCY_HOLD_DURATION_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_request_only_when_idle_or_taken() {
        assert!(FloorState::Idle.can_request());
        assert!(FloorState::Taken.can_request());
        assert!(!FloorState::PendingRequest.can_request());
        assert!(!FloorState::Granted.can_request());
        assert!(!FloorState::Releasing.can_request());
    }

    #[test]
    fn config_defaults() {
        let config = FloorConfig::default();
        assert_eq!(config.request_timeout_ms, 3_000);
        assert_eq!(config.collision_window_ms, 200);
    }
}
