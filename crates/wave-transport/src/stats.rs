//! Transport counters.
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::frame::Lane;

/// Monotonic counter. Relaxed ordering: these are statistics only.
#[derive(Default)]
struct Counter(AtomicU64);

impl Counter {
    fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Counter").field(&self.get()).finish()
    }
}

/// Why an inbound datagram was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Wrong channel key or corrupted ciphertext.
    Decrypt,
    /// Signature does not match the claimed sender.
    Signature,
    /// Too short or structurally invalid.
    Malformed,
    /// Our own packet looped back.
    SelfOriginated,
    /// Outbound datagram above the MTU guard.
    Oversize,
}

/// Live counters for one [`SecureTransport`](crate::SecureTransport).
#[derive(Debug, Default)]
pub struct TransportStats {
    audio_sent: Counter,
    control_sent: Counter,
    audio_received: Counter,
    control_received: Counter,
    dropped_decrypt: Counter,
    dropped_signature: Counter,
    dropped_malformed: Counter,
    dropped_self: Counter,
    dropped_oversize: Counter,
    send_errors: Counter,
}

impl TransportStats {
    pub fn record_sent(&self, lane: Lane) {
        match lane {
            Lane::Audio => self.audio_sent.inc(),
            Lane::Control => self.control_sent.inc(),
        }
    }

    pub fn record_received(&self, lane: Lane) {
        match lane {
            Lane::Audio => self.audio_received.inc(),
            Lane::Control => self.control_received.inc(),
        }
    }

    pub fn record_drop(&self, reason: DropReason) {
        match reason {
            DropReason::Decrypt => self.dropped_decrypt.inc(),
            DropReason::Signature => self.dropped_signature.inc(),
            DropReason::Malformed => self.dropped_malformed.inc(),
            DropReason::SelfOriginated => self.dropped_self.inc(),
            DropReason::Oversize => self.dropped_oversize.inc(),
        }
    }

    pub fn record_send_error(&self) {
        self.send_errors.inc();
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            audio_sent: self.audio_sent.get(),
            control_sent: self.control_sent.get(),
            audio_received: self.audio_received.get(),
            control_received: self.control_received.get(),
            dropped_decrypt: self.dropped_decrypt.get(),
            dropped_signature: self.dropped_signature.get(),
            dropped_malformed: self.dropped_malformed.get(),
            dropped_self: self.dropped_self.get(),
            dropped_oversize: self.dropped_oversize.get(),
            send_errors: self.send_errors.get(),
        }
    }
}

/// Point-in-time copy of [`TransportStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub audio_sent: u64,
    pub control_sent: u64,
    pub audio_received: u64,
    pub control_received: u64,
    pub dropped_decrypt: u64,
    pub dropped_signature: u64,
    pub dropped_malformed: u64,
    pub dropped_self: u64,
    pub dropped_oversize: u64,
    pub send_errors: u64,
}

impl StatsSnapshot {
    /// All inbound drops, whatever the reason.
    pub fn dropped_inbound(&self) -> u64 {
        self.dropped_decrypt + self.dropped_signature + self.dropped_malformed + self.dropped_self
    }
}
