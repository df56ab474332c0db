//! Floor state machine for one channel.
//!
//! Pure: every method takes the current monotonic time in milliseconds and
//! returns the [`Action`]s to execute. The visible [`FloorState`] is derived
//! from the facts the machine tracks (our pending request, the holder, an
//! unsettled release) so it can never disagree with them.
//!
//! Two modes:
//! - **arbitrated**: a primary arbiter is known; requests go to it and its
//!   grants, denials and queue positions drive the machine.
//! - **peer**: no arbiter; every peer collects the requests seen during a
//!   short collision window and independently picks the same winner (the
//!   minimum under [`FloorRequest`]'s ordering).
use tracing::{debug, trace};

use crate::action::{Action, Timer, TimerKind};
use crate::error::ProtocolError;
use crate::event::FloorEvent;
use crate::message::{ControlMessage, FloorDenial, FloorGrant, FloorTaken, QueuePosition, Revocation};
use crate::types::{ChannelId, FloorHolder, FloorRequest, HolderSummary, PeerIdentity, Priority, RequestId};

use super::types::{FloorConfig, FloorState};

const EMERGENCY_PREEMPT_REASON: &str = "Preempted by emergency";
const COLLISION_LOST_REASON: &str = "Lost floor collision";
const ARBITER_IDLE_REASON: &str = "Arbiter reports idle floor";
const ARBITER_LOST_REASON: &str = "arbiter lost";

pub struct FloorMachine {
    channel: ChannelId,
    local: PeerIdentity,
    config: FloorConfig,
    state: FloorState,
    pending: Option<FloorRequest>,
    holder: Option<FloorHolder>,
    /// Our winning request while we hold a peer-mode floor.
    held_request: Option<FloorRequest>,
    /// Released, waiting for the arbiter to settle.
    releasing: Option<RequestId>,
    /// Peer-mode contenders with the time we saw them.
    observed: Vec<(FloorRequest, u64)>,
    collision_open: bool,
    arbitrated: bool,
}

impl FloorMachine {
    pub fn new(channel: ChannelId, local: PeerIdentity, config: FloorConfig) -> Self {
        Self {
            channel,
            local,
            config,
            state: FloorState::Idle,
            pending: None,
            holder: None,
            held_request: None,
            releasing: None,
            observed: Vec::new(),
            collision_open: false,
            arbitrated: false,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn state(&self) -> FloorState {
        self.state
    }

    pub fn holder(&self) -> Option<&FloorHolder> {
        self.holder.as_ref()
    }

    pub fn pending(&self) -> Option<&FloorRequest> {
        self.pending.as_ref()
    }

    pub fn is_arbitrated(&self) -> bool {
        self.arbitrated
    }

    pub fn can_request(&self) -> bool {
        self.state.can_request() && self.pending.is_none()
    }

    fn holds_floor(&self) -> bool {
        self.holder.as_ref().is_some_and(|h| h.identity == self.local)
    }

    fn hold_duration(&self, priority: Priority) -> u64 {
        if priority.is_emergency() {
            self.config.emergency_hold_duration_ms
        } else {
            self.config.hold_duration_ms
        }
    }

    // ── Local operations ─────────────────────────────────────────────────

    /// Ask for the floor. `clock` is the freshly ticked Lamport value.
    pub fn request(&mut self, priority: Priority, clock: u64, now: u64) -> Result<Vec<Action>, ProtocolError> {
        if !self.can_request() {
            return Err(ProtocolError::CannotRequest { state: self.state });
        }
        let request = FloorRequest::new(self.local, priority, clock, self.hold_duration(priority));
        debug!(channel = %self.channel, request = ?request.request_id, %priority, clock, "requesting floor");

        let mut actions = vec![
            Action::Broadcast(ControlMessage::FloorRequest(request.clone())),
            Action::Schedule {
                timer: Timer::RequestTimeout(request.request_id),
                after_ms: self.config.request_timeout_ms,
            },
        ];
        self.pending = Some(request.clone());
        if !self.arbitrated {
            self.contend(request, now, &mut actions);
        }
        self.sync(&mut actions);
        Ok(actions)
    }

    /// Give the floor back. Releasing while still pending cancels instead.
    pub fn release(&mut self, now: u64) -> Result<Vec<Action>, ProtocolError> {
        if !self.holds_floor() {
            if self.pending.is_some() {
                return self.cancel(now);
            }
            return Err(ProtocolError::NotHolder);
        }
        let mut actions = Vec::new();
        self.give_up(None, now, &mut actions);
        self.sync(&mut actions);
        Ok(actions)
    }

    /// Withdraw the pending request.
    pub fn cancel(&mut self, _now: u64) -> Result<Vec<Action>, ProtocolError> {
        let request = self.pending.take().ok_or(ProtocolError::NoPendingRequest)?;
        debug!(channel = %self.channel, request = ?request.request_id, "cancelling floor request");
        self.observed.retain(|(r, _)| r.request_id != request.request_id);
        let mut actions = vec![
            Action::Broadcast(ControlMessage::FloorCancel(request.request_id)),
            Action::Cancel(TimerKind::RequestTimeout),
        ];
        self.sync(&mut actions);
        Ok(actions)
    }

    /// Drop our hold, telling everyone. `reason` set → the loss was not our choice.
    fn give_up(&mut self, reason: Option<&str>, now: u64, actions: &mut Vec<Action>) {
        let Some(holder) = self.holder.take() else {
            return;
        };
        self.held_request = None;
        debug!(channel = %self.channel, request = ?holder.request_id, ?reason, "releasing floor");
        actions.push(Action::Cancel(TimerKind::HoldExpiry));
        actions.push(Action::Broadcast(ControlMessage::FloorRelease(holder.request_id)));
        if let Some(reason) = reason {
            actions.push(Action::Emit(FloorEvent::Revoked {
                channel: self.channel.clone(),
                request_id: holder.request_id,
                reason: reason.to_string(),
            }));
        }
        self.emit_holder(actions);

        if self.arbitrated {
            self.releasing = Some(holder.request_id);
            actions.push(Action::Schedule {
                timer: Timer::RequestTimeout(holder.request_id),
                after_ms: self.config.request_timeout_ms,
            });
        } else {
            self.reopen(now, actions);
        }
    }

    // ── Timers ───────────────────────────────────────────────────────────

    pub fn on_request_timeout(&mut self, request_id: RequestId, _now: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.releasing == Some(request_id) {
            // Arbiter never confirmed; settle locally.
            self.releasing = None;
        } else if self.pending.as_ref().is_some_and(|p| p.request_id == request_id) {
            debug!(channel = %self.channel, request = ?request_id, "floor request timed out");
            self.pending = None;
            self.observed.retain(|(r, _)| r.request_id != request_id);
            actions.push(Action::Emit(FloorEvent::RequestTimedOut {
                channel: self.channel.clone(),
                request_id,
            }));
        }
        self.sync(&mut actions);
        actions
    }

    /// Collision window closed: every peer picks the same winner.
    pub fn on_collision_window(&mut self, now: u64) -> Vec<Action> {
        self.collision_open = false;
        let mut actions = Vec::new();
        if self.holder.is_some() {
            return actions;
        }
        self.prune_observed(now);
        let Some(winner) = self.observed.iter().map(|(r, _)| r).min().cloned() else {
            return actions;
        };
        self.observed.retain(|(r, _)| r.request_id != winner.request_id);
        trace!(channel = %self.channel, winner = %winner.requester, clock = winner.clock, "collision window closed");

        if winner.requester == self.local {
            if self.pending.as_ref().map(|p| p.request_id) != Some(winner.request_id) {
                // Stale local request; nothing to take.
                return actions;
            }
            self.take_floor(winner, now, &mut actions);
        } else {
            self.adopt_remote(&winner, winner.duration_ms, now, &mut actions);
        }
        self.sync(&mut actions);
        actions
    }

    /// Our own hold ran out.
    pub fn on_hold_expiry(&mut self, request_id: RequestId, now: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        let ours = self
            .holder
            .as_ref()
            .is_some_and(|h| h.identity == self.local && h.request_id == request_id);
        if ours {
            debug!(channel = %self.channel, request = ?request_id, "hold duration elapsed");
            self.give_up(None, now, &mut actions);
            self.sync(&mut actions);
        }
        actions
    }

    /// A remote holder's grant ran out without a release.
    pub fn on_holder_expiry(&mut self, request_id: RequestId, now: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        let Some(holder) = self.holder.as_ref() else {
            return actions;
        };
        if holder.identity == self.local || holder.request_id != request_id {
            return actions;
        }
        if !holder.is_expired(now) {
            // Refreshed since the timer was armed.
            actions.push(Action::Schedule {
                timer: Timer::HolderExpiry(request_id),
                after_ms: holder.remaining_ms(now),
            });
            return actions;
        }
        debug!(channel = %self.channel, holder = %holder.identity, "remote hold expired");
        self.holder = None;
        self.emit_holder(&mut actions);
        if !self.arbitrated {
            self.reopen(now, &mut actions);
        }
        self.sync(&mut actions);
        actions
    }

    // ── Peer-mode messages ───────────────────────────────────────────────

    pub fn on_remote_request(&mut self, request: FloorRequest, now: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.arbitrated || request.requester == self.local {
            return actions;
        }
        let preempts = request.priority.is_emergency()
            && self.holds_floor()
            && self.holder.as_ref().is_some_and(|h| !h.is_emergency);
        if preempts {
            self.give_up(Some(EMERGENCY_PREEMPT_REASON), now, &mut actions);
        }
        self.contend(request, now, &mut actions);
        self.sync(&mut actions);
        actions
    }

    pub fn on_floor_taken(&mut self, taken: FloorTaken, now: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.arbitrated {
            return actions;
        }
        let request = taken.request;
        self.observed.retain(|(r, _)| r.request_id != request.request_id);
        if self.collision_open {
            self.collision_open = false;
            actions.push(Action::Cancel(TimerKind::CollisionWindow));
        }

        if let Some(holder) = self.holder.as_mut() {
            if holder.request_id == request.request_id {
                holder.expires_at = now.saturating_add(taken.remaining_ms);
                return actions;
            }
        }

        if self.holds_floor() {
            let ours = self.held_request.clone();
            match ours {
                Some(ours) if !request.wins_over(&ours) => {
                    // We still win; repeat our claim.
                    let remaining = self.holder.as_ref().map_or(0, |h| h.remaining_ms(now));
                    actions.push(Action::Broadcast(ControlMessage::FloorTaken(FloorTaken {
                        request: ours,
                        remaining_ms: remaining,
                    })));
                    return actions;
                }
                _ => {
                    debug!(channel = %self.channel, winner = %request.requester, "yielding floor after collision");
                    let held = self.holder.take();
                    self.held_request = None;
                    actions.push(Action::Cancel(TimerKind::HoldExpiry));
                    if let Some(held) = held {
                        actions.push(Action::Emit(FloorEvent::Revoked {
                            channel: self.channel.clone(),
                            request_id: held.request_id,
                            reason: COLLISION_LOST_REASON.to_string(),
                        }));
                    }
                }
            }
        }

        self.adopt_remote(&request, taken.remaining_ms, now, &mut actions);
        self.sync(&mut actions);
        actions
    }

    /// A holder released. In peer mode this starts the next round.
    pub fn on_release(&mut self, sender: &PeerIdentity, request_id: RequestId, now: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        self.observed.retain(|(r, _)| r.request_id != request_id);
        let matches = self
            .holder
            .as_ref()
            .is_some_and(|h| h.identity == *sender && h.request_id == request_id && h.identity != self.local);
        if matches {
            self.holder = None;
            actions.push(Action::Cancel(TimerKind::HolderExpiry));
            self.emit_holder(&mut actions);
            if !self.arbitrated {
                self.reopen(now, &mut actions);
            }
            self.sync(&mut actions);
        }
        actions
    }

    pub fn on_remote_cancel(&mut self, request_id: RequestId) -> Vec<Action> {
        self.observed.retain(|(r, _)| r.request_id != request_id);
        Vec::new()
    }

    fn contend(&mut self, request: FloorRequest, now: u64, actions: &mut Vec<Action>) {
        self.prune_observed(now);
        if !self.observed.iter().any(|(r, _)| r.request_id == request.request_id) {
            self.observed.push((request, now));
        }
        self.open_window(actions);
    }

    fn open_window(&mut self, actions: &mut Vec<Action>) {
        if self.holder.is_none() && !self.collision_open && !self.observed.is_empty() {
            self.collision_open = true;
            actions.push(Action::Schedule {
                timer: Timer::CollisionWindow,
                after_ms: self.config.collision_window_ms,
            });
        }
    }

    /// Floor became free in peer mode: re-announce our request and contend again.
    fn reopen(&mut self, now: u64, actions: &mut Vec<Action>) {
        self.prune_observed(now);
        if let Some(pending) = self.pending.clone() {
            actions.push(Action::Broadcast(ControlMessage::FloorRequest(pending.clone())));
            self.contend(pending, now, actions);
        } else {
            self.open_window(actions);
        }
    }

    fn prune_observed(&mut self, now: u64) {
        let horizon = self.config.request_timeout_ms;
        self.observed.retain(|(_, seen)| now.saturating_sub(*seen) < horizon);
    }

    fn take_floor(&mut self, request: FloorRequest, now: u64, actions: &mut Vec<Action>) {
        let duration = request.duration_ms;
        debug!(channel = %self.channel, request = ?request.request_id, "won floor collision");
        self.pending = None;
        self.holder = Some(FloorHolder::new(&request, now, duration));
        self.held_request = Some(request.clone());
        actions.push(Action::Cancel(TimerKind::RequestTimeout));
        actions.push(Action::Broadcast(ControlMessage::FloorTaken(FloorTaken {
            request: request.clone(),
            remaining_ms: duration,
        })));
        actions.push(Action::Schedule {
            timer: Timer::HoldExpiry(request.request_id),
            after_ms: duration,
        });
        actions.push(Action::Emit(FloorEvent::Granted {
            channel: self.channel.clone(),
            request_id: request.request_id,
            duration_ms: duration,
        }));
        self.emit_holder(actions);
    }

    fn adopt_remote(&mut self, request: &FloorRequest, remaining_ms: u64, now: u64, actions: &mut Vec<Action>) {
        self.holder = Some(FloorHolder::new(request, now, remaining_ms));
        actions.push(Action::Schedule {
            timer: Timer::HolderExpiry(request.request_id),
            after_ms: remaining_ms,
        });
        self.emit_holder(actions);
    }

    // ── Arbiter messages ─────────────────────────────────────────────────

    pub fn on_grant(&mut self, grant: &FloorGrant, now: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        if grant.holder == self.local {
            let ours = self.pending.as_ref().is_some_and(|p| p.request_id == grant.request_id);
            if !ours {
                trace!(channel = %self.channel, request = ?grant.request_id, "ignoring grant for unknown request");
                return actions;
            }
            let request = self.pending.take();
            self.releasing = None;
            self.holder = Some(FloorHolder {
                identity: self.local,
                request_id: grant.request_id,
                priority: grant.priority,
                granted_at: now,
                expires_at: now.saturating_add(grant.duration_ms),
                is_emergency: grant.emergency,
            });
            self.held_request = request;
            debug!(channel = %self.channel, request = ?grant.request_id, "floor granted");
            actions.push(Action::Cancel(TimerKind::RequestTimeout));
            actions.push(Action::Schedule {
                timer: Timer::HoldExpiry(grant.request_id),
                after_ms: grant.duration_ms,
            });
            actions.push(Action::Emit(FloorEvent::Granted {
                channel: self.channel.clone(),
                request_id: grant.request_id,
                duration_ms: grant.duration_ms,
            }));
        } else {
            if self.holder.as_ref().is_some_and(|h| h.request_id == grant.request_id) {
                return actions;
            }
            if let Some(held) = self.holder.take().filter(|h| h.identity == self.local) {
                // Superseded without an explicit revocation.
                self.held_request = None;
                actions.push(Action::Cancel(TimerKind::HoldExpiry));
                actions.push(Action::Emit(FloorEvent::Revoked {
                    channel: self.channel.clone(),
                    request_id: held.request_id,
                    reason: "Floor granted to another participant".to_string(),
                }));
            }
            if self.releasing.take().is_some() {
                actions.push(Action::Cancel(TimerKind::RequestTimeout));
            }
            self.holder = Some(FloorHolder {
                identity: grant.holder,
                request_id: grant.request_id,
                priority: grant.priority,
                granted_at: now,
                expires_at: now.saturating_add(grant.duration_ms),
                is_emergency: grant.emergency,
            });
            actions.push(Action::Schedule {
                timer: Timer::HolderExpiry(grant.request_id),
                after_ms: grant.duration_ms,
            });
        }
        self.emit_holder(&mut actions);
        self.sync(&mut actions);
        actions
    }

    pub fn on_denied(&mut self, denial: &FloorDenial) -> Vec<Action> {
        let mut actions = Vec::new();
        if denial.requester != self.local
            || self.pending.as_ref().map(|p| p.request_id) != Some(denial.request_id)
        {
            return actions;
        }
        debug!(channel = %self.channel, reason = %denial.reason, "floor request denied");
        self.pending = None;
        actions.push(Action::Cancel(TimerKind::RequestTimeout));
        actions.push(Action::Emit(FloorEvent::Denied {
            channel: self.channel.clone(),
            request_id: denial.request_id,
            reason: denial.reason.clone(),
        }));
        self.sync(&mut actions);
        actions
    }

    pub fn on_queued(&mut self, position: &QueuePosition) -> Vec<Action> {
        let mut actions = Vec::new();
        if position.requester != self.local
            || self.pending.as_ref().map(|p| p.request_id) != Some(position.request_id)
        {
            return actions;
        }
        // Queued requests wait for the grant, however long that takes.
        actions.push(Action::Cancel(TimerKind::RequestTimeout));
        actions.push(Action::Emit(FloorEvent::Queued {
            channel: self.channel.clone(),
            request_id: position.request_id,
            position: position.position,
            total: position.total,
        }));
        actions
    }

    pub fn on_revoked(&mut self, revocation: &Revocation) -> Vec<Action> {
        let mut actions = Vec::new();
        let matches = self
            .holder
            .as_ref()
            .is_some_and(|h| h.request_id == revocation.request_id && h.identity == revocation.holder);
        if !matches {
            return actions;
        }
        self.holder = None;
        if revocation.holder == self.local {
            self.held_request = None;
            debug!(channel = %self.channel, reason = %revocation.reason, "floor revoked");
            actions.push(Action::Cancel(TimerKind::HoldExpiry));
            actions.push(Action::Emit(FloorEvent::Revoked {
                channel: self.channel.clone(),
                request_id: revocation.request_id,
                reason: revocation.reason.clone(),
            }));
        } else {
            actions.push(Action::Cancel(TimerKind::HolderExpiry));
        }
        self.emit_holder(&mut actions);
        self.sync(&mut actions);
        actions
    }

    pub fn on_idle(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.releasing.take().is_some() {
            actions.push(Action::Cancel(TimerKind::RequestTimeout));
        }
        if let Some(holder) = self.holder.take() {
            if holder.identity == self.local {
                self.held_request = None;
                actions.push(Action::Cancel(TimerKind::HoldExpiry));
                actions.push(Action::Emit(FloorEvent::Revoked {
                    channel: self.channel.clone(),
                    request_id: holder.request_id,
                    reason: ARBITER_IDLE_REASON.to_string(),
                }));
            } else {
                actions.push(Action::Cancel(TimerKind::HolderExpiry));
            }
            self.emit_holder(&mut actions);
        }
        self.sync(&mut actions);
        actions
    }

    /// Holder as reported by the primary's heartbeat. Our own hold is
    /// tracked locally and never overwritten from here.
    pub fn sync_holder(&mut self, summary: Option<&HolderSummary>, now: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.holds_floor() {
            return actions;
        }
        let known = self.holder.as_ref().map(|h| h.request_id);
        match summary {
            Some(s) if known == Some(s.request_id) => {
                if let Some(h) = self.holder.as_mut() {
                    h.expires_at = now.saturating_add(s.remaining_ms);
                }
                return actions;
            }
            Some(s) if s.identity != self.local => {
                self.holder = Some(FloorHolder::from_summary(s, now));
                actions.push(Action::Schedule {
                    timer: Timer::HolderExpiry(s.request_id),
                    after_ms: s.remaining_ms,
                });
                self.emit_holder(&mut actions);
            }
            None if known.is_some() => {
                self.holder = None;
                actions.push(Action::Cancel(TimerKind::HolderExpiry));
                self.emit_holder(&mut actions);
            }
            _ => return actions,
        }
        self.sync(&mut actions);
        actions
    }

    // ── Mode ─────────────────────────────────────────────────────────────

    /// Switch between arbitrated and peer mode as the known primary comes and goes.
    pub fn set_arbitrated(&mut self, arbitrated: bool, _now: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.arbitrated == arbitrated {
            return actions;
        }
        self.arbitrated = arbitrated;
        debug!(channel = %self.channel, arbitrated, "floor mode changed");

        if arbitrated {
            self.observed.clear();
            if self.collision_open {
                self.collision_open = false;
                actions.push(Action::Cancel(TimerKind::CollisionWindow));
            }
            if let Some(pending) = &self.pending {
                // The new arbiter may not have seen it.
                actions.push(Action::Broadcast(ControlMessage::FloorRequest(pending.clone())));
            }
        } else {
            if self.releasing.take().is_some() {
                actions.push(Action::Cancel(TimerKind::RequestTimeout));
            }
            if let Some(pending) = self.pending.take() {
                actions.push(Action::Cancel(TimerKind::RequestTimeout));
                actions.push(Action::Emit(FloorEvent::ChannelUnreachable {
                    channel: self.channel.clone(),
                    reason: ARBITER_LOST_REASON.to_string(),
                }));
                trace!(channel = %self.channel, request = ?pending.request_id, "pending request dropped with arbiter");
            }
        }
        self.sync(&mut actions);
        actions
    }

    // ── Derived state ────────────────────────────────────────────────────

    fn derive_state(&self) -> FloorState {
        if self.holds_floor() {
            FloorState::Granted
        } else if self.releasing.is_some() {
            FloorState::Releasing
        } else if self.pending.is_some() {
            FloorState::PendingRequest
        } else if self.holder.is_some() {
            FloorState::Taken
        } else {
            FloorState::Idle
        }
    }

    fn sync(&mut self, actions: &mut Vec<Action>) {
        let next = self.derive_state();
        if next != self.state {
            trace!(channel = %self.channel, from = ?self.state, to = ?next, "floor state");
            self.state = next;
            actions.push(Action::Emit(FloorEvent::StateChanged {
                channel: self.channel.clone(),
                state: next,
            }));
        }
    }

    fn emit_holder(&self, actions: &mut Vec<Action>) {
        actions.push(Action::Emit(FloorEvent::HolderChanged {
            channel: self.channel.clone(),
            holder: self.holder.as_ref().map(|h| h.identity),
        }));
    }
}
