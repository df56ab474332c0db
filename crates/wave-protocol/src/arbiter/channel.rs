//! Per-channel arbiter: role, known primary, and (while primary) the
//! authoritative holder and queue.
//!
//! Driven entirely by method calls carrying the current monotonic time;
//! returns [`Action`]s for the runtime to execute.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::action::{Action, Timer, TimerKind};
use crate::event::FloorEvent;
use crate::message::{
    ArbiterHeartbeat, ControlMessage, FloorDenial, FloorGrant, QueuePosition, Revocation, QUEUE_FULL_REASON,
};
use crate::types::{ChannelId, FloorHolder, FloorRequest, HolderSummary, PeerIdentity, Priority, RequestId};

use super::election::{outranks, rank};
use super::queue::{FloorQueue, MAX_QUEUE_DEPTH};

// ── Constants ────────────────────────────────────────────────────────────

/// Grant duration (30 seconds).
pub const GRANT_DURATION_MS: u64 = 30_000;

/// Emergency grant duration (60 seconds).
pub const EMERGENCY_GRANT_DURATION_MS: u64 = 60_000;

/// Heartbeat and health-check interval (2 seconds).
pub const HEARTBEAT_INTERVAL_MS: u64 = 2_000;

/// Silence after which the primary is considered lost (6 seconds).
pub const HEARTBEAT_TIMEOUT_MS: u64 = 6_000;

/// How long a candidate waits for better-ranked rivals (1.5 seconds).
pub const ELECTION_WINDOW_MS: u64 = 1_500;

/// A peer heard within this window counts as live for elections (60 seconds).
pub const PEER_LIVENESS_MS: u64 = 60_000;

/// Remembered request ids for duplicate suppression.
const SEEN_REQUESTS_CAP: usize = 64;

const EMERGENCY_PREEMPT_REASON: &str = "Preempted by emergency";
const PRIORITY_PREEMPT_REASON: &str = "Preempted by higher priority";
const GRANT_EXPIRED_REASON: &str = "Grant expired";

// ── Types ────────────────────────────────────────────────────────────────

/// Arbitration role of this node on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ArbiterRole {
    #[default]
    Participant,
    Candidate,
    Primary,
    /// Designated successor named in the primary's heartbeat.
    Backup,
}

/// Snapshot of a channel's arbitration view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArbitrationState {
    pub role: ArbiterRole,
    pub primary: Option<PeerIdentity>,
    pub holder: Option<PeerIdentity>,
    pub queue_size: usize,
    /// Local monotonic ms of the last heartbeat heard (or sent, as primary).
    pub last_heartbeat: Option<u64>,
    pub healthy: bool,
}

/// Arbiter timing and limits.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArbiterConfig {
    /// Our election priority.
    pub priority: Priority,
    pub grant_duration_ms: u64,
    pub emergency_grant_duration_ms: u64,
    pub max_queue_depth: usize,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub election_window_ms: u64,
    pub peer_liveness_ms: u64,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            grant_duration_ms: GRANT_DURATION_MS,
            emergency_grant_duration_ms: EMERGENCY_GRANT_DURATION_MS,
            max_queue_depth: MAX_QUEUE_DEPTH,
            heartbeat_interval_ms: HEARTBEAT_INTERVAL_MS,
            heartbeat_timeout_ms: HEARTBEAT_TIMEOUT_MS,
            election_window_ms: ELECTION_WINDOW_MS,
            peer_liveness_ms: PEER_LIVENESS_MS,
        }
    }
}

/// A peer heard on this channel.
#[derive(Debug, Clone, Copy)]
struct PeerSighting {
    priority: Option<Priority>,
    last_seen: u64,
}

// ── ChannelArbiter ───────────────────────────────────────────────────────

pub struct ChannelArbiter {
    channel: ChannelId,
    local: PeerIdentity,
    config: ArbiterConfig,
    role: ArbiterRole,
    primary: Option<(PeerIdentity, Priority)>,
    last_heartbeat: Option<u64>,
    healthy: bool,
    /// Successor: chosen by us as primary, or as announced by the primary.
    backup: Option<PeerIdentity>,
    holder: Option<FloorHolder>,
    queue: FloorQueue,
    seen: VecDeque<RequestId>,
    peers: HashMap<PeerIdentity, PeerSighting>,
}

impl ChannelArbiter {
    pub fn new(channel: ChannelId, local: PeerIdentity, config: ArbiterConfig) -> Self {
        let queue = FloorQueue::new(config.max_queue_depth);
        Self {
            channel,
            local,
            config,
            role: ArbiterRole::Participant,
            primary: None,
            last_heartbeat: None,
            healthy: true,
            backup: None,
            holder: None,
            queue,
            seen: VecDeque::with_capacity(SEEN_REQUESTS_CAP),
            peers: HashMap::new(),
        }
    }

    pub fn role(&self) -> ArbiterRole {
        self.role
    }

    pub fn is_primary(&self) -> bool {
        self.role == ArbiterRole::Primary
    }

    pub fn primary(&self) -> Option<PeerIdentity> {
        self.primary.map(|(id, _)| id)
    }

    pub fn backup(&self) -> Option<PeerIdentity> {
        self.backup
    }

    /// Authoritative holder (primary only).
    pub fn holder(&self) -> Option<&FloorHolder> {
        self.holder.as_ref()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn state(&self, now: u64) -> ArbitrationState {
        let holder = match self.role {
            ArbiterRole::Primary => self.holder.as_ref().map(|h| h.identity),
            _ => None,
        };
        // Overdue heartbeats show as unhealthy before the monitor fires.
        let overdue = !self.is_primary()
            && self.primary.is_some()
            && now.saturating_sub(self.last_heartbeat.unwrap_or(0)) >= self.config.heartbeat_timeout_ms;
        ArbitrationState {
            role: self.role,
            primary: self.primary(),
            holder,
            queue_size: self.queue.len(),
            last_heartbeat: self.last_heartbeat,
            healthy: self.healthy && !overdue,
        }
    }

    // ── Liveness ─────────────────────────────────────────────────────────

    /// Record traffic from `sender`. `priority` when the message carries it.
    pub fn observe_peer(&mut self, sender: PeerIdentity, priority: Option<Priority>, now: u64) {
        if sender == self.local {
            return;
        }
        let entry = self.peers.entry(sender).or_insert(PeerSighting {
            priority,
            last_seen: now,
        });
        entry.last_seen = now;
        if priority.is_some() {
            entry.priority = priority;
        }
    }

    /// Self plus every identity heard within the liveness window.
    pub fn live_participants(&self, now: u64) -> usize {
        let window = self.config.peer_liveness_ms;
        1 + self
            .peers
            .values()
            .filter(|p| now.saturating_sub(p.last_seen) < window)
            .count()
    }

    fn pick_backup(&self, now: u64) -> Option<PeerIdentity> {
        let window = self.config.peer_liveness_ms;
        self.peers
            .iter()
            .filter(|(_, p)| now.saturating_sub(p.last_seen) < window)
            .min_by_key(|(id, p)| rank(p.priority.unwrap_or_default(), id))
            .map(|(id, _)| *id)
    }

    // ── Role transitions ─────────────────────────────────────────────────

    /// Take the primary role for this channel.
    pub fn become_arbiter(&mut self, now: u64) -> Vec<Action> {
        if self.is_primary() {
            return Vec::new();
        }
        info!(channel = %self.channel, priority = %self.config.priority, "becoming primary arbiter");
        let mut actions = vec![
            Action::Cancel(TimerKind::ElectionEnd),
            Action::Broadcast(ControlMessage::ArbiterAnnounce(self.config.priority)),
            Action::Schedule {
                timer: Timer::Heartbeat,
                after_ms: 0,
            },
        ];
        self.set_role(ArbiterRole::Primary, &mut actions);
        self.set_primary(Some((self.local, self.config.priority)), &mut actions);
        self.last_heartbeat = Some(now);
        self.healthy = true;
        actions
    }

    /// Give up the primary role. The channel falls back to peer mode.
    pub fn resign(&mut self, _now: u64) -> Vec<Action> {
        if !self.is_primary() {
            return Vec::new();
        }
        info!(channel = %self.channel, "resigning primary arbiter");
        let mut actions = vec![Action::Broadcast(ControlMessage::ArbiterResign)];
        self.step_down(&mut actions);
        self.set_primary(None, &mut actions);
        actions
    }

    /// Drop primary duties and state.
    fn step_down(&mut self, actions: &mut Vec<Action>) {
        actions.push(Action::Cancel(TimerKind::Heartbeat));
        actions.push(Action::Cancel(TimerKind::AutoRelease));
        self.queue.clear();
        self.holder = None;
        self.backup = None;
        self.seen.clear();
        self.set_role(ArbiterRole::Participant, actions);
    }

    pub fn on_heartbeat_timer(&mut self, now: u64) -> Vec<Action> {
        if !self.is_primary() {
            return Vec::new();
        }
        self.backup = self.pick_backup(now);
        self.last_heartbeat = Some(now);
        let heartbeat = ArbiterHeartbeat {
            priority: self.config.priority,
            holder: self.holder.as_ref().map(|h| h.summary(now)),
            queue_size: self.queue.len() as u32,
            backup: self.backup,
        };
        trace!(channel = %self.channel, backup = ?self.backup, "heartbeat");
        vec![
            Action::Broadcast(ControlMessage::ArbiterHeartbeat(heartbeat)),
            Action::Schedule {
                timer: Timer::Heartbeat,
                after_ms: self.config.heartbeat_interval_ms,
            },
        ]
    }

    /// Periodic primary liveness check. Always re-arms.
    pub fn on_health_timer(&mut self, now: u64) -> Vec<Action> {
        let mut actions = vec![Action::Schedule {
            timer: Timer::HealthMonitor,
            after_ms: self.config.heartbeat_interval_ms,
        }];
        if matches!(self.role, ArbiterRole::Primary | ArbiterRole::Candidate) {
            return actions;
        }
        let Some((lost, _)) = self.primary else {
            return actions;
        };
        let silent_for = now.saturating_sub(self.last_heartbeat.unwrap_or(0));
        if silent_for < self.config.heartbeat_timeout_ms {
            return actions;
        }

        warn!(channel = %self.channel, primary = %lost, silent_for, "primary arbiter lost");
        self.healthy = false;
        self.set_primary(None, &mut actions);

        let live = self.live_participants(now);
        if live >= 2 {
            let window = if self.role == ArbiterRole::Backup {
                self.config.election_window_ms / 2
            } else {
                self.config.election_window_ms
            };
            self.campaign(window, &mut actions);
        } else {
            debug!(channel = %self.channel, live, "too few participants to elect");
            self.set_role(ArbiterRole::Participant, &mut actions);
        }
        actions
    }

    /// Run for primary on demand. Only when no primary is known.
    pub fn start_election(&mut self, _now: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        if self.primary.is_some() || matches!(self.role, ArbiterRole::Candidate | ArbiterRole::Primary) {
            return actions;
        }
        self.campaign(self.config.election_window_ms, &mut actions);
        actions
    }

    fn campaign(&mut self, window_ms: u64, actions: &mut Vec<Action>) {
        info!(channel = %self.channel, priority = %self.config.priority, window_ms, "starting election");
        actions.push(Action::Broadcast(ControlMessage::Election(self.config.priority)));
        actions.push(Action::Schedule {
            timer: Timer::ElectionEnd,
            after_ms: window_ms,
        });
        self.set_role(ArbiterRole::Candidate, actions);
    }

    pub fn on_election(&mut self, sender: PeerIdentity, priority: Priority, now: u64) -> Vec<Action> {
        self.observe_peer(sender, Some(priority), now);
        let mut actions = Vec::new();
        if sender == self.local {
            return actions;
        }
        let they_win = outranks((priority, &sender), (self.config.priority, &self.local));
        match self.role {
            ArbiterRole::Candidate if they_win => {
                debug!(channel = %self.channel, rival = %sender, "yielding election");
                actions.push(Action::Cancel(TimerKind::ElectionEnd));
                self.set_role(ArbiterRole::Participant, &mut actions);
            }
            ArbiterRole::Candidate => {
                actions.push(Action::Broadcast(ControlMessage::Election(self.config.priority)));
            }
            ArbiterRole::Primary => {
                actions.push(Action::Broadcast(ControlMessage::ArbiterAnnounce(self.config.priority)));
            }
            ArbiterRole::Participant | ArbiterRole::Backup => {
                // A better candidate than the one running should stand too.
                if self.primary.is_none() && !they_win {
                    self.campaign(self.config.election_window_ms, &mut actions);
                }
            }
        }
        actions
    }

    pub fn on_election_end(&mut self, now: u64) -> Vec<Action> {
        if self.role != ArbiterRole::Candidate {
            return Vec::new();
        }
        info!(channel = %self.channel, "election won");
        self.become_arbiter(now)
    }

    pub fn on_announce(&mut self, sender: PeerIdentity, priority: Priority, now: u64) -> Vec<Action> {
        self.on_primary_seen(sender, priority, None, now)
    }

    pub fn on_heartbeat(&mut self, sender: PeerIdentity, heartbeat: &ArbiterHeartbeat, now: u64) -> Vec<Action> {
        self.on_primary_seen(sender, heartbeat.priority, Some(heartbeat.backup), now)
    }

    /// `backup` is `Some` for heartbeats (which always name the successor, possibly none).
    fn on_primary_seen(
        &mut self,
        sender: PeerIdentity,
        priority: Priority,
        backup: Option<Option<PeerIdentity>>,
        now: u64,
    ) -> Vec<Action> {
        self.observe_peer(sender, Some(priority), now);
        let mut actions = Vec::new();
        if sender == self.local {
            return actions;
        }
        let they_win = outranks((priority, &sender), (self.config.priority, &self.local));
        match self.role {
            ArbiterRole::Primary if they_win => {
                warn!(channel = %self.channel, rival = %sender, "second primary outranks us; resigning");
                actions.push(Action::Broadcast(ControlMessage::ArbiterResign));
                self.step_down(&mut actions);
            }
            ArbiterRole::Primary => {
                actions.push(Action::Broadcast(ControlMessage::ArbiterAnnounce(self.config.priority)));
                return actions;
            }
            ArbiterRole::Candidate => {
                let designated = self.backup == Some(sender);
                if !(they_win || designated) {
                    return actions;
                }
                debug!(channel = %self.channel, primary = %sender, "candidate yielding to primary");
                actions.push(Action::Cancel(TimerKind::ElectionEnd));
                self.set_role(ArbiterRole::Participant, &mut actions);
            }
            ArbiterRole::Participant | ArbiterRole::Backup => {}
        }

        self.set_primary(Some((sender, priority)), &mut actions);
        self.last_heartbeat = Some(now);
        self.healthy = true;
        if let Some(backup) = backup {
            self.backup = backup;
            let role = if backup == Some(self.local) {
                ArbiterRole::Backup
            } else {
                ArbiterRole::Participant
            };
            self.set_role(role, &mut actions);
        }
        actions
    }

    /// The primary stepped down voluntarily: no election, peer mode.
    pub fn on_resign(&mut self, sender: PeerIdentity, now: u64) -> Vec<Action> {
        self.observe_peer(sender, None, now);
        let mut actions = Vec::new();
        if self.primary() != Some(sender) {
            return actions;
        }
        debug!(channel = %self.channel, primary = %sender, "primary resigned");
        self.backup = None;
        self.healthy = true;
        self.set_primary(None, &mut actions);
        if self.role == ArbiterRole::Backup {
            self.set_role(ArbiterRole::Participant, &mut actions);
        }
        actions
    }

    // ── Floor (primary only) ─────────────────────────────────────────────

    pub fn handle_floor_request(&mut self, request: FloorRequest, now: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.is_primary() {
            return actions;
        }
        if self.is_duplicate(&request.request_id) {
            trace!(channel = %self.channel, request = ?request.request_id, "duplicate floor request");
            return actions;
        }
        self.remember(request.request_id);

        let Some(holder) = self.holder.clone() else {
            self.grant(request, now, &mut actions);
            return actions;
        };

        if request.priority.is_emergency() {
            if holder.is_emergency {
                // Emergency behind emergency waits past the depth limit.
                let (request_id, requester) = (request.request_id, request.requester);
                match self.queue.push(request, now, true) {
                    Ok(_) => self.broadcast_positions(&mut actions),
                    Err(_) => {
                        warn!(
                            channel = %self.channel,
                            %requester,
                            limit = self.queue.hard_limit(),
                            "emergency queue full"
                        );
                        actions.push(Action::Broadcast(ControlMessage::FloorDenied(FloorDenial {
                            request_id,
                            requester,
                            reason: QUEUE_FULL_REASON.to_string(),
                        })));
                    }
                }
            } else {
                self.revoke(&holder, EMERGENCY_PREEMPT_REASON, &mut actions);
                self.grant(request, now, &mut actions);
            }
            return actions;
        }

        if request.priority > holder.priority {
            self.revoke(&holder, PRIORITY_PREEMPT_REASON, &mut actions);
            self.grant(request, now, &mut actions);
            return actions;
        }

        let (request_id, requester) = (request.request_id, request.requester);
        match self.queue.push(request, now, false) {
            Ok(position) => {
                debug!(channel = %self.channel, %requester, position, "floor request queued");
                self.broadcast_positions(&mut actions);
            }
            Err(_) => {
                debug!(channel = %self.channel, %requester, "floor queue full");
                actions.push(Action::Broadcast(ControlMessage::FloorDenied(FloorDenial {
                    request_id,
                    requester,
                    reason: QUEUE_FULL_REASON.to_string(),
                })));
            }
        }
        actions
    }

    /// Explicit release from the holder. Releases from anyone else are ignored.
    pub fn handle_release(&mut self, sender: PeerIdentity, request_id: RequestId, now: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.is_primary() {
            return actions;
        }
        let is_holder = self
            .holder
            .as_ref()
            .is_some_and(|h| h.identity == sender && h.request_id == request_id);
        if !is_holder {
            // A queued requester giving up counts as a cancel.
            if self.queue.remove(&request_id, &sender).is_some() {
                self.broadcast_positions(&mut actions);
            } else {
                debug!(channel = %self.channel, %sender, "release from non-holder ignored");
            }
            return actions;
        }
        self.holder = None;
        actions.push(Action::Cancel(TimerKind::AutoRelease));
        self.advance(now, &mut actions);
        actions
    }

    pub fn on_auto_release(&mut self, request_id: RequestId, now: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.is_primary() {
            return actions;
        }
        let Some(holder) = self.holder.clone().filter(|h| h.request_id == request_id) else {
            return actions;
        };
        debug!(channel = %self.channel, holder = %holder.identity, "grant expired");
        self.revoke(&holder, GRANT_EXPIRED_REASON, &mut actions);
        self.advance(now, &mut actions);
        actions
    }

    pub fn handle_cancel(&mut self, sender: PeerIdentity, request_id: RequestId, now: u64) -> Vec<Action> {
        let mut actions = Vec::new();
        if !self.is_primary() {
            return actions;
        }
        if self.queue.remove(&request_id, &sender).is_some() {
            self.broadcast_positions(&mut actions);
        } else if self
            .holder
            .as_ref()
            .is_some_and(|h| h.identity == sender && h.request_id == request_id)
        {
            return self.handle_release(sender, request_id, now);
        }
        actions
    }

    fn grant(&mut self, request: FloorRequest, now: u64, actions: &mut Vec<Action>) {
        let emergency = request.priority.is_emergency();
        let duration_ms = if emergency {
            self.config.emergency_grant_duration_ms
        } else {
            self.config.grant_duration_ms
        };
        info!(channel = %self.channel, holder = %request.requester, priority = %request.priority, "granting floor");
        let holder = FloorHolder::new(&request, now, duration_ms);
        actions.push(Action::Broadcast(ControlMessage::FloorGranted(FloorGrant {
            request_id: holder.request_id,
            holder: holder.identity,
            priority: holder.priority,
            duration_ms,
            emergency,
        })));
        actions.push(Action::Schedule {
            timer: Timer::AutoRelease(holder.request_id),
            after_ms: duration_ms,
        });
        self.holder = Some(holder);
    }

    /// Drop the holder. Preempted holders are not re-queued.
    fn revoke(&mut self, holder: &FloorHolder, reason: &str, actions: &mut Vec<Action>) {
        self.holder = None;
        actions.push(Action::Cancel(TimerKind::AutoRelease));
        actions.push(Action::Broadcast(ControlMessage::FloorRevoked(Revocation {
            request_id: holder.request_id,
            holder: holder.identity,
            reason: reason.to_string(),
        })));
    }

    /// Hand the floor to the head of the queue, or announce it idle.
    fn advance(&mut self, now: u64, actions: &mut Vec<Action>) {
        match self.queue.pop() {
            Some(next) => {
                self.grant(next.request, now, actions);
                self.broadcast_positions(actions);
            }
            None => actions.push(Action::Broadcast(ControlMessage::FloorIdle)),
        }
    }

    fn broadcast_positions(&self, actions: &mut Vec<Action>) {
        let total = self.queue.len() as u32;
        for (request, position) in self.queue.positions() {
            actions.push(Action::Broadcast(ControlMessage::FloorQueued(QueuePosition {
                request_id: request.request_id,
                requester: request.requester,
                position,
                total,
            })));
        }
    }

    fn is_duplicate(&self, request_id: &RequestId) -> bool {
        self.seen.contains(request_id)
            || self.queue.contains(request_id)
            || self.holder.as_ref().is_some_and(|h| h.request_id == *request_id)
    }

    fn remember(&mut self, request_id: RequestId) {
        if self.seen.len() == SEEN_REQUESTS_CAP {
            self.seen.pop_front();
        }
        self.seen.push_back(request_id);
    }

    /// Holder summary for the local floor machine when we are primary.
    pub fn holder_summary(&self, now: u64) -> Option<HolderSummary> {
        self.holder.as_ref().map(|h| h.summary(now))
    }

    // ── Events ───────────────────────────────────────────────────────────

    fn set_role(&mut self, role: ArbiterRole, actions: &mut Vec<Action>) {
        if self.role == role {
            return;
        }
        debug!(channel = %self.channel, from = ?self.role, to = ?role, "arbiter role");
        self.role = role;
        actions.push(Action::Emit(FloorEvent::RoleChanged {
            channel: self.channel.clone(),
            role,
        }));
    }

    fn set_primary(&mut self, primary: Option<(PeerIdentity, Priority)>, actions: &mut Vec<Action>) {
        let changed = self.primary() != primary.map(|(id, _)| id);
        self.primary = primary;
        if changed {
            actions.push(Action::Emit(FloorEvent::PrimaryChanged {
                channel: self.channel.clone(),
                primary: self.primary(),
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(b: u8) -> PeerIdentity {
        PeerIdentity::from_bytes([b; 32])
    }

    fn channel() -> ChannelId {
        ChannelId::from_bytes(vec![3u8; 16]).unwrap()
    }

    fn primary(b: u8) -> ChannelArbiter {
        let mut a = ChannelArbiter::new(channel(), id(b), ArbiterConfig::default());
        a.become_arbiter(0);
        a
    }

    fn broadcasts(actions: &[Action]) -> Vec<&ControlMessage> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Broadcast(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    fn roles(actions: &[Action]) -> Vec<ArbiterRole> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Emit(FloorEvent::RoleChanged { role, .. }) => Some(*role),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn become_and_resign() {
        let mut a = ChannelArbiter::new(channel(), id(1), ArbiterConfig::default());
        let actions = a.become_arbiter(0);
        assert!(a.is_primary());
        assert_eq!(a.primary(), Some(id(1)));
        assert!(broadcasts(&actions).contains(&&ControlMessage::ArbiterAnnounce(Priority::Normal)));
        assert!(actions.contains(&Action::Schedule { timer: Timer::Heartbeat, after_ms: 0 }));
        assert!(a.become_arbiter(1).is_empty());

        let actions = a.resign(10);
        assert_eq!(a.role(), ArbiterRole::Participant);
        assert_eq!(a.primary(), None);
        assert!(actions.contains(&Action::Cancel(TimerKind::Heartbeat)));
        assert!(broadcasts(&actions).contains(&&ControlMessage::ArbiterResign));
    }

    #[test]
    fn free_floor_granted_with_auto_release() {
        let mut a = primary(1);
        let req = FloorRequest::new(id(2), Priority::Normal, 1, 30_000);
        let actions = a.handle_floor_request(req.clone(), 10);
        assert!(matches!(
            broadcasts(&actions)[0],
            ControlMessage::FloorGranted(g) if g.holder == id(2) && g.duration_ms == 30_000
        ));
        assert!(actions.contains(&Action::Schedule {
            timer: Timer::AutoRelease(req.request_id),
            after_ms: 30_000
        }));
        // Duplicate is ignored
        assert!(a.handle_floor_request(req, 20).is_empty());
    }

    #[test]
    fn participant_ignores_requests() {
        let mut a = ChannelArbiter::new(channel(), id(1), ArbiterConfig::default());
        let req = FloorRequest::new(id(2), Priority::Normal, 1, 30_000);
        assert!(a.handle_floor_request(req, 0).is_empty());
    }

    #[test]
    fn queue_full_denies_but_emergency_preempts() {
        let mut a = primary(1);
        a.handle_floor_request(FloorRequest::new(id(2), Priority::Normal, 1, 1), 0);
        for i in 0..20u8 {
            let actions = a.handle_floor_request(FloorRequest::new(id(10 + i), Priority::Normal, 2 + i as u64, 1), 0);
            assert!(broadcasts(&actions)
                .iter()
                .all(|m| matches!(m, ControlMessage::FloorQueued(_))));
        }
        assert_eq!(a.queue_len(), 20);

        let late = FloorRequest::new(id(50), Priority::Normal, 99, 1);
        let actions = a.handle_floor_request(late, 0);
        assert!(matches!(
            broadcasts(&actions)[0],
            ControlMessage::FloorDenied(d) if d.reason == "Queue full" && d.requester == id(50)
        ));

        let emergency = FloorRequest::new(id(60), Priority::Emergency, 100, 1);
        let actions = a.handle_floor_request(emergency, 0);
        let msgs = broadcasts(&actions);
        assert!(matches!(msgs[0], ControlMessage::FloorRevoked(r) if r.holder == id(2)));
        assert!(matches!(
            msgs[1],
            ControlMessage::FloorGranted(g) if g.holder == id(60) && g.emergency && g.duration_ms == 60_000
        ));
        // Preempted holder is dropped, not re-queued
        assert_eq!(a.queue_len(), 20);
    }

    #[test]
    fn emergency_behind_emergency_queues_past_limit() {
        let mut cfg = ArbiterConfig::default();
        cfg.max_queue_depth = 1;
        let mut a = ChannelArbiter::new(channel(), id(1), cfg);
        a.become_arbiter(0);
        a.handle_floor_request(FloorRequest::new(id(2), Priority::Emergency, 1, 1), 0);
        a.handle_floor_request(FloorRequest::new(id(3), Priority::Normal, 2, 1), 0);
        let actions = a.handle_floor_request(FloorRequest::new(id(4), Priority::Emergency, 3, 1), 0);
        assert_eq!(a.queue_len(), 2);
        assert!(matches!(
            broadcasts(&actions)[0],
            ControlMessage::FloorQueued(q) if q.requester == id(4) && q.position == 1 && q.total == 2
        ));
    }

    #[test]
    fn emergency_flood_denied_at_hard_limit() {
        let mut cfg = ArbiterConfig::default();
        cfg.max_queue_depth = 1;
        let mut a = ChannelArbiter::new(channel(), id(1), cfg);
        a.become_arbiter(0);
        a.handle_floor_request(FloorRequest::new(id(2), Priority::Emergency, 1, 1), 0);
        a.handle_floor_request(FloorRequest::new(id(3), Priority::Emergency, 2, 1), 0);
        a.handle_floor_request(FloorRequest::new(id(4), Priority::Emergency, 3, 1), 0);
        assert_eq!(a.queue_len(), 2);

        let actions = a.handle_floor_request(FloorRequest::new(id(5), Priority::Emergency, 4, 1), 0);
        assert_eq!(a.queue_len(), 2);
        assert!(matches!(
            broadcasts(&actions)[0],
            ControlMessage::FloorDenied(d) if d.requester == id(5) && d.reason == QUEUE_FULL_REASON
        ));
    }

    #[test]
    fn higher_priority_preempts() {
        let mut a = primary(1);
        a.handle_floor_request(FloorRequest::new(id(2), Priority::Low, 1, 1), 0);
        let actions = a.handle_floor_request(FloorRequest::new(id(3), Priority::High, 2, 1), 0);
        let msgs = broadcasts(&actions);
        assert!(matches!(msgs[0], ControlMessage::FloorRevoked(r) if r.holder == id(2)));
        assert!(matches!(msgs[1], ControlMessage::FloorGranted(g) if g.holder == id(3)));
    }

    #[test]
    fn auto_release_grants_next_queued() {
        let mut a = primary(1);
        let first = FloorRequest::new(id(2), Priority::Normal, 1, 1);
        a.handle_floor_request(first.clone(), 0);
        a.handle_floor_request(FloorRequest::new(id(3), Priority::Normal, 2, 1), 5);
        a.handle_floor_request(FloorRequest::new(id(4), Priority::Normal, 3, 1), 6);

        let actions = a.on_auto_release(first.request_id, 30_000);
        let msgs = broadcasts(&actions);
        assert!(matches!(msgs[0], ControlMessage::FloorRevoked(r) if r.holder == id(2)));
        assert!(matches!(msgs[1], ControlMessage::FloorGranted(g) if g.holder == id(3)));
        assert!(matches!(
            msgs[2],
            ControlMessage::FloorQueued(q) if q.requester == id(4) && q.position == 1 && q.total == 1
        ));
        assert_eq!(a.holder().unwrap().identity, id(3));
    }

    #[test]
    fn release_with_empty_queue_goes_idle() {
        let mut a = primary(1);
        let req = FloorRequest::new(id(2), Priority::Normal, 1, 1);
        a.handle_floor_request(req.clone(), 0);

        assert!(a.handle_release(id(9), req.request_id, 5).is_empty());
        let actions = a.handle_release(id(2), req.request_id, 10);
        assert!(broadcasts(&actions).contains(&&ControlMessage::FloorIdle));
        assert!(a.holder().is_none());
    }

    #[test]
    fn cancel_rebroadcasts_positions() {
        let mut a = primary(1);
        a.handle_floor_request(FloorRequest::new(id(2), Priority::Normal, 1, 1), 0);
        let second = FloorRequest::new(id(3), Priority::Normal, 2, 1);
        a.handle_floor_request(second.clone(), 0);
        a.handle_floor_request(FloorRequest::new(id(4), Priority::Normal, 3, 1), 0);

        let actions = a.handle_cancel(id(3), second.request_id, 10);
        assert_eq!(a.queue_len(), 1);
        assert!(matches!(
            broadcasts(&actions)[0],
            ControlMessage::FloorQueued(q) if q.requester == id(4) && q.position == 1
        ));
    }

    fn heartbeat(backup: Option<PeerIdentity>) -> ArbiterHeartbeat {
        ArbiterHeartbeat {
            priority: Priority::Normal,
            holder: None,
            queue_size: 0,
            backup,
        }
    }

    #[test]
    fn lost_primary_triggers_candidacy_then_primary() {
        let mut a = ChannelArbiter::new(channel(), id(1), ArbiterConfig::default());
        a.on_heartbeat(id(9), &heartbeat(None), 0);
        assert_eq!(a.primary(), Some(id(9)));

        assert_eq!(a.on_health_timer(2_000).len(), 1);
        let actions = a.on_health_timer(6_000);
        assert_eq!(a.role(), ArbiterRole::Candidate);
        assert_eq!(a.primary(), None);
        assert!(!a.state(6_000).healthy);
        assert!(broadcasts(&actions).contains(&&ControlMessage::Election(Priority::Normal)));
        assert!(actions.contains(&Action::Schedule { timer: Timer::ElectionEnd, after_ms: 1_500 }));

        let actions = a.on_election_end(7_500);
        assert_eq!(a.role(), ArbiterRole::Primary);
        assert_eq!(roles(&actions), vec![ArbiterRole::Primary]);
    }

    #[test]
    fn lone_node_never_elects_itself() {
        let mut a = ChannelArbiter::new(channel(), id(1), ArbiterConfig::default());
        a.on_heartbeat(id(9), &heartbeat(None), 0);
        // Primary last heard long ago: outside the liveness window too
        a.on_health_timer(100_000);
        assert_eq!(a.role(), ArbiterRole::Participant);
        assert_eq!(a.primary(), None);
    }

    #[test]
    fn backup_campaigns_with_half_window() {
        let mut a = ChannelArbiter::new(channel(), id(1), ArbiterConfig::default());
        let actions = a.on_heartbeat(id(9), &heartbeat(Some(id(1))), 0);
        assert_eq!(a.role(), ArbiterRole::Backup);
        assert_eq!(roles(&actions), vec![ArbiterRole::Backup]);

        let actions = a.on_health_timer(6_000);
        assert!(actions.contains(&Action::Schedule { timer: Timer::ElectionEnd, after_ms: 750 }));
    }

    #[test]
    fn candidate_yields_to_better_rival() {
        let mut a = ChannelArbiter::new(channel(), id(1), ArbiterConfig::default());
        a.start_election(0);
        assert_eq!(a.role(), ArbiterRole::Candidate);

        let actions = a.on_election(id(2), Priority::Emergency, 10);
        assert_eq!(a.role(), ArbiterRole::Participant);
        assert!(actions.contains(&Action::Cancel(TimerKind::ElectionEnd)));
        assert!(a.on_election_end(1_500).is_empty());
    }

    #[test]
    fn candidate_yields_to_outranking_announce() {
        let mut a = ChannelArbiter::new(channel(), id(1), ArbiterConfig::default());
        a.start_election(0);
        a.on_announce(id(2), Priority::High, 100);
        assert_eq!(a.role(), ArbiterRole::Participant);
        assert_eq!(a.primary(), Some(id(2)));
    }

    #[test]
    fn split_brain_lower_primary_resigns() {
        let mut a = primary(1);
        a.handle_floor_request(FloorRequest::new(id(3), Priority::Normal, 1, 1), 0);
        let actions = a.on_announce(id(2), Priority::Emergency, 10);
        assert_eq!(a.role(), ArbiterRole::Participant);
        assert_eq!(a.primary(), Some(id(2)));
        assert!(a.holder().is_none());
        assert!(broadcasts(&actions).contains(&&ControlMessage::ArbiterResign));

        let mut b = primary(4);
        let mut cfg = ArbiterConfig::default();
        cfg.priority = Priority::Emergency;
        b.config = cfg;
        let actions = b.on_announce(id(5), Priority::Low, 10);
        assert!(b.is_primary());
        assert!(broadcasts(&actions).contains(&&ControlMessage::ArbiterAnnounce(Priority::Emergency)));
    }

    #[test]
    fn resign_from_primary_clears_without_election() {
        let mut a = ChannelArbiter::new(channel(), id(1), ArbiterConfig::default());
        a.on_heartbeat(id(9), &heartbeat(Some(id(1))), 0);
        a.on_resign(id(8), 10);
        assert_eq!(a.primary(), Some(id(9)));
        let actions = a.on_resign(id(9), 20);
        assert_eq!(a.primary(), None);
        assert_eq!(a.role(), ArbiterRole::Participant);
        assert!(broadcasts(&actions).is_empty());
    }

    #[test]
    fn heartbeat_names_best_live_backup() {
        let mut a = primary(1);
        a.observe_peer(id(2), Some(Priority::Low), 0);
        a.observe_peer(id(3), Some(Priority::High), 0);
        let actions = a.on_heartbeat_timer(100);
        assert!(matches!(
            broadcasts(&actions)[0],
            ControlMessage::ArbiterHeartbeat(hb) if hb.backup == Some(id(3))
        ));
        assert!(actions.contains(&Action::Schedule { timer: Timer::Heartbeat, after_ms: 2_000 }));
    }
}
