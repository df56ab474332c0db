//! Routing of control messages and timers to a channel's floor machine and
//! arbiter, and the task that reads the control lane.
use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, trace};
use wave_transport::ControlPacket;

use crate::action::{Action, Timer};
use crate::arbiter::ChannelArbiter;
use crate::floor::FloorMachine;
use crate::message::ControlMessage;
use crate::types::{ChannelId, PeerIdentity};

use super::executor;
use super::{Inner, RuntimeConfig};

/// Everything the runtime knows about one joined channel.
pub(crate) struct ChannelState {
    pub floor: FloorMachine,
    pub arbiter: ChannelArbiter,
}

impl ChannelState {
    pub fn new(channel: ChannelId, local: PeerIdentity, config: &RuntimeConfig) -> Self {
        Self {
            floor: FloorMachine::new(channel.clone(), local, config.floor.clone()),
            arbiter: ChannelArbiter::new(channel, local, config.arbiter.clone()),
        }
    }

    /// A message from a peer, already bound to its authenticated sender.
    pub fn on_message(&mut self, sender: PeerIdentity, msg: ControlMessage, now: u64) -> Vec<Action> {
        self.arbiter.observe_peer(sender, None, now);
        let mut actions = Vec::new();
        match msg {
            ControlMessage::FloorRequest(request) => {
                actions.extend(self.arbiter.handle_floor_request(request.clone(), now));
                actions.extend(self.floor.on_remote_request(request, now));
            }
            ControlMessage::FloorRelease(request_id) => {
                actions.extend(self.arbiter.handle_release(sender, request_id, now));
                actions.extend(self.floor.on_release(&sender, request_id, now));
            }
            ControlMessage::FloorCancel(request_id) => {
                actions.extend(self.arbiter.handle_cancel(sender, request_id, now));
                actions.extend(self.floor.on_remote_cancel(request_id));
            }
            ControlMessage::FloorTaken(taken) => {
                actions.extend(self.floor.on_floor_taken(taken, now));
            }
            ControlMessage::ArbiterAnnounce(priority) => {
                actions.extend(self.arbiter.on_announce(sender, priority, now));
            }
            ControlMessage::ArbiterHeartbeat(heartbeat) => {
                actions.extend(self.arbiter.on_heartbeat(sender, &heartbeat, now));
                self.settle(now, &mut actions);
                if self.arbiter.primary() == Some(sender) {
                    actions.extend(self.floor.sync_holder(heartbeat.holder.as_ref(), now));
                }
            }
            ControlMessage::ArbiterResign => {
                actions.extend(self.arbiter.on_resign(sender, now));
            }
            ControlMessage::Election(priority) => {
                actions.extend(self.arbiter.on_election(sender, priority, now));
            }
            ControlMessage::FloorGranted(_)
            | ControlMessage::FloorDenied(_)
            | ControlMessage::FloorQueued(_)
            | ControlMessage::FloorRevoked(_)
            | ControlMessage::FloorIdle => {
                let known = self.arbiter.primary();
                if known.is_some_and(|primary| primary != sender) {
                    debug!(%sender, ?known, kind = ?msg.kind(), "arbiter message from non-primary dropped");
                } else {
                    actions.extend(self.arbiter_verdict(&msg, now));
                }
            }
        }
        self.settle(now, &mut actions);
        actions
    }

    /// One of our own broadcasts. The link never echoes them, so the local
    /// arbiter and floor machine see them here.
    pub fn on_loopback(&mut self, local: PeerIdentity, msg: &ControlMessage, now: u64) -> Vec<Action> {
        let mut actions = match msg {
            ControlMessage::FloorRequest(request) => self.arbiter.handle_floor_request(request.clone(), now),
            ControlMessage::FloorRelease(request_id) => self.arbiter.handle_release(local, *request_id, now),
            ControlMessage::FloorCancel(request_id) => self.arbiter.handle_cancel(local, *request_id, now),
            ControlMessage::FloorGranted(_)
            | ControlMessage::FloorDenied(_)
            | ControlMessage::FloorQueued(_)
            | ControlMessage::FloorRevoked(_)
            | ControlMessage::FloorIdle => self.arbiter_verdict(msg, now),
            _ => Vec::new(),
        };
        self.settle(now, &mut actions);
        actions
    }

    pub fn on_timer(&mut self, timer: Timer, now: u64) -> Vec<Action> {
        let mut actions = match timer {
            Timer::RequestTimeout(id) => self.floor.on_request_timeout(id, now),
            Timer::CollisionWindow => self.floor.on_collision_window(now),
            Timer::HoldExpiry(id) => self.floor.on_hold_expiry(id, now),
            Timer::HolderExpiry(id) => self.floor.on_holder_expiry(id, now),
            Timer::AutoRelease(id) => self.arbiter.on_auto_release(id, now),
            Timer::Heartbeat => self.arbiter.on_heartbeat_timer(now),
            Timer::HealthMonitor => self.arbiter.on_health_timer(now),
            Timer::ElectionEnd => self.arbiter.on_election_end(now),
        };
        self.settle(now, &mut actions);
        actions
    }

    /// Keep the floor machine's mode in line with the known primary.
    pub fn settle(&mut self, now: u64, actions: &mut Vec<Action>) {
        let arbitrated = self.arbiter.primary().is_some();
        actions.extend(self.floor.set_arbitrated(arbitrated, now));
    }

    fn arbiter_verdict(&mut self, msg: &ControlMessage, now: u64) -> Vec<Action> {
        match msg {
            ControlMessage::FloorGranted(grant) => self.floor.on_grant(grant, now),
            ControlMessage::FloorDenied(denial) => self.floor.on_denied(denial),
            ControlMessage::FloorQueued(position) => self.floor.on_queued(position),
            ControlMessage::FloorRevoked(revocation) => self.floor.on_revoked(revocation),
            ControlMessage::FloorIdle => self.floor.on_idle(),
            _ => Vec::new(),
        }
    }
}

// ── Dispatcher task ─────────────────────────────────────────────────────

pub(super) async fn run(inner: Arc<Inner>, mut packets: broadcast::Receiver<ControlPacket>) {
    loop {
        let packet = tokio::select! {
            _ = inner.cancel.cancelled() => break,
            r = packets.recv() => r,
        };
        match packet {
            Ok(packet) => handle_packet(&inner, packet).await,
            Err(RecvError::Lagged(skipped)) => {
                debug!(skipped, "control dispatcher lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("control dispatcher exited");
}

async fn handle_packet(inner: &Arc<Inner>, packet: ControlPacket) {
    let ControlPacket {
        channel,
        sender,
        payload,
    } = packet;
    let msg = match ControlMessage::decode(&payload) {
        Ok(msg) => msg,
        Err(e) => {
            debug!(%channel, %sender, error = %e, "dropping undecodable control message");
            return;
        }
    };
    if let Err(e) = msg.check_sender(&sender) {
        debug!(%channel, error = %e, "dropping control message");
        return;
    }
    match &msg {
        ControlMessage::FloorRequest(request) => {
            inner.clock.observe(request.clock);
        }
        ControlMessage::FloorTaken(taken) => {
            inner.clock.observe(taken.request.clock);
        }
        _ => {}
    }

    let Some(state) = inner.channel(&channel) else {
        trace!(%channel, %sender, "control message for a channel we have not joined");
        return;
    };
    let mut state = state.lock().await;
    let now = inner.now_ms();
    let actions = state.on_message(sender, msg, now);
    executor::execute(inner, &channel, &mut state, actions).await;
}
