//! Action executor. The only place that touches I/O.
//!
//! Takes the actions returned by the floor machine and the arbiter and
//! executes them concretely:
//! - Broadcast -> link.send_control(), then local loopback
//! - Schedule / Cancel -> timer tasks in the registry
//! - Emit -> event_tx.try_send()
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::action::{Action, Timer};
use crate::event::FloorEvent;
use crate::types::ChannelId;

use super::dispatch::ChannelState;
use super::Inner;

/// Run `actions` to completion, including everything they cause locally.
///
/// Called with the channel's state locked, so a timer task for this channel
/// cannot observe a half-applied batch.
pub(super) async fn execute(inner: &Arc<Inner>, channel: &ChannelId, state: &mut ChannelState, actions: Vec<Action>) {
    let mut queue: VecDeque<Action> = actions.into();
    while let Some(action) = queue.pop_front() {
        match action {
            Action::Broadcast(msg) => {
                match msg.encode() {
                    Ok(bytes) => {
                        if !inner.link.send_control(channel, &bytes).await {
                            debug!(%channel, kind = ?msg.kind(), "control send failed");
                        }
                    }
                    Err(e) => debug!(%channel, error = %e, "control encode failed"),
                }
                let now = inner.now_ms();
                queue.extend(state.on_loopback(inner.local, &msg, now));
            }
            Action::Schedule { timer, after_ms } => schedule(inner, channel, timer, after_ms),
            Action::Cancel(kind) => inner.tasks.cancel(channel, kind),
            Action::Emit(event) => emit(inner, event),
        }
    }
}

fn emit(inner: &Inner, event: FloorEvent) {
    // try_send: a slow consumer loses events, the runtime never blocks
    if let Err(e) = inner.events.try_send(event) {
        debug!(error = %e, "floor event dropped");
    }
}

fn schedule(inner: &Arc<Inner>, channel: &ChannelId, timer: Timer, after_ms: u64) {
    if inner.cancel.is_cancelled() {
        return;
    }
    let kind = timer.kind();
    let generation = inner.tasks.next_generation();
    let task_inner = inner.clone();
    let task_channel = channel.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(after_ms)).await;
        fire(task_inner, task_channel, timer, generation).await;
    });
    trace!(%channel, ?kind, after_ms, "timer armed");
    inner.tasks.insert(channel.clone(), kind, generation, handle);
}

async fn fire(inner: Arc<Inner>, channel: ChannelId, timer: Timer, generation: u64) {
    let Some(state) = inner.channel(&channel) else {
        return;
    };
    // The scheduler holds this lock until the slot is registered.
    let mut state = state.lock().await;
    if !inner.tasks.claim(&channel, timer.kind(), generation) {
        return;
    }
    trace!(%channel, ?timer, "timer fired");
    let now = inner.now_ms();
    let actions = state.on_timer(timer, now);
    execute(&inner, &channel, &mut state, actions).await;
}
