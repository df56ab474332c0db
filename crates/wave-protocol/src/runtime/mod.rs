//! Floor runtime: wires the floor machines and arbiters of every joined
//! channel to a control link.
//!
//! The runtime owns one dispatcher task (control lane → state machines) and
//! the per-channel timer tasks. It exposes a cloneable handle so the
//! application never touches raw control messages.
mod dispatch;
mod executor;
pub mod link;
mod registry;

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Deserialize;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::action::{Action, Timer};
use crate::arbiter::{ArbiterConfig, ArbitrationState};
use crate::error::ProtocolError;
use crate::event::FloorEvent;
use crate::floor::{FloorConfig, FloorState};
use crate::types::{ChannelId, LamportClock, PeerIdentity, Priority, RequestId};

use dispatch::ChannelState;
use registry::TaskRegistry;

pub use link::ControlLink;

// ── Configuration ─────────────────────────────────────────────────────

/// Configuration for the floor runtime.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RuntimeConfig {
    /// Local floor machine timings.
    pub floor: FloorConfig,
    /// Arbiter timings, limits and our election priority.
    pub arbiter: ArbiterConfig,
    /// Capacity of the event channel.
    pub event_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            floor: FloorConfig::default(),
            arbiter: ArbiterConfig::default(),
            event_buffer: 1024,
        }
    }
}

// ── Runtime ───────────────────────────────────────────────────────────

pub(crate) struct Inner {
    link: Arc<dyn ControlLink>,
    local: PeerIdentity,
    clock: LamportClock,
    config: RuntimeConfig,
    channels: DashMap<ChannelId, Arc<Mutex<ChannelState>>>,
    tasks: TaskRegistry,
    events: mpsc::Sender<FloorEvent>,
    epoch: Instant,
    cancel: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    fn channel(&self, channel: &ChannelId) -> Option<Arc<Mutex<ChannelState>>> {
        self.channels.get(channel).map(|entry| entry.value().clone())
    }
}

/// Entry point: `FloorRuntime::spawn(link, config)`.
pub struct FloorRuntime;

impl FloorRuntime {
    /// Start the dispatcher and return the handle plus the event stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<L: ControlLink + 'static>(
        link: Arc<L>,
        config: RuntimeConfig,
    ) -> (FloorHandle, mpsc::Receiver<FloorEvent>) {
        let (events, rx) = mpsc::channel(config.event_buffer.max(1));
        let link: Arc<dyn ControlLink> = link;
        let packets = link.subscribe();
        let inner = Arc::new(Inner {
            local: link.local_id(),
            link,
            clock: LamportClock::new(),
            config,
            channels: DashMap::new(),
            tasks: TaskRegistry::new(),
            events,
            epoch: Instant::now(),
            cancel: CancellationToken::new(),
            dispatcher: Mutex::new(None),
        });
        let task = tokio::spawn(dispatch::run(inner.clone(), packets));
        if let Ok(mut slot) = inner.dispatcher.try_lock() {
            *slot = Some(task);
        }
        info!(id = %inner.local, "floor runtime started");
        (FloorHandle { inner }, rx)
    }
}

/// Cheap, cloneable handle to a running [`FloorRuntime`].
#[derive(Clone)]
pub struct FloorHandle {
    inner: Arc<Inner>,
}

impl FloorHandle {
    pub fn local_id(&self) -> PeerIdentity {
        self.inner.local
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Create the channel's floor and arbitration state and make it the
    /// active channel on the link. Idempotent.
    pub async fn join_channel(&self, channel: ChannelId) -> Result<(), ProtocolError> {
        self.check_running()?;
        self.inner.link.activate(Some(channel.clone())).await;
        let state = match self.inner.channels.entry(channel.clone()) {
            Entry::Occupied(_) => return Ok(()),
            Entry::Vacant(slot) => {
                let state = Arc::new(Mutex::new(ChannelState::new(
                    channel.clone(),
                    self.inner.local,
                    &self.inner.config,
                )));
                slot.insert(state.clone());
                state
            }
        };
        let mut guard = state.lock().await;
        info!(%channel, "joined channel");
        let actions = vec![Action::Schedule {
            timer: Timer::HealthMonitor,
            after_ms: self.inner.config.arbiter.heartbeat_interval_ms,
        }];
        executor::execute(&self.inner, &channel, &mut guard, actions).await;
        Ok(())
    }

    /// Resign and release as needed, then drop every timer and all state
    /// for the channel.
    pub async fn leave_channel(&self, channel: &ChannelId) -> Result<(), ProtocolError> {
        self.check_running()?;
        let state = self.state(channel)?;
        {
            let mut guard = state.lock().await;
            let now = self.inner.now_ms();
            let mut actions = guard.arbiter.resign(now);
            if guard.floor.state() == FloorState::Granted || guard.floor.pending().is_some() {
                actions.extend(guard.floor.release(now).unwrap_or_default());
            }
            executor::execute(&self.inner, channel, &mut guard, actions).await;
            self.inner.channels.remove(channel);
            self.inner.tasks.cancel_channel(channel);
        }
        let next = self.inner.channels.iter().next().map(|e| e.key().clone());
        self.inner.link.activate(next).await;
        info!(%channel, "left channel");
        Ok(())
    }

    /// Joined channels.
    pub fn channels(&self) -> Vec<ChannelId> {
        let mut channels: Vec<ChannelId> = self.inner.channels.iter().map(|e| e.key().clone()).collect();
        channels.sort();
        channels
    }

    /// Ask for the floor. Returns the id of the new request.
    pub async fn request_floor(&self, channel: &ChannelId, priority: Priority) -> Result<RequestId, ProtocolError> {
        self.check_running()?;
        let state = self.state(channel)?;
        let mut guard = state.lock().await;
        let clock = self.inner.clock.tick();
        let actions = guard.floor.request(priority, clock, self.inner.now_ms())?;
        let request_id = guard
            .floor
            .pending()
            .map(|r| r.request_id)
            .ok_or(ProtocolError::NoPendingRequest)?;
        executor::execute(&self.inner, channel, &mut guard, actions).await;
        Ok(request_id)
    }

    pub async fn release_floor(&self, channel: &ChannelId) -> Result<(), ProtocolError> {
        self.with_channel(channel, |s, now| s.floor.release(now)).await
    }

    pub async fn cancel_request(&self, channel: &ChannelId) -> Result<(), ProtocolError> {
        self.with_channel(channel, |s, now| s.floor.cancel(now)).await
    }

    pub async fn become_arbiter(&self, channel: &ChannelId) -> Result<(), ProtocolError> {
        self.with_channel(channel, |s, now| Ok(s.arbiter.become_arbiter(now))).await
    }

    pub async fn resign_arbiter(&self, channel: &ChannelId) -> Result<(), ProtocolError> {
        self.with_channel(channel, |s, now| Ok(s.arbiter.resign(now))).await
    }

    pub async fn start_election(&self, channel: &ChannelId) -> Result<(), ProtocolError> {
        self.with_channel(channel, |s, now| Ok(s.arbiter.start_election(now))).await
    }

    pub async fn floor_state(&self, channel: &ChannelId) -> Result<FloorState, ProtocolError> {
        let state = self.state(channel)?;
        let guard = state.lock().await;
        Ok(guard.floor.state())
    }

    /// Who holds the floor on `channel`, as this node sees it.
    pub async fn floor_holder(&self, channel: &ChannelId) -> Result<Option<PeerIdentity>, ProtocolError> {
        let state = self.state(channel)?;
        let guard = state.lock().await;
        Ok(guard.floor.holder().map(|h| h.identity))
    }

    pub async fn arbitration_state(&self, channel: &ChannelId) -> Result<ArbitrationState, ProtocolError> {
        let state = self.state(channel)?;
        let guard = state.lock().await;
        Ok(guard.arbiter.state(self.inner.now_ms()))
    }

    /// Stop the dispatcher, cancel every timer and drop all channel state.
    /// Idempotent; every other call fails with `Shutdown` afterwards.
    pub async fn shutdown(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        self.inner.cancel.cancel();
        if let Some(task) = self.inner.dispatcher.lock().await.take() {
            let _ = task.await;
        }
        self.inner.tasks.cancel_all();
        self.inner.channels.clear();
        self.inner.link.activate(None).await;
        info!(id = %self.inner.local, "floor runtime stopped");
    }

    fn check_running(&self) -> Result<(), ProtocolError> {
        if self.inner.cancel.is_cancelled() {
            Err(ProtocolError::Shutdown)
        } else {
            Ok(())
        }
    }

    fn state(&self, channel: &ChannelId) -> Result<Arc<Mutex<ChannelState>>, ProtocolError> {
        self.check_running()?;
        self.inner
            .channel(channel)
            .ok_or_else(|| ProtocolError::ChannelNotJoined(channel.clone()))
    }

    async fn with_channel<F>(&self, channel: &ChannelId, f: F) -> Result<(), ProtocolError>
    where
        F: FnOnce(&mut ChannelState, u64) -> Result<Vec<Action>, ProtocolError>,
    {
        let state = self.state(channel)?;
        let mut guard = state.lock().await;
        let now = self.inner.now_ms();
        let mut actions = f(&mut guard, now)?;
        guard.settle(now, &mut actions);
        debug!(%channel, count = actions.len(), "executing local operation");
        executor::execute(&self.inner, channel, &mut guard, actions).await;
        Ok(())
    }

    #[cfg(test)]
    fn armed(&self, channel: &ChannelId, kind: crate::action::TimerKind) -> bool {
        self.inner.tasks.is_scheduled(channel, kind)
    }

    #[cfg(test)]
    fn armed_count(&self, channel: &ChannelId) -> usize {
        self.inner.tasks.count(channel)
    }
}

impl std::fmt::Debug for FloorHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FloorHandle")
            .field("id", &self.inner.local)
            .field("channels", &self.inner.channels.len())
            .finish_non_exhaustive()
    }
}
