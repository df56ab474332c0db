//! Per-channel timer tasks.
//!
//! At most one task per `(channel, kind)`. Scheduling a kind aborts the
//! task it replaces; every task carries a generation so a task that lost a
//! race with its replacement finds its slot taken and does nothing.
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::action::TimerKind;
use crate::types::ChannelId;

type Slot = (ChannelId, TimerKind);

#[derive(Default)]
pub(crate) struct TaskRegistry {
    tasks: DashMap<Slot, (u64, JoinHandle<()>)>,
    generation: AtomicU64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Install a task, aborting whatever held the slot.
    pub fn insert(&self, channel: ChannelId, kind: TimerKind, generation: u64, handle: JoinHandle<()>) {
        if let Some((_, old)) = self.tasks.insert((channel, kind), (generation, handle)) {
            old.abort();
        }
    }

    /// Idempotent.
    pub fn cancel(&self, channel: &ChannelId, kind: TimerKind) {
        if let Some((_, (_, handle))) = self.tasks.remove(&(channel.clone(), kind)) {
            handle.abort();
        }
    }

    /// Called by a firing task: frees the slot if it is still ours.
    pub fn claim(&self, channel: &ChannelId, kind: TimerKind, generation: u64) -> bool {
        self.tasks
            .remove_if(&(channel.clone(), kind), |_, (g, _)| *g == generation)
            .is_some()
    }

    pub fn cancel_channel(&self, channel: &ChannelId) {
        self.tasks.retain(|(c, _), (_, handle)| {
            if c == channel {
                handle.abort();
                false
            } else {
                true
            }
        });
    }

    pub fn cancel_all(&self) {
        self.tasks.retain(|_, (_, handle)| {
            handle.abort();
            false
        });
    }

    pub fn is_scheduled(&self, channel: &ChannelId, kind: TimerKind) -> bool {
        self.tasks.contains_key(&(channel.clone(), kind))
    }

    /// Armed timers for `channel`.
    pub fn count(&self, channel: &ChannelId) -> usize {
        self.tasks.iter().filter(|e| e.key().0 == *channel).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn channel(b: u8) -> ChannelId {
        ChannelId::from_bytes(vec![b; 4]).unwrap()
    }

    fn sleeper() -> JoinHandle<()> {
        tokio::spawn(tokio::time::sleep(Duration::from_secs(3600)))
    }

    #[tokio::test]
    async fn replacing_aborts_previous() {
        let registry = TaskRegistry::new();
        let first = sleeper();
        let first_abort = first.abort_handle();
        registry.insert(channel(1), TimerKind::Heartbeat, 0, first);
        registry.insert(channel(1), TimerKind::Heartbeat, 1, sleeper());
        for _ in 0..10 {
            if first_abort.is_finished() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(first_abort.is_finished());
        assert_eq!(registry.count(&channel(1)), 1);
    }

    #[tokio::test]
    async fn claim_checks_generation() {
        let registry = TaskRegistry::new();
        registry.insert(channel(1), TimerKind::ElectionEnd, 5, sleeper());
        assert!(!registry.claim(&channel(1), TimerKind::ElectionEnd, 4));
        assert!(registry.is_scheduled(&channel(1), TimerKind::ElectionEnd));
        assert!(registry.claim(&channel(1), TimerKind::ElectionEnd, 5));
        assert!(!registry.is_scheduled(&channel(1), TimerKind::ElectionEnd));
    }

    #[tokio::test]
    async fn cancel_is_idempotent_and_scoped() {
        let registry = TaskRegistry::new();
        registry.insert(channel(1), TimerKind::Heartbeat, 0, sleeper());
        registry.insert(channel(1), TimerKind::HealthMonitor, 1, sleeper());
        registry.insert(channel(2), TimerKind::Heartbeat, 2, sleeper());

        registry.cancel(&channel(1), TimerKind::Heartbeat);
        registry.cancel(&channel(1), TimerKind::Heartbeat);
        assert_eq!(registry.count(&channel(1)), 1);

        registry.cancel_channel(&channel(1));
        assert_eq!(registry.count(&channel(1)), 0);
        assert_eq!(registry.count(&channel(2)), 1);

        registry.cancel_all();
        assert_eq!(registry.count(&channel(2)), 0);
    }
}
