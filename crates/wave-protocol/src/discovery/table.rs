//! Discovered-channel cache and the deletion denylist.
//!
//! The table is a time-bounded view that the sweep prunes. The suppression
//! set is never pruned and wins over the table: `suppress` inserts into the
//! set before removing from the table, and admitting an announce re-checks
//! the set after the upsert. Either side of a race therefore removes the
//! entry, with no lock spanning both maps.
use dashmap::{DashMap, DashSet};

use crate::types::ChannelId;

use super::types::DiscoveredChannel;

/// Outcome of recording an announce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// First sighting.
    New,
    /// Metadata or announcer changed.
    Changed,
    /// Same content, `last_seen` refreshed.
    Refreshed,
}

#[derive(Debug, Default)]
pub struct DiscoveryTable {
    channels: DashMap<ChannelId, DiscoveredChannel>,
}

impl DiscoveryTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, channel: DiscoveredChannel) -> Upsert {
        use dashmap::mapref::entry::Entry;
        match self.channels.entry(channel.channel_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(channel);
                Upsert::New
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get();
                let changed =
                    existing.metadata != channel.metadata || existing.announcer != channel.announcer;
                slot.insert(channel);
                if changed {
                    Upsert::Changed
                } else {
                    Upsert::Refreshed
                }
            }
        }
    }

    pub fn remove(&self, channel_id: &ChannelId) -> Option<DiscoveredChannel> {
        self.channels.remove(channel_id).map(|(_, channel)| channel)
    }

    pub fn get(&self, channel_id: &ChannelId) -> Option<DiscoveredChannel> {
        self.channels.get(channel_id).map(|entry| entry.value().clone())
    }

    /// All entries, by name.
    pub fn list(&self) -> Vec<DiscoveredChannel> {
        let mut all: Vec<_> = self.channels.iter().map(|entry| entry.value().clone()).collect();
        all.sort_by(|a, b| a.metadata.name.cmp(&b.metadata.name));
        all
    }

    /// Evict entries not seen within `stale_ms`; returns their ids.
    pub fn sweep(&self, now: u64, stale_ms: u64) -> Vec<ChannelId> {
        let mut stale = Vec::new();
        self.channels.retain(|id, channel| {
            let keep = now.saturating_sub(channel.last_seen) <= stale_ms;
            if !keep {
                stale.push(id.clone());
            }
            keep
        });
        stale
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

/// Channel ids that must never be re-admitted this session.
#[derive(Debug, Default)]
pub struct SuppressionSet {
    ids: DashSet<ChannelId>,
}

impl SuppressionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the id was not yet suppressed.
    pub fn suppress(&self, channel_id: ChannelId) -> bool {
        self.ids.insert(channel_id)
    }

    pub fn contains(&self, channel_id: &ChannelId) -> bool {
        self.ids.contains(channel_id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::discovery::types::{Announcer, ChannelMetadata};
    use crate::types::{PeerIdentity, Priority};

    fn discovered(id: u8, name: &str, last_seen: u64) -> DiscoveredChannel {
        DiscoveredChannel {
            channel_id: ChannelId::from_bytes(vec![id; 16]).unwrap(),
            metadata: ChannelMetadata {
                name: name.into(),
                description: String::new(),
                priority: Priority::Normal,
                member_count: 1,
                creator_key: PeerIdentity::from_bytes([id; 32]),
            },
            announcer: Announcer {
                identity: PeerIdentity::from_bytes([id; 32]),
                name: "peer".into(),
                address: "10.0.0.1:5006".parse().unwrap(),
            },
            last_seen,
        }
    }

    #[test]
    fn upsert_outcomes() {
        let table = DiscoveryTable::new();
        assert_eq!(table.upsert(discovered(1, "a", 0)), Upsert::New);
        assert_eq!(table.upsert(discovered(1, "a", 10)), Upsert::Refreshed);
        assert_eq!(table.upsert(discovered(1, "renamed", 20)), Upsert::Changed);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(&discovered(1, "", 0).channel_id).unwrap().last_seen, 20);
    }

    #[test]
    fn sweep_evicts_only_stale() {
        let table = DiscoveryTable::new();
        table.upsert(discovered(1, "old", 0));
        table.upsert(discovered(2, "fresh", 25_000));
        let evicted = table.sweep(31_000, 30_000);
        assert_eq!(evicted, vec![discovered(1, "", 0).channel_id]);
        assert_eq!(table.list()[0].metadata.name, "fresh");
    }

    #[test]
    fn suppression_is_sticky() {
        let set = SuppressionSet::new();
        let id = ChannelId::from_bytes(vec![5; 16]).unwrap();
        assert!(set.suppress(id.clone()));
        assert!(!set.suppress(id.clone()));
        assert!(set.contains(&id));
    }

    #[test]
    fn concurrent_upserts_on_distinct_channels() {
        let table = Arc::new(DiscoveryTable::new());
        let workers: Vec<_> = (0..8u8)
            .map(|worker| {
                let table = table.clone();
                std::thread::spawn(move || {
                    for round in 0..50u64 {
                        table.upsert(discovered(worker, "ch", round));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(table.len(), 8);
        assert!(table.list().iter().all(|c| c.last_seen == 49));
    }

    #[test]
    fn suppress_then_remove_beats_racing_upsert() {
        // Both orders of the race end with the channel absent.
        let table = DiscoveryTable::new();
        let set = SuppressionSet::new();
        let channel = discovered(3, "late", 0);
        let id = channel.channel_id.clone();

        // Upsert lands first: the suppressor's remove clears it.
        table.upsert(channel.clone());
        set.suppress(id.clone());
        table.remove(&id);
        assert!(table.get(&id).is_none());

        // Suppression lands first: the admitting side re-checks and removes.
        table.upsert(channel);
        if set.contains(&id) {
            table.remove(&id);
        }
        assert!(table.is_empty());
    }
}
