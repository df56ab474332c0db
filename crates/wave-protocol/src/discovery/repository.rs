use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::types::ChannelId;

use super::types::ChannelMetadata;

/// A channel this node has joined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedChannel {
    pub id: ChannelId,
    pub metadata: ChannelMetadata,
}

/// Local channel store consulted by the discovery beacon.
///
/// The beacon reads it for periodic announces and join checks, and deletes
/// from it when a peer's delete notification arrives.
#[async_trait]
pub trait ChannelRepository: Send + Sync + 'static {
    async fn joined_channels(&self) -> Vec<JoinedChannel>;

    async fn upsert_channel(&self, id: ChannelId, metadata: ChannelMetadata);

    async fn delete_channel(&self, id: &ChannelId);

    async fn is_joined(&self, id: &ChannelId) -> bool {
        self.joined_channels().await.iter().any(|c| c.id == *id)
    }
}

/// Repository held in memory.
#[derive(Debug, Default)]
pub struct InMemoryChannelRepository {
    channels: RwLock<BTreeMap<ChannelId, ChannelMetadata>>,
}

impl InMemoryChannelRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelRepository for InMemoryChannelRepository {
    async fn joined_channels(&self) -> Vec<JoinedChannel> {
        self.channels
            .read()
            .await
            .iter()
            .map(|(id, metadata)| JoinedChannel {
                id: id.clone(),
                metadata: metadata.clone(),
            })
            .collect()
    }

    async fn upsert_channel(&self, id: ChannelId, metadata: ChannelMetadata) {
        self.channels.write().await.insert(id, metadata);
    }

    async fn delete_channel(&self, id: &ChannelId) {
        self.channels.write().await.remove(id);
    }

    async fn is_joined(&self, id: &ChannelId) -> bool {
        self.channels.read().await.contains_key(id)
    }
}
