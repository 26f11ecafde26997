//! Keyed channel storage.
//!
//! The broker only needs get/put/delete/keys. Each stored channel carries its
//! own lock so that concurrent requests against one channel are serialized
//! while different channels proceed independently.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::channel::Channel;
use crate::types::{BrokerError, ChannelId};

/// A channel behind its per-channel lock.
pub type SharedChannel = Arc<Mutex<Channel>>;

/// Backing store for channels keyed by id.
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn get(&self, id: &ChannelId) -> Result<Option<SharedChannel>, BrokerError>;

    async fn put(&self, id: ChannelId, channel: SharedChannel) -> Result<(), BrokerError>;

    /// Remove `id`. Removing an absent id succeeds.
    async fn delete(&self, id: &ChannelId) -> Result<(), BrokerError>;

    async fn keys(&self) -> Result<Vec<ChannelId>, BrokerError>;
}

/// Process-lifetime in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    channels: RwLock<HashMap<ChannelId, SharedChannel>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChannelStore for MemoryStore {
    async fn get(&self, id: &ChannelId) -> Result<Option<SharedChannel>, BrokerError> {
        Ok(self.channels.read().await.get(id).cloned())
    }

    async fn put(&self, id: ChannelId, channel: SharedChannel) -> Result<(), BrokerError> {
        self.channels.write().await.insert(id, channel);
        Ok(())
    }

    async fn delete(&self, id: &ChannelId) -> Result<(), BrokerError> {
        self.channels.write().await.remove(id);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<ChannelId>, BrokerError> {
        Ok(self.channels.read().await.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PeerAddr, Settings};

    fn channel(id: &str) -> SharedChannel {
        Arc::new(Mutex::new(Channel::new(
            ChannelId::from(id),
            PeerAddr::from("10.0.0.1"),
            Settings::new(),
        )))
    }

    #[tokio::test]
    async fn test_put_then_get_returns_same_channel() {
        let store = MemoryStore::new();
        let stored = channel("a");
        store.put(ChannelId::from("a"), stored.clone()).await.unwrap();

        let fetched = store.get(&ChannelId::from("a")).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&stored, &fetched));
    }

    #[tokio::test]
    async fn test_delete_absent_is_ok() {
        let store = MemoryStore::new();
        store.delete(&ChannelId::from("missing")).await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_keys_lists_every_entry() {
        let store = MemoryStore::new();
        store.put(ChannelId::from("a"), channel("a")).await.unwrap();
        store.put(ChannelId::from("b"), channel("b")).await.unwrap();

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec![ChannelId::from("a"), ChannelId::from("b")]);
    }
}
