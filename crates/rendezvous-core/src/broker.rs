//! Channel registry.
//!
//! The broker creates channels, resolves identifiers, routes a caller's
//! send/receive to the right queue and tears channels down. It owns no
//! global state; build one at startup and share it by handle.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::channel::Channel;
use crate::store::{ChannelStore, MemoryStore, SharedChannel};
use crate::types::{BrokerError, ChannelId, PeerAddr, Settings};

/// Diagnostic view of one channel, as reported by the listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSummary {
    pub id: ChannelId,
    pub created_at: DateTime<Utc>,
    pub attached: bool,
    /// Messages waiting for the host.
    pub pending_host: usize,
    /// Messages waiting for the client.
    pub pending_client: usize,
}

/// Registry of channels over a pluggable store.
pub struct Broker<S: ChannelStore = MemoryStore> {
    store: Arc<S>,
}

impl<S: ChannelStore> Clone for Broker<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl Broker<MemoryStore> {
    /// Broker backed by a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }
}

impl<S: ChannelStore> Broker<S> {
    pub fn new(store: S) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Register a new channel owned by `host`.
    ///
    /// The generated id is folded into `settings` under `channel`. Id
    /// collisions are not checked.
    pub async fn create_channel(
        &self,
        host: PeerAddr,
        mut settings: Settings,
    ) -> Result<SharedChannel, BrokerError> {
        let id = ChannelId::generate();
        settings.set_channel(&id);

        info!(channel = %id, host = %host, "Creating channel");

        let channel = Arc::new(Mutex::new(Channel::new(id.clone(), host, settings)));
        self.store.put(id, channel.clone()).await?;
        Ok(channel)
    }

    /// Resolve `id`. An unknown id is `Ok(None)`.
    pub async fn lookup(&self, id: &ChannelId) -> Result<Option<SharedChannel>, BrokerError> {
        self.store.get(id).await
    }

    /// Bind `client` to channel `id` and return the channel's settings.
    ///
    /// Returns `Ok(None)` when the channel does not exist.
    pub async fn attach(
        &self,
        id: &ChannelId,
        client: PeerAddr,
    ) -> Result<Option<Settings>, BrokerError> {
        let Some(channel) = self.lookup(id).await? else {
            return Ok(None);
        };
        let mut channel = channel.lock().await;
        info!(channel = %id, client = %client, "Attaching client");
        channel.attach(client);
        Ok(Some(channel.settings().clone()))
    }

    /// Pop the next message for `caller` on channel `id`.
    ///
    /// The outer `Option` is `None` for an unknown channel; the inner one is
    /// `None` when nothing is queued for `caller` or `caller` is not a party.
    pub async fn receive(
        &self,
        id: &ChannelId,
        caller: &PeerAddr,
    ) -> Result<Option<Option<Bytes>>, BrokerError> {
        let Some(channel) = self.lookup(id).await? else {
            return Ok(None);
        };
        let message = channel.lock().await.receive(caller);
        if let Some(ref payload) = message {
            debug!(channel = %id, peer = %caller, bytes = payload.len(), "Delivered message");
        }
        Ok(Some(message))
    }

    /// Queue `payload` from `caller` for the opposite party on channel `id`.
    ///
    /// Returns `Ok(None)` for an unknown channel and `Ok(Some(false))` when
    /// `caller` is neither the host nor the current client.
    pub async fn send(
        &self,
        id: &ChannelId,
        caller: &PeerAddr,
        payload: Bytes,
    ) -> Result<Option<bool>, BrokerError> {
        let Some(channel) = self.lookup(id).await? else {
            return Ok(None);
        };
        let len = payload.len();
        let accepted = channel.lock().await.send(caller, payload);
        debug!(channel = %id, peer = %caller, bytes = len, accepted, "Queued message");
        Ok(Some(accepted))
    }

    /// Remove channel `id`. Deleting an absent id is a no-op.
    pub async fn delete(&self, id: &ChannelId) -> Result<(), BrokerError> {
        info!(channel = %id, "Deleting channel");
        self.store.delete(id).await
    }

    /// Every stored channel, in store order.
    pub async fn list_all(&self) -> Result<Vec<(ChannelId, SharedChannel)>, BrokerError> {
        let keys = self.store.keys().await?;
        let mut channels = Vec::with_capacity(keys.len());
        for id in keys {
            // Entries deleted between keys() and get() are skipped.
            if let Some(channel) = self.store.get(&id).await? {
                channels.push((id, channel));
            }
        }
        Ok(channels)
    }

    /// Diagnostic summaries of every stored channel.
    pub async fn summaries(&self) -> Result<Vec<ChannelSummary>, BrokerError> {
        let mut summaries = Vec::new();
        for (id, channel) in self.list_all().await? {
            let channel = channel.lock().await;
            let (pending_host, pending_client) = channel.pending();
            summaries.push(ChannelSummary {
                id,
                created_at: channel.created_at(),
                attached: channel.client().is_some(),
                pending_host,
                pending_client,
            });
        }
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_folds_id_into_settings() {
        let broker = Broker::in_memory();
        let channel = broker
            .create_channel(PeerAddr::from("10.0.0.1"), Settings::with_port(8080))
            .await
            .unwrap();
        let channel = channel.lock().await;

        assert_eq!(channel.settings().channel(), Some(channel.id().as_str()));
        assert_eq!(channel.settings().port(), Some(&json!(8080)));
        assert_eq!(channel.client(), None);
    }

    #[tokio::test]
    async fn test_operations_on_unknown_channel() {
        let broker = Broker::in_memory();
        let id = ChannelId::from("nope");
        let peer = PeerAddr::from("10.0.0.1");

        assert!(broker.lookup(&id).await.unwrap().is_none());
        assert_eq!(broker.attach(&id, peer.clone()).await.unwrap(), None);
        assert_eq!(broker.receive(&id, &peer).await.unwrap(), None);
        assert_eq!(
            broker.send(&id, &peer, Bytes::from_static(b"x")).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_summaries_report_attachment_and_backlog() {
        let broker = Broker::in_memory();
        let host = PeerAddr::from("10.0.0.1");
        let channel = broker
            .create_channel(host.clone(), Settings::with_port(1))
            .await
            .unwrap();
        let id = channel.lock().await.id().clone();

        broker.send(&id, &host, Bytes::from_static(b"queued")).await.unwrap();
        let summaries = broker.summaries().await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].id, id);
        assert!(!summaries[0].attached);
        assert_eq!((summaries[0].pending_host, summaries[0].pending_client), (0, 1));

        broker.attach(&id, PeerAddr::from("10.0.0.2")).await.unwrap();
        assert!(broker.summaries().await.unwrap()[0].attached);
    }

    #[tokio::test]
    async fn test_clones_share_registry() {
        let broker = Broker::in_memory();
        let other = broker.clone();
        broker
            .create_channel(PeerAddr::from("10.0.0.1"), Settings::new())
            .await
            .unwrap();
        assert_eq!(other.list_all().await.unwrap().len(), 1);
    }
}
