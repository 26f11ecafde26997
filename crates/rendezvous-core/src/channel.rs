//! A single rendezvous channel between one host and at most one client.
//!
//! Queues are named for their reader: whatever the host sends lands in the
//! client queue and whatever the client sends lands in the host queue.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tracing::debug;

use crate::types::{ChannelId, PeerAddr, Settings};

/// Rendezvous unit pairing a host identity with the most recent client.
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    host: PeerAddr,
    client: Option<PeerAddr>,
    settings: Settings,
    /// Read by the host, written by the client.
    host_queue: VecDeque<Bytes>,
    /// Read by the client, written by the host.
    client_queue: VecDeque<Bytes>,
    created_at: DateTime<Utc>,
}

impl Channel {
    /// Create a channel owned by `host` with empty queues and no client.
    pub fn new(id: ChannelId, host: PeerAddr, settings: Settings) -> Self {
        Self {
            id,
            host,
            client: None,
            settings,
            host_queue: VecDeque::new(),
            client_queue: VecDeque::new(),
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> &ChannelId {
        &self.id
    }

    pub fn host(&self) -> &PeerAddr {
        &self.host
    }

    pub fn client(&self) -> Option<&PeerAddr> {
        self.client.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Replace the settings. No broker operation calls this.
    pub fn set_settings(&mut self, settings: Settings) {
        self.settings = settings;
    }

    /// Bind `client` as the channel's client.
    ///
    /// Always overwrites the previous client. Any peer that knows the channel
    /// id can take over the client role this way; the displaced peer simply
    /// stops receiving.
    pub fn attach(&mut self, client: PeerAddr) {
        if let Some(previous) = self.client.as_ref().filter(|c| **c != client) {
            debug!(
                channel = %self.id,
                previous = %previous,
                client = %client,
                "Replacing channel client"
            );
        }
        self.client = Some(client);
    }

    /// Pop the next message addressed to `caller`.
    ///
    /// Returns `None` both when nothing is queued and when `caller` is
    /// neither party.
    pub fn receive(&mut self, caller: &PeerAddr) -> Option<Bytes> {
        if *caller == self.host && !self.host_queue.is_empty() {
            return self.host_queue.pop_front();
        }
        if self.client.as_ref() == Some(caller) && !self.client_queue.is_empty() {
            return self.client_queue.pop_front();
        }
        None
    }

    /// Queue `payload` for the party opposite `caller`.
    ///
    /// Returns `false` without touching either queue when `caller` is
    /// neither the host nor the current client.
    pub fn send(&mut self, caller: &PeerAddr, payload: Bytes) -> bool {
        if *caller == self.host {
            self.client_queue.push_back(payload);
            true
        } else if self.client.as_ref() == Some(caller) {
            self.host_queue.push_back(payload);
            true
        } else {
            false
        }
    }

    /// Number of messages waiting for the host and for the client.
    pub fn pending(&self) -> (usize, usize) {
        (self.host_queue.len(), self.client_queue.len())
    }
}
