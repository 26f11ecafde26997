//! Identity, identifier, settings and error types shared by the channel and broker.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Settings key holding the channel identifier.
pub const SETTINGS_CHANNEL_KEY: &str = "channel";

/// Settings key holding the application parameter chosen by the host.
pub const SETTINGS_PORT_KEY: &str = "port";

/// Errors surfaced by the broker.
///
/// Unknown channels and unrecognized callers are not errors; they show up as
/// `None` or `false` from the broker operations. Only the backing store can
/// fail a request.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The channel store could not serve the request.
    #[error("Channel store unavailable: {0}")]
    StoreUnavailable(String),
}

/// Observed network address of a caller.
///
/// This is a capability token, not a credential: whoever presents the same
/// address string is treated as the same party. Comparison is exact string
/// equality with no normalization, so `::ffff:10.0.0.1` and `10.0.0.1` are
/// different peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerAddr(String);

impl PeerAddr {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerAddr {
    fn from(addr: &str) -> Self {
        Self::new(addr)
    }
}

impl From<String> for PeerAddr {
    fn from(addr: String) -> Self {
        Self(addr)
    }
}

/// External handle of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    /// Wrap an identifier received from a caller.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random identifier.
    ///
    /// Formatted as a hyphenated UUID v4: 122 random bits, version nibble
    /// `0100`, variant bits `10`.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Opaque application metadata attached to a channel at creation.
///
/// The broker only ever writes the `channel` key; everything else is echoed
/// back to both parties untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(Map<String, Value>);

impl Settings {
    /// Create empty settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Settings carrying the host's application parameter.
    pub fn with_port(port: impl Into<Value>) -> Self {
        let mut settings = Self::new();
        settings.insert(SETTINGS_PORT_KEY, port.into());
        settings
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// The channel identifier folded in by the broker, if any.
    pub fn channel(&self) -> Option<&str> {
        self.get(SETTINGS_CHANNEL_KEY).and_then(Value::as_str)
    }

    pub(crate) fn set_channel(&mut self, id: &ChannelId) {
        self.insert(SETTINGS_CHANNEL_KEY, Value::String(id.as_str().to_string()));
    }

    /// The application parameter chosen by the host.
    pub fn port(&self) -> Option<&Value> {
        self.get(SETTINGS_PORT_KEY)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl From<Map<String, Value>> for Settings {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
