//! Rendezvous broker core.
//!
//! A host registers a channel, a client attaches to it by id, and both sides
//! poll for messages addressed to them. Parties are told apart only by their
//! observed network address.
//!
//! # Architecture
//!
//! - `Channel`: host/client identities plus two FIFO queues named for their reader
//! - `ChannelStore`: keyed storage with per-channel locking (`MemoryStore` by default)
//! - `Broker`: registry that creates, resolves, routes and deletes channels
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use rendezvous_core::{Broker, PeerAddr, Settings};
//!
//! # async fn example() -> Result<(), rendezvous_core::BrokerError> {
//! let broker = Broker::in_memory();
//! let host = PeerAddr::from("10.0.0.1");
//! let client = PeerAddr::from("10.0.0.2");
//!
//! let channel = broker.create_channel(host.clone(), Settings::with_port(22)).await?;
//! let id = channel.lock().await.id().clone();
//!
//! broker.attach(&id, client.clone()).await?;
//! broker.send(&id, &host, Bytes::from_static(b"hello")).await?;
//! assert_eq!(
//!     broker.receive(&id, &client).await?,
//!     Some(Some(Bytes::from_static(b"hello")))
//! );
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod channel;
pub mod store;
pub mod types;

pub use broker::{Broker, ChannelSummary};
pub use channel::Channel;
pub use store::{ChannelStore, MemoryStore, SharedChannel};
pub use types::{
    BrokerError, ChannelId, PeerAddr, Settings, SETTINGS_CHANNEL_KEY, SETTINGS_PORT_KEY,
};
