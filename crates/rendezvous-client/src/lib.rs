//! Client side of the rendezvous broker.
//!
//! - [`BrokerClient`] / [`ChannelHandle`]: create, attach, send, receive and
//!   close over the broker's HTTP surface
//! - [`TunnelHost`] / [`TunnelClient`]: forward TCP connections between two
//!   machines that can only make outbound HTTP requests

pub mod connection;
pub mod envelope;
pub mod tunnel;

use thiserror::Error;

pub use connection::{BrokerClient, ChannelHandle};
pub use envelope::Envelope;
pub use tunnel::{TunnelClient, TunnelHost};

/// Errors raised by the broker client and the tunnel endpoints.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Broker answered {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Broker response missing field: {0}")]
    MissingField(&'static str),

    #[error("Malformed envelope: {0}")]
    Envelope(#[from] serde_json::Error),

    #[error("Malformed envelope payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    /// True when the broker does not know the channel.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TunnelError::Status { status: 404, .. })
    }
}
