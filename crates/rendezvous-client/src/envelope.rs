//! Tunnel framing carried inside broker messages.
//!
//! Each broker message is one JSON envelope: `{"id": "<stream>", "data": "<base64>"}`.
//! An envelope without `data` is a marker: the first marker for a stream
//! opens it, the next one closes it.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::TunnelError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Envelope {
    /// Stream open/close marker.
    pub fn marker(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: None,
        }
    }

    pub fn data(id: impl Into<String>, payload: &[u8]) -> Self {
        Self {
            id: id.into(),
            data: Some(STANDARD.encode(payload)),
        }
    }

    pub fn is_marker(&self) -> bool {
        self.data.is_none()
    }

    /// Decoded payload, `None` for markers.
    pub fn payload(&self) -> Result<Option<Vec<u8>>, TunnelError> {
        self.data
            .as_deref()
            .map(|data| STANDARD.decode(data))
            .transpose()
            .map_err(TunnelError::from)
    }

    pub fn encode(&self) -> Result<Bytes, TunnelError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(raw: &[u8]) -> Result<Self, TunnelError> {
        Ok(serde_json::from_slice(raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_has_no_data_field() {
        let encoded = Envelope::marker("s1").encode().unwrap();
        assert_eq!(&encoded[..], br#"{"id":"s1"}"#);
        assert!(Envelope::decode(&encoded).unwrap().is_marker());
    }

    #[test]
    fn test_data_is_base64() {
        let envelope = Envelope::data("s1", b"\x00\xffhello");
        assert_eq!(envelope.data.as_deref(), Some("AP9oZWxsbw=="));
        assert_eq!(envelope.payload().unwrap(), Some(b"\x00\xffhello".to_vec()));
    }

    #[test]
    fn test_decode_accepts_spaced_json() {
        let envelope = Envelope::decode(br#"{"id": "140234", "data": "aGk="}"#).unwrap();
        assert_eq!(envelope.id, "140234");
        assert_eq!(envelope.payload().unwrap(), Some(b"hi".to_vec()));
    }

    #[test]
    fn test_bad_base64_is_an_error() {
        let envelope = Envelope::decode(br#"{"id": "x", "data": "***"}"#).unwrap();
        assert!(matches!(envelope.payload(), Err(TunnelError::Base64(_))));
    }

    #[test]
    fn test_non_envelope_is_an_error() {
        assert!(matches!(
            Envelope::decode(b"plain bytes"),
            Err(TunnelError::Envelope(_))
        ));
    }
}
