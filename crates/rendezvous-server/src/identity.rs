//! Caller identity as observed by the HTTP layer.
//!
//! Identity preference: `Client-IP` header, then `X-Forwarded-For` (taken
//! verbatim, including any proxy chain), then the TCP peer's IP address.
//! Nothing is normalized, and anything a caller can put in a header is
//! trusted.

use axum::async_trait;
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use std::net::{IpAddr, SocketAddr};

use rendezvous_core::PeerAddr;

pub const CLIENT_IP_HEADER: &str = "client-ip";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Response for a request whose caller cannot be identified.
pub const MISSING_CALLER: (StatusCode, &str) =
    (StatusCode::BAD_REQUEST, "Caller address unavailable");

/// Resolve the caller's address from headers, falling back to the peer IP.
pub fn caller_addr(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<PeerAddr> {
    [CLIENT_IP_HEADER, FORWARDED_FOR_HEADER]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok())
        .find(|value| !value.is_empty())
        .map(PeerAddr::from)
        .or_else(|| peer.map(|ip| PeerAddr::new(ip.to_string())))
}

/// Extractor yielding the caller's [`PeerAddr`]. Take it as
/// `Option<CallerAddr>` where identity is not required.
#[derive(Debug, Clone)]
pub struct CallerAddr(pub PeerAddr);

#[async_trait]
impl<S> FromRequestParts<S> for CallerAddr
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        caller_addr(&parts.headers, peer)
            .map(CallerAddr)
            .ok_or(MISSING_CALLER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<IpAddr> {
        Some("192.168.1.5".parse().unwrap())
    }

    #[test]
    fn test_client_ip_header_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_IP_HEADER, HeaderValue::from_static("10.0.0.1"));
        headers.insert(FORWARDED_FOR_HEADER, HeaderValue::from_static("10.0.0.2"));

        assert_eq!(caller_addr(&headers, peer()), Some(PeerAddr::from("10.0.0.1")));
    }

    #[test]
    fn test_forwarded_for_taken_verbatim() {
        let mut headers = HeaderMap::new();
        headers.insert(
            FORWARDED_FOR_HEADER,
            HeaderValue::from_static("10.0.0.2, 172.16.0.1"),
        );

        assert_eq!(
            caller_addr(&headers, peer()),
            Some(PeerAddr::from("10.0.0.2, 172.16.0.1"))
        );
    }

    #[test]
    fn test_empty_header_falls_through() {
        let mut headers = HeaderMap::new();
        headers.insert(CLIENT_IP_HEADER, HeaderValue::from_static(""));

        assert_eq!(caller_addr(&headers, peer()), Some(PeerAddr::from("192.168.1.5")));
    }

    #[test]
    fn test_peer_ip_has_no_port_and_no_normalization() {
        let mapped: IpAddr = "::ffff:10.0.0.1".parse().unwrap();
        assert_eq!(
            caller_addr(&HeaderMap::new(), Some(mapped)),
            Some(PeerAddr::from("::ffff:10.0.0.1"))
        );
    }

    #[test]
    fn test_no_source_yields_none() {
        assert_eq!(caller_addr(&HeaderMap::new(), None), None);
    }
}
