//! HTTP client for the broker's wire surface.

use bytes::Bytes;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, info};

use rendezvous_core::Settings;

use crate::TunnelError;

/// Header the broker prefers over the connection's peer address.
pub const CLIENT_IP_HEADER: &str = "Client-IP";

/// Entry point to a broker at a base URL.
#[derive(Debug, Clone)]
pub struct BrokerClient {
    http: reqwest::Client,
    base_url: String,
    identity: Option<String>,
}

impl BrokerClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            identity: None,
        }
    }

    /// Present `addr` as our identity via the `Client-IP` header instead of
    /// letting the broker use the connection's address.
    pub fn with_identity(mut self, addr: impl Into<String>) -> Self {
        self.identity = Some(addr.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.http.request(method, url);
        match self.identity {
            Some(ref identity) => builder.header(CLIENT_IP_HEADER, identity),
            None => builder,
        }
    }

    /// Register a new channel as its host.
    pub async fn create(&self, port: impl Into<Value>) -> Result<ChannelHandle, TunnelError> {
        let body = json!({ "port": port.into() });
        let response = self
            .request(Method::POST, &format!("{}/", self.base_url))
            .json(&body)
            .send()
            .await?;
        let handle = self.handle_from(response).await?;
        info!(channel = %handle.id(), "Created channel");
        Ok(handle)
    }

    /// Attach to an existing channel as its client.
    pub async fn attach(&self, channel: &str) -> Result<ChannelHandle, TunnelError> {
        let body = json!({ "channel": channel });
        let response = self
            .request(Method::POST, &format!("{}/", self.base_url))
            .json(&body)
            .send()
            .await?;
        let handle = self.handle_from(response).await?;
        info!(channel = %handle.id(), "Attached to channel");
        Ok(handle)
    }

    /// Diagnostic channel listing, one `id timestamp` pair per line.
    pub async fn list(&self) -> Result<String, TunnelError> {
        let response = self
            .request(Method::OPTIONS, &format!("{}/", self.base_url))
            .send()
            .await?;
        Ok(check_status(response).await?.text().await?)
    }

    async fn handle_from(&self, response: Response) -> Result<ChannelHandle, TunnelError> {
        let settings: Settings = check_status(response).await?.json().await?;
        let id = settings
            .channel()
            .ok_or(TunnelError::MissingField("channel"))?
            .to_string();
        Ok(ChannelHandle {
            client: self.clone(),
            url: format!("{}/{}", self.base_url, id),
            id,
            settings,
        })
    }
}

/// A channel we created or attached to.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    client: BrokerClient,
    id: String,
    url: String,
    settings: Settings,
}

impl ChannelHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The host's port parameter, accepting both numbers and numeric strings.
    pub fn port(&self) -> Option<u16> {
        match self.settings.port()? {
            Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Post `payload` for the other party.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<(), TunnelError> {
        let payload: Bytes = payload.into();
        let len = payload.len();
        let response = self
            .client
            .request(Method::PUT, &self.url)
            .body(payload)
            .send()
            .await?;
        check_status(response).await?;
        debug!(channel = %self.id, bytes = len, "Sent to broker");
        Ok(())
    }

    /// Poll once for a message addressed to us.
    pub async fn receive(&self) -> Result<Option<Bytes>, TunnelError> {
        let response = self.client.request(Method::GET, &self.url).send().await?;
        let body = check_status(response).await?.bytes().await?;
        if body.is_empty() {
            return Ok(None);
        }
        debug!(channel = %self.id, bytes = body.len(), "Received from broker");
        Ok(Some(body))
    }

    /// Delete the channel on the broker.
    pub async fn close(&self) -> Result<(), TunnelError> {
        let response = self.client.request(Method::DELETE, &self.url).send().await?;
        check_status(response).await?;
        info!(channel = %self.id, "Closed channel");
        Ok(())
    }
}

async fn check_status(response: Response) -> Result<Response, TunnelError> {
    let status = response.status();
    if status == StatusCode::OK {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TunnelError::Status {
        status: status.as_u16(),
        body,
    })
}
