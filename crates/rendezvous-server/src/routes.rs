//! HTTP verb dispatch onto the broker.
//!
//! | verb      | path      | effect                                           |
//! |-----------|-----------|--------------------------------------------------|
//! | `POST`    | any       | `{"channel": id}` attaches, `{"port": v}` creates |
//! | `GET`     | `/{id}`   | pop the next message for the caller              |
//! | `PUT`     | `/{id}`   | queue the body for the other party               |
//! | `DELETE`  | `/{id}`   | drop the channel                                 |
//! | `OPTIONS` | any       | list channels with creation time                 |
//! | other     |           | 405                                              |

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::header::{CONTENT_TYPE, SERVER};
use axum::http::{HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use chrono::SecondsFormat;
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use rendezvous_config::ServerConfig;
use rendezvous_core::{Broker, BrokerError, ChannelId, ChannelStore, PeerAddr, Settings};

use crate::identity::{CallerAddr, MISSING_CALLER};
use crate::ServerError;

/// Store failure surfaced as a 500.
#[derive(Debug)]
pub struct ApiError(BrokerError);

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(error = %self.0, "Request failed");
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}

type ApiResult = Result<Response, ApiError>;

/// Build the broker router.
pub fn router<S>(broker: Broker<S>, config: &ServerConfig) -> Result<Router, ServerError>
where
    S: ChannelStore + 'static,
{
    let mut app = Router::new()
        .fallback(dispatch::<S>)
        .with_state(broker)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(DefaultBodyLimit::max(config.max_body_bytes)),
        );

    if let Some(ref server) = config.server_header {
        let value = HeaderValue::from_str(server)
            .map_err(|_| ServerError::InvalidHeader(server.clone()))?;
        app = app.layer(SetResponseHeaderLayer::overriding(SERVER, value));
    }

    Ok(app)
}

async fn dispatch<S>(
    State(broker): State<Broker<S>>,
    method: Method,
    uri: Uri,
    caller: Option<CallerAddr>,
    body: Bytes,
) -> Response
where
    S: ChannelStore + 'static,
{
    let id = channel_id_from_path(uri.path());
    let result = match (method, caller) {
        (Method::DELETE, _) => handle_delete(&broker, id).await,
        (Method::OPTIONS, _) => handle_options(&broker).await,
        (Method::GET | Method::POST | Method::PUT, None) => {
            warn!("Request without any caller address");
            Ok(MISSING_CALLER.into_response())
        }
        (Method::GET, Some(CallerAddr(caller))) => handle_get(&broker, id, &caller).await,
        (Method::POST, Some(CallerAddr(caller))) => handle_post(&broker, caller, &body).await,
        (Method::PUT, Some(CallerAddr(caller))) => handle_put(&broker, id, &caller, body).await,
        _ => Ok(StatusCode::METHOD_NOT_ALLOWED.into_response()),
    };
    result.unwrap_or_else(IntoResponse::into_response)
}

/// Channel id is the whole path after the leading slash, trimmed.
pub fn channel_id_from_path(path: &str) -> Option<ChannelId> {
    let id = path.strip_prefix('/').unwrap_or(path).trim();
    (!id.is_empty()).then(|| ChannelId::from(id))
}

async fn handle_get<S: ChannelStore>(
    broker: &Broker<S>,
    id: Option<ChannelId>,
    caller: &PeerAddr,
) -> ApiResult {
    let Some(id) = id else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    Ok(match broker.receive(&id, caller).await? {
        Some(Some(message)) => (
            StatusCode::OK,
            [(CONTENT_TYPE, "application/octet-stream")],
            message,
        )
            .into_response(),
        Some(None) => StatusCode::OK.into_response(),
        None => {
            debug!(channel = %id, "Receive on unknown channel");
            StatusCode::NOT_FOUND.into_response()
        }
    })
}

async fn handle_post<S: ChannelStore>(
    broker: &Broker<S>,
    caller: PeerAddr,
    body: &[u8],
) -> ApiResult {
    let Ok(Value::Object(request)) = serde_json::from_slice::<Value>(body) else {
        return Ok(bad_request());
    };

    match request.get("channel") {
        Some(channel) if !channel.is_null() => {
            let Some(id) = channel.as_str() else {
                return Ok(bad_request());
            };
            Ok(match broker.attach(&ChannelId::from(id), caller).await? {
                Some(settings) => Json(settings).into_response(),
                None => (StatusCode::NOT_FOUND, "Channel not found").into_response(),
            })
        }
        _ => match request.get("port") {
            Some(port) if !is_unset_port(port) => {
                let channel = broker
                    .create_channel(caller, Settings::with_port(port.clone()))
                    .await?;
                let settings = channel.lock().await.settings().clone();
                Ok(Json(settings).into_response())
            }
            _ => Ok(bad_request()),
        },
    }
}

/// `null`, `-1` and `"-1"` all mean the host did not pick a port.
fn is_unset_port(port: &Value) -> bool {
    match port {
        Value::Null => true,
        Value::Number(n) => n.as_i64() == Some(-1) || n.as_f64() == Some(-1.0),
        Value::String(s) => s.trim() == "-1",
        _ => false,
    }
}

fn bad_request() -> Response {
    (StatusCode::BAD_REQUEST, "Invalid request").into_response()
}

async fn handle_put<S: ChannelStore>(
    broker: &Broker<S>,
    id: Option<ChannelId>,
    caller: &PeerAddr,
    body: Bytes,
) -> ApiResult {
    let Some(id) = id else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    // Rejected senders still get 200.
    Ok(match broker.send(&id, caller, body).await? {
        Some(_) => StatusCode::OK.into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    })
}

async fn handle_delete<S: ChannelStore>(broker: &Broker<S>, id: Option<ChannelId>) -> ApiResult {
    if let Some(id) = id {
        broker.delete(&id).await?;
    }
    Ok(StatusCode::OK.into_response())
}

async fn handle_options<S: ChannelStore>(broker: &Broker<S>) -> ApiResult {
    let mut summaries = broker.summaries().await?;
    summaries.sort_by_key(|s| s.created_at);

    let listing: String = summaries
        .iter()
        .map(|s| {
            format!(
                "{} {}\r\n",
                s.id,
                s.created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            )
        })
        .collect();

    Ok((StatusCode::OK, [(CONTENT_TYPE, "text/plain; charset=utf-8")], listing).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_id_from_path() {
        assert_eq!(channel_id_from_path("/abc"), Some(ChannelId::from("abc")));
        assert_eq!(channel_id_from_path("/ abc "), Some(ChannelId::from("abc")));
        assert_eq!(channel_id_from_path("/"), None);
        assert_eq!(channel_id_from_path(""), None);
        assert_eq!(channel_id_from_path("/a/b"), Some(ChannelId::from("a/b")));
    }

    #[test]
    fn test_unset_port_values() {
        assert!(is_unset_port(&json!(null)));
        assert!(is_unset_port(&json!(-1)));
        assert!(is_unset_port(&json!(-1.0)));
        assert!(is_unset_port(&json!("-1")));
        assert!(!is_unset_port(&json!(0)));
        assert!(!is_unset_port(&json!(8080)));
        assert!(!is_unset_port(&json!("22")));
    }
}
