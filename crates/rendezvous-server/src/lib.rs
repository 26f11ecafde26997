//! HTTP surface of the rendezvous broker.
//!
//! The broker is built once at startup and handed to the router as state;
//! every request is a short, non-blocking call against it. Callers are told
//! apart by their observed address (see [`identity`]).

pub mod identity;
pub mod routes;
pub mod sweeper;

use std::future::Future;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::info;

use rendezvous_config::Config;
use rendezvous_core::{Broker, ChannelStore};

pub use identity::{caller_addr, CallerAddr};
pub use routes::router;
pub use sweeper::{spawn_sweeper, sweep_expired};

/// Errors that stop the HTTP server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid Server header value: {0}")]
    InvalidHeader(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bind the configured address and serve until `shutdown` resolves.
///
/// Starts the expiry sweep alongside the server when
/// `maintenance.channel_max_age_secs` is set.
pub async fn run<S, F>(config: &Config, broker: Broker<S>, shutdown: F) -> Result<(), ServerError>
where
    S: ChannelStore + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let addr = config.server.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    let sweeper = config.maintenance.channel_max_age().map(|max_age| {
        spawn_sweeper(broker.clone(), max_age, config.maintenance.sweep_interval())
    });

    let result = serve(listener, broker, config, shutdown).await;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    result
}

/// Serve the broker on an already bound listener.
pub async fn serve<S, F>(
    listener: TcpListener,
    broker: Broker<S>,
    config: &Config,
    shutdown: F,
) -> Result<(), ServerError>
where
    S: ChannelStore + 'static,
    F: Future<Output = ()> + Send + 'static,
{
    let app = router(broker, &config.server)?;
    info!(addr = %listener.local_addr()?, "Rendezvous broker listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;

    info!("Rendezvous broker stopped");
    Ok(())
}
