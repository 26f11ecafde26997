//! Optional expiry sweep.
//!
//! Channels never expire inside the broker. When an operator configures a
//! maximum age, this task periodically deletes older channels, going through
//! nothing but `Broker::list_all` and `Broker::delete`.

use chrono::Utc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use rendezvous_core::{Broker, BrokerError, ChannelStore};

/// Delete every channel created more than `max_age` ago.
///
/// Returns the number of channels deleted.
pub async fn sweep_expired<S: ChannelStore>(
    broker: &Broker<S>,
    max_age: Duration,
) -> Result<usize, BrokerError> {
    let Ok(max_age) = chrono::Duration::from_std(max_age) else {
        return Ok(0);
    };
    let now = Utc::now();

    let mut expired = Vec::new();
    for (id, channel) in broker.list_all().await? {
        let created_at = channel.lock().await.created_at();
        if now - created_at > max_age {
            expired.push(id);
        }
    }

    for id in &expired {
        debug!(channel = %id, "Channel expired");
        broker.delete(id).await?;
    }
    Ok(expired.len())
}

/// Run [`sweep_expired`] every `interval` until the task is aborted.
pub fn spawn_sweeper<S>(broker: Broker<S>, max_age: Duration, interval: Duration) -> JoinHandle<()>
where
    S: ChannelStore + 'static,
{
    info!(
        max_age_secs = max_age.as_secs(),
        interval_secs = interval.as_secs(),
        "Starting channel expiry sweep"
    );
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match sweep_expired(&broker, max_age).await {
                Ok(0) => {}
                Ok(count) => info!(count, "Expired channels removed"),
                Err(e) => warn!(error = %e, "Channel expiry sweep failed"),
            }
        }
    })
}
