//! Startup helpers for docseq binaries.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Install the global subscriber, filtered by `DOCSEQ_LOG` (default "info").
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Backoff while waiting for the counter store to accept connections.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max retries: 30
/// - Jitter enabled
pub fn connection_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Run `connect` until it succeeds or `backoff` gives up.
///
/// `target` only names the store in logs. The last error is returned once
/// retries are exhausted.
pub async fn connect_with_retry<T, E, F, Fut>(
    target: &str,
    backoff: ExponentialBuilder,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let connected = connect
        .retry(backoff)
        .notify(|err: &E, delay: Duration| {
            warn!(target = %target, error = %err, delay = ?delay, "Store not reachable, retrying");
        })
        .await;

    match &connected {
        Ok(_) => info!(target = %target, "Connected"),
        Err(e) => error!(target = %target, error = %e, "Giving up on store connection"),
    }
    connected
}
