//! Periodic redeploy check

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::deploy::container::DeployContainer;

/// Shortest interval the alarm accepts
pub const MIN_ALARM_INTERVAL: Duration = Duration::from_secs(5);

/// Alarm worker options
#[derive(Debug, Clone)]
pub struct Options {
    /// Interval between two alarm rounds
    pub interval: Duration,
}

impl Options {
    /// Configured interval, raised to [`MIN_ALARM_INTERVAL`]
    pub fn effective_interval(&self) -> Duration {
        self.interval.max(MIN_ALARM_INTERVAL)
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
        }
    }
}

/// Run the alarm worker until the shutdown signal fires
pub async fn run<S, F>(
    options: &Options,
    container: Arc<DeployContainer>,
    sleep_fn: S,
    mut shutdown_signal: Pin<Box<dyn Future<Output = ()> + Send>>,
) where
    S: Fn(Duration) -> F,
    F: Future<Output = ()>,
{
    let interval = options.effective_interval();
    info!(interval = ?interval, "Alarm worker starting...");

    loop {
        tokio::select! {
            _ = &mut shutdown_signal => {
                info!("Alarm worker shutting down...");
                return;
            }
            _ = sleep_fn(interval) => {}
        }

        fire(container.clone()).await;
    }
}

/// One alarm round on its own task; a panic is logged and swallowed
pub async fn fire(container: Arc<DeployContainer>) {
    debug!("alarm round");
    let handle = tokio::spawn(async move {
        container.alarm().await;
    });
    if let Err(e) = handle.await {
        if e.is_panic() {
            error!("alarm round panicked: {}", e);
        } else {
            error!("alarm round cancelled: {}", e);
        }
    }
}
