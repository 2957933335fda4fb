pub mod utils;

use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::http;
use crate::{Config, ServiceState};

const FINAL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const MIN_PURGE_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to install signal handlers: {0}")]
    Signals(#[from] std::io::Error),
    #[error("failed to set up relay state: {0}")]
    State(#[from] crate::StateSetupError),
    #[error("relay did not shut down within {0:?}")]
    ShutdownTimeout(Duration),
}

/// Handle for gracefully shutting down the relay.
pub struct ShutdownHandle {
    graceful_waiter: tokio::task::JoinHandle<()>,
    handles: Vec<tokio::task::JoinHandle<()>>,
    shutdown_tx: watch::Sender<()>,
}

impl ShutdownHandle {
    /// Block until the relay shuts down (via signal or explicit shutdown).
    pub async fn wait(self) -> Result<(), ProcessError> {
        let _ = self.graceful_waiter.await;

        if timeout(FINAL_SHUTDOWN_TIMEOUT, join_all(self.handles))
            .await
            .is_err()
        {
            tracing::error!(
                "failed to shut down within {} seconds",
                FINAL_SHUTDOWN_TIMEOUT.as_secs()
            );
            return Err(ProcessError::ShutdownTimeout(FINAL_SHUTDOWN_TIMEOUT));
        }
        Ok(())
    }

    /// Trigger shutdown programmatically.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Initialize logging, panic handler, and build info reporting.
/// The returned guard must be kept alive for the duration of the program.
pub fn init_logging(config: &Config) -> tracing_appender::non_blocking::WorkerGuard {
    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let env_filter = EnvFilter::builder()
        .with_default_directive(config.log_level.into())
        .from_env_lossy();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(stdout_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry().with(stdout_layer).init();

    utils::register_panic_logger();
    utils::report_build_info();

    stdout_guard
}

/// Create state and spawn the API server and session purger.
pub async fn start_service(config: &Config) -> Result<(ServiceState, ShutdownHandle), ProcessError> {
    let (graceful_waiter, shutdown_tx, shutdown_rx) = utils::graceful_shutdown_blocker()?;
    let state = ServiceState::from_config(config).await?;

    let mut handles = Vec::new();

    let api_state = state.clone();
    let api_config = http::Config::new(config.listen_addr, config.log_level);
    let api_rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        if let Err(e) = http::run_api(api_config, api_state, api_rx).await {
            tracing::error!("API server error: {}", e);
        }
    }));

    let purge_state = state.clone();
    let purge_interval = config.purge_interval;
    let purge_rx = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        purge_sessions(purge_state, purge_interval, purge_rx).await;
    }));

    tracing::info!(addr = %config.listen_addr, "relay running");

    let handle = ShutdownHandle {
        graceful_waiter,
        handles,
        shutdown_tx,
    };
    Ok((state, handle))
}

/// Runs the relay until a shutdown signal arrives.
pub async fn spawn_service(config: &Config) -> Result<(), ProcessError> {
    let _guard = init_logging(config);
    let (_, handle) = start_service(config).await?;
    handle.wait().await
}

/// Physically drop expired sessions on an interval. Reads never depend on
/// this running.
async fn purge_sessions(
    state: ServiceState,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval.max(MIN_PURGE_INTERVAL));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match state.sessions().purge_expired().await {
                    Ok(0) => {}
                    Ok(purged) => tracing::debug!(purged, "purged expired sessions"),
                    Err(e) => tracing::warn!(error = %e, "session purge failed"),
                }
            }
            _ = shutdown_rx.changed() => {
                tracing::debug!("session purger stopping");
                break;
            }
        }
    }
}
