//! Process-level helpers for hosts embedding the relay.

use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use crate::agent::AttendanceRelay;

/// Initializes the tracing subscriber for structured logging.
///
/// ## Log Levels
/// - `RUST_LOG=debug` - Show debug messages
/// - `RUST_LOG=punchrelay_sync=trace` - Trace the engine only
/// - Default: INFO, with DEBUG for punchrelay crates
///
/// Safe to call more than once; later calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,punchrelay=debug,sqlx=warn"));

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_max_level(Level::TRACE)
        .try_init();

    if result.is_err() {
        warn!("Tracing subscriber already initialized");
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, stopping relay...");
}

/// Starts the relay, waits for a shutdown signal, then tears it down.
pub async fn run_until_shutdown(relay: &AttendanceRelay) {
    relay.start().await;
    shutdown_signal().await;
    relay.shutdown().await;
    info!("Relay shutdown complete");
}
