//! Bootstrap utilities for warren binaries.
//!
//! Shared initialization code for the producer, consumer and monitor.

use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "WARREN_LOG";

/// Initialize tracing with the WARREN_LOG environment variable.
///
/// Defaults to "info" level if WARREN_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Stop flag shared between the signal listener and a processing loop.
///
/// The receiver observes `true` once a stop was requested.
pub fn stop_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Request a stop on the first Ctrl+C.
///
/// Returns the receiver half to hand to the loop that should unwind.
pub fn stop_on_ctrl_c(label: &str) -> watch::Receiver<bool> {
    let (tx, rx) = stop_channel();
    let label = label.to_string();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(component = %label, "Ctrl+C received, stopping");
            let _ = tx.send(true);
        }
    });
    rx
}
