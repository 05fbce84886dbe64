//! Structured logging infrastructure for ZK GPS.
//!
//! Log level can be configured via the `RUST_LOG` environment variable
//! and defaults to `info`. Logs go to stderr; stdout is left to command output.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

const DEFAULT_FILTER: &str = "info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Initialize the global subscriber in the requested output format.
///
/// Returns `false` when a subscriber was already installed (for example by a
/// test harness), in which case the existing one is kept.
///
/// # Example
/// ```no_run
/// use zkgps_core::{logging, LogFormat};
///
/// logging::init(LogFormat::Json);
/// tracing::info!(service = "zkgps-admin", "Service started");
/// ```
pub fn init(format: LogFormat) -> bool {
    let registry = tracing_subscriber::registry().with(env_filter());

    let result = match format {
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_ids(true),
            )
            .try_init(),
    };

    result.is_ok()
}
