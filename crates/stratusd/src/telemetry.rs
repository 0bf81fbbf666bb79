//! Logging initialization for the Stratus daemon.
//!
//! Plain `tracing-subscriber` with the `fmt` layer: human-readable logs to
//! stdout, filtered by `RUST_LOG` when set, otherwise by `[log] level`.

use tracing_subscriber::EnvFilter;

use crate::config::LogSection;

/// The filter in effect: `RUST_LOG` wins over the configured level.
fn filter(config: &LogSection) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Initialize the global subscriber.
///
/// Call this once at startup, before any `tracing` events are emitted.
/// A second call is a no-op.
pub fn init(config: &LogSection) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(config))
        .with_target(true)
        .try_init();
}
