//! Telemetry and Observability
//!
//! Sets up `tracing-subscriber` for structured logging. The log level comes
//! from config, `RUST_LOG` overrides it, and the output format is pretty in
//! debug builds and JSON in release builds.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber at `log_level`.
///
/// Priority: `RUST_LOG` env var > `log_level` parameter > default "info".
/// Calling it twice is harmless; the second call is ignored.
pub fn init_telemetry_with_level(log_level: &str) {
    let default_filter = format!(
        "{level},plexus_engine={level},plexus_registry={level}",
        level = log_level
    );

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok();
    }
}

/// Install the global subscriber at "info" unless `RUST_LOG` says otherwise.
pub fn init_telemetry() {
    init_telemetry_with_level("info");
}
