//! Process-wide tracing initialization.

use std::sync::Once;

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global subscriber: env-filtered fmt layer plus span
/// traces for error reports. Reads `MODFORGE_LOG` (default `info`).
/// Idempotent; later calls are no-ops.
pub fn init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("MODFORGE_LOG")
            .unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .with(ErrorLayer::default())
            .try_init();
    });
}
