//! karbos-telemetry — tracing and metrics initialization shared by the API and
//! worker process roles.
//!
//! Grounded on `aegis-proxy/src/main.rs`'s `tracing_subscriber::registry()` setup and
//! `aegis-proxy/src/metrics.rs`'s `names` module / `init_metrics()` / `record_*` shape.

pub mod metrics;

use tracing::Level;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the process-wide tracing subscriber: a `fmt` layer plus an `EnvFilter`
/// defaulting to `info`, overridable via `RUST_LOG`. Call once per binary's `main`.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();
}
