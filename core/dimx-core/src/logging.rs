//! Subscriber setup for ETL programs and tests.
//!
//! The engine only emits `tracing` events (cache prefill, staging flushes,
//! version closes). Without the `logging` feature both functions do nothing.

#[cfg(feature = "logging")]
use tracing_subscriber::{EnvFilter, fmt};

/// Install a formatting subscriber filtered by `RUST_LOG`, falling back to
/// `dimx_core=info`. A second call is ignored.
///
/// ```rust
/// dimx_core::logging::init();
/// ```
#[cfg(feature = "logging")]
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dimx_core=info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .try_init();
}

/// Debug-level engine events routed through the test harness writer.
#[cfg(feature = "logging")]
pub fn init_test() {
    let _ = fmt()
        .with_env_filter(EnvFilter::new("dimx_core=debug"))
        .with_test_writer()
        .try_init();
}

#[cfg(not(feature = "logging"))]
pub fn init() {}

#[cfg(not(feature = "logging"))]
pub fn init_test() {}
