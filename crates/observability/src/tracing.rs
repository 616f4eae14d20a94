//! Tracing/logging initialization.
//!
//! JSON lines on stdout for services; compact human-readable output captured
//! by the test harness for tests. `RUST_LOG` always wins over the configured
//! filter.

use tracing_subscriber::EnvFilter;

fn filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| configured(default_directive))
}

fn configured(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Initialize JSON tracing with `default_directive` as the filter when
/// `RUST_LOG` is not set. An unparsable directive falls back to `info`.
pub(crate) fn init(default_directive: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(default_directive))
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

/// Same as [`crate::init`] with a configured filter (e.g. `InventorySettings::log_filter`).
pub fn init_with_filter(default_directive: &str) {
    init(default_directive);
}

/// Compact output routed through the test writer so it only shows for failing tests.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter("warn"))
        .with_test_writer()
        .compact()
        .try_init();
}
