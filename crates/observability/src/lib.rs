//! Tracing and logging setup shared by binaries and tests.

/// Initialize process-wide tracing with the default `info` filter.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init("info");
}

/// Tracing configuration (filters, formatters).
pub mod tracing;

pub use self::tracing::{init_for_tests, init_with_filter};
