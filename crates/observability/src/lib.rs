//! Tracing and logging (shared setup).

/// Initialize process-wide tracing/logging with the default configuration.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use tracing::{LogConfig, init_with};
