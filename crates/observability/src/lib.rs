//! Process-wide tracing setup shared by services, tests, and benchmarks.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Like `init()`, with an explicit default filter used when `RUST_LOG` is unset.
pub fn init_with_default_filter(default_filter: &str) {
    tracing::init_with_default_filter(default_filter);
}

/// Subscriber construction (filters, formatting).
pub mod tracing;
