//! Tracing subscriber initialization.
//!
//! JSON lines on stdout, filtered by `RUST_LOG` (default `info`). Ledger
//! services emit `info` for committed economic events, `debug` for
//! compare-and-swap retries, and `warn` for publication failures.

use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "info";

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with_default_filter(DEFAULT_FILTER);
}

pub fn init_with_default_filter(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .with_current_span(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_a_no_op() {
        init();
        init_with_default_filter("debug");
        ::tracing::info!(account_id = "test", "still logging after re-init");
    }
}
