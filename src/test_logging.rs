//! Test logging support for in-crate unit tests.
//!
//! Tests route their diagnostics through `tracing` so that a failing
//! concurrency test leaves a timeline behind. [`init_test_logging`]
//! installs a subscriber once per process, respecting `RUST_LOG`.
//! Integration tests under `tests/` carry their own copy in
//! `tests/common/mod.rs`.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Installs the test tracing subscriber. Idempotent; safe to call from
/// every test.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Marks the start of a named test phase.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = $name, "test phase");
    };
}

/// Marks a test as complete.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = $name, "test complete");
    };
}

/// Asserts a condition, logging the expected and actual values either way.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $what:expr, $expected:expr, $actual:expr) => {
        if $cond {
            tracing::trace!(what = $what, expected = ?$expected, actual = ?$actual, "check passed");
        } else {
            tracing::error!(what = $what, expected = ?$expected, actual = ?$actual, "check FAILED");
            panic!(
                "assertion failed: {} (expected {:?}, got {:?})",
                $what, $expected, $actual
            );
        }
    };
}
