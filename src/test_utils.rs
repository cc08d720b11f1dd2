//! Test logging helpers shared by unit and integration tests.

use std::sync::Once;

static INIT: Once = Once::new();

/// Installs a formatted `tracing` subscriber for test output.
///
/// Safe to call from every test; only the first call installs. Verbosity
/// is controlled with `RUST_LOG` (default `info`).
pub fn init_test_logging() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Marks the start of a test phase in the log.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        $crate::tracing::info!(target: "asyncport::test", phase = $name, "test phase");
    };
}

/// Marks a test as complete in the log.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        $crate::tracing::info!(target: "asyncport::test", test = $name, "test complete");
    };
}

/// Asserts a condition, logging the expectation and the observed value.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $what:expr, $expected:expr, $actual:expr) => {
        if $cond {
            $crate::tracing::debug!(target: "asyncport::test", check = $what, "ok");
        } else {
            $crate::tracing::error!(
                target: "asyncport::test",
                check = $what,
                expected = ?$expected,
                actual = ?$actual,
                "assertion failed"
            );
            panic!(
                "assertion failed: {}: expected {:?}, got {:?}",
                $what, $expected, $actual
            );
        }
    };
}
