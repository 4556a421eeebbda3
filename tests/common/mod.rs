//! Shared test helpers

use std::sync::Once;

use classbridge::{Config, Host};
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Send logs to the test output, filtered by RUST_LOG
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| "classbridge=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

/// Host with default limits and logging enabled
pub fn host() -> Host {
    init_tracing();
    Host::new(Config::default()).expect("Failed to create host")
}
