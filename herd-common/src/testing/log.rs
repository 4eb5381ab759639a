//! Test logging.
//!
//! `init_test_logging()` sends tracing output to the test writer so it only
//! shows for failing tests.

use tracing_subscriber::EnvFilter;

const DEFAULT_TEST_FILTER: &str = "herdd=debug,herd_common=debug,test=info";

/// Install a test-writer subscriber. Later calls are no-ops.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_TEST_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(filter)
        .try_init();
}
