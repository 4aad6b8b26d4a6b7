//! Logging utilities

/// Initialize the process-wide tracing subscriber: env-filter with an
/// `info` default, JSON output.
pub fn init_logger() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().expect("static directive")),
        )
        .json()
        .init();
}

/// Same subscriber, but safe to call from multiple tests; the first
/// caller wins.
pub fn init_test_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
