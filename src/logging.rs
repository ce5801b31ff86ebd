//! Tracing setup for binaries and long-running test harnesses.

/// Install the global subscriber. Level comes from `RUST_LOG`, defaulting
/// to `info`.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
