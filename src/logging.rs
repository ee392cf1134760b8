//! Tracing subscriber setup shared by both binaries.

use tracing_subscriber::EnvFilter;

const DEFAULT_LEVEL: &str = "info";

/// Filter from `RUST_LOG`, else `LOG_LEVEL`, else `info`.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LEVEL.to_string());
        EnvFilter::try_new(level.to_lowercase()).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LEVEL))
    })
}

/// Install the global subscriber. Logs go to stderr so stdout stays for output.
pub fn init() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .ok(); // Ignore error if already initialized
}
