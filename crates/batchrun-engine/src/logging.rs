use tracing_subscriber::EnvFilter;

/// Initialize structured logging for a job process.
///
/// `RUST_LOG` takes precedence when set; otherwise `default_level`
/// applies (e.g. `"info"` or `"batchrun_engine=debug"`).
pub fn init(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();
}

/// Like [`init`] but tolerates an already-installed subscriber.
/// Intended for tests, where multiple cases share one process.
pub fn try_init(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}
