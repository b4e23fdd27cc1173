use tracing_subscriber::EnvFilter;

/// Install the stderr subscriber. `NUTRISENSE_LOG` wins over `RUST_LOG`;
/// `default_level` applies when neither is set or parses.
pub fn init_tracing(default_level: &str) {
    let filter = std::env::var("NUTRISENSE_LOG")
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact()
        .try_init();
}
