use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initializes the global `tracing` subscriber for the process. `level` is used as the default
/// filter directive when the `RUST_LOG` environment variable is not set.
pub fn init(level: impl AsRef<str>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_ref().to_string()));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("install global tracing subscriber: {e}"))
}
