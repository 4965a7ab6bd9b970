use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Filter applied when `RUST_LOG` is unset; keeps sqlx statement logs quiet.
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Install the process-wide fmt subscriber. Every binary calls this once at startup.
pub fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("tracing subscriber already installed: {e}"))
}
