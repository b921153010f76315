use shard_core::{Result, ShardError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool) -> Result<()> {
    let filter = if verbose {
        "shard_kernel=debug,shard_route=debug,shard_rewrite=debug,shard_executor=debug,shard_merge=debug"
    } else {
        "shard_kernel=info,shard_executor=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| ShardError::ConfigurationError(format!("tracing already initialized: {}", e)))
}
