use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_ENV_VAR: &str = "SUPPLYPLAN_LOG";
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Installs the global subscriber. `SUPPLYPLAN_LOG` wins over `log_level`;
/// output goes to stderr so stdout stays machine-readable.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing(log_level: &str) -> bool {
    tracing_subscriber::registry()
        .with(resolve_filter(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .try_init()
        .is_ok()
}

fn resolve_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
}
