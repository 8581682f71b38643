//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once per process
//! - Resolve the log filter from `RUST_LOG`, falling back to the configured level

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Filter used when `RUST_LOG` is unset: the configured level for this crate,
/// `tower_http` at debug so admin requests show up.
pub fn default_filter(config: &ObservabilityConfig) -> String {
    format!(
        "stream_gateway={level},tower_http=debug,warn",
        level = config.log_level
    )
}

/// Install the global subscriber. Subsequent calls are ignored.
pub fn init(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_filter_uses_configured_level() {
        let config = ObservabilityConfig {
            log_level: "trace".into(),
            ..ObservabilityConfig::default()
        };
        assert!(default_filter(&config).starts_with("stream_gateway=trace"));
    }

    #[test]
    fn init_twice_is_harmless() {
        let config = ObservabilityConfig::default();
        init(&config);
        init(&config);
    }
}
