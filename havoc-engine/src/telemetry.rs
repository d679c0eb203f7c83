//! Logging setup.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogConfig;
use crate::error::EngineError;

/// Build the log filter: `RUST_LOG` wins, then the configured level.
pub fn filter(level: &str) -> Result<EnvFilter, EngineError> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| EngineError::Telemetry(format!("bad log filter {level:?}: {e}")))
}

/// Install the global subscriber. Call once, from the binary.
pub fn init(config: &LogConfig) -> Result<(), EngineError> {
    let filter = filter(&config.level)?;
    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().with_target(false)).try_init()
    };
    result.map_err(|e| EngineError::Telemetry(format!("failed to initialise tracing: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_level_is_accepted() {
        if std::env::var_os("RUST_LOG").is_none() {
            assert!(filter("debug").is_ok());
            assert!(filter("havoc_engine=trace,info").is_ok());
        }
    }

    #[test]
    fn second_init_fails_cleanly() {
        let config = LogConfig::default();
        let _ = init(&config);
        assert!(matches!(init(&config), Err(EngineError::Telemetry(_))));
    }
}
