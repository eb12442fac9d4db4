//! Structured logging with JSON/pretty formats.
//!
//! JSON format for production environments, pretty format for development,
//! with `RUST_LOG`-style filtering. The configured level is the fallback
//! when no environment filter is set.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::ObservabilityConfig;

/// Initialize the global tracing subscriber.
///
/// Safe to call once per process; a second call returns an error from the
/// underlying subscriber registry, which callers may ignore in tests.
pub fn init_logging(config: &ObservabilityConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    if config.json_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .try_init()
            .map_err(|e| anyhow::anyhow!("failed to init logging: {e}"))?;
    }

    tracing::info!(
        level = %config.log_level,
        json = config.json_logging,
        "Logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logging_tolerates_double_init() {
        let config = ObservabilityConfig::default();
        // First call may or may not win the global registry depending on
        // test ordering; the second must error rather than panic
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }
}
