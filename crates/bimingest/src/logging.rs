//! Process-wide log setup: a `tracing` registry with an env filter and a
//! plain or JSON formatter, plus a bridge for `log` records.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::config::{LogFormat, LoggingConfig};

const DEFAULT_FILTER: &str = "info";

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {source}")]
    Filter {
        filter: String,
        #[source]
        source: tracing_subscriber::filter::ParseError,
    },

    #[error("A global subscriber is already installed: {0}")]
    Subscriber(#[from] tracing::subscriber::SetGlobalDefaultError),

    #[error("Failed to bridge log records: {0}")]
    LogBridge(#[from] tracing_log::log_tracer::SetLoggerError),
}

/// Filter directive in effect: `RUST_LOG`, then the configured filter,
/// then `info`.
pub fn filter_directive(config: &LoggingConfig) -> String {
    std::env::var(EnvFilter::DEFAULT_ENV)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| config.filter.clone())
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Installs the global subscriber. Call once, early in `main`.
pub fn init(config: &LoggingConfig) -> Result<(), LoggingError> {
    let directive = filter_directive(config);
    let filter = EnvFilter::try_new(&directive).map_err(|source| LoggingError::Filter {
        filter: directive.clone(),
        source,
    })?;

    let fmt_layer = match config.format {
        LogFormat::Plain => fmt::layer().with_target(true).boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
    };

    let subscriber = Registry::default().with(fmt_layer).with(filter);
    tracing::subscriber::set_global_default(subscriber)?;
    tracing_log::LogTracer::init()?;

    tracing::debug!(filter = %directive, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_filter_falls_back_to_config_then_default() {
        std::env::remove_var(EnvFilter::DEFAULT_ENV);

        let mut config = LoggingConfig::default();
        assert_eq!(filter_directive(&config), "info");

        config.filter = Some("bimingest=debug".to_string());
        assert_eq!(filter_directive(&config), "bimingest=debug");
    }

    #[test]
    #[serial]
    fn test_env_overrides_config() {
        std::env::set_var(EnvFilter::DEFAULT_ENV, "warn");
        let config = LoggingConfig {
            format: LogFormat::Json,
            filter: Some("debug".to_string()),
        };
        assert_eq!(filter_directive(&config), "warn");
        std::env::remove_var(EnvFilter::DEFAULT_ENV);
    }
}
