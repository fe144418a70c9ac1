//! Subscriber setup for the `tracing` events the library emits.
//!
//! `RUST_LOG` takes precedence over the configured level when set.

use crate::domain::error::{PriceVaultError, ValidationError};
use crate::ports::config_port::ConfigPort;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Multi-line, human readable.
    #[default]
    Pretty,
    Compact,
    /// One JSON object per event.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogFormat::Pretty => "pretty",
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        })
    }
}

impl FromStr for LogFormat {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(ValidationError::new(
                "format",
                format!("unknown log format '{other}' (expected pretty, compact or json)"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

impl LogConfig {
    /// Reads the `[logging]` section. The level must parse as a filter
    /// directive.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, PriceVaultError> {
        let level = config
            .get_string("logging", "level")
            .unwrap_or_else(|| "info".to_string());
        EnvFilter::try_new(&level).map_err(|e| PriceVaultError::ConfigInvalid {
            section: "logging".into(),
            key: "level".into(),
            reason: e.to_string(),
        })?;

        let format = match config.get_string("logging", "format") {
            Some(s) => s.parse().map_err(|e: ValidationError| PriceVaultError::ConfigInvalid {
                section: "logging".into(),
                key: "format".into(),
                reason: e.reason,
            })?,
            None => LogFormat::default(),
        };

        Ok(Self { level, format })
    }

    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.level = level.into();
        self
    }
}

/// Installs the global subscriber writing to stderr.
///
/// # Errors
///
/// Fails when a global subscriber is already installed.
pub fn init_logging(config: &LogConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    match config.format {
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    }
}

/// Installs the subscriber unless one is already in place. Returns `true`
/// when this call installed it.
pub fn ensure_logging(config: &LogConfig) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    match init_logging(config) {
        Ok(()) => Ok(true),
        Err(e) if tracing::dispatcher::has_been_set() => {
            debug!(error = %e, "subscriber already installed, keeping it");
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    #[test]
    fn format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" compact ".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn defaults_without_section() {
        let config = LogConfig::from_config(&FileConfigAdapter::empty()).unwrap();
        assert_eq!(config, LogConfig::default());
    }

    #[test]
    fn reads_logging_section() {
        let adapter =
            FileConfigAdapter::from_string("[logging]\nlevel = pricevault=debug\nformat = json\n")
                .unwrap();
        let config = LogConfig::from_config(&adapter).unwrap();
        assert_eq!(config.level, "pricevault=debug");
        assert_eq!(config.format, LogFormat::Json);
    }

    #[test]
    fn bad_format_is_config_invalid() {
        let adapter = FileConfigAdapter::from_string("[logging]\nformat = xml\n").unwrap();
        match LogConfig::from_config(&adapter) {
            Err(PriceVaultError::ConfigInvalid { section, key, .. }) => {
                assert_eq!(section, "logging");
                assert_eq!(key, "format");
            }
            other => panic!("expected ConfigInvalid, got {other:?}"),
        }
    }

    #[test]
    fn second_init_fails() {
        let config = LogConfig::default().with_level("off");
        let _ = init_logging(&config);
        assert!(init_logging(&config).is_err());
    }

    #[test]
    fn ensure_keeps_an_installed_subscriber() {
        let config = LogConfig::default().with_level("off");
        ensure_logging(&config).unwrap();
        assert!(!ensure_logging(&config).unwrap());
    }
}
