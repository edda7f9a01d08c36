//! Logging System
//!
//! Structured logging built on the `tracing` crate. All log lines go to
//! stderr so the run summary on stdout stays readable when the pipeline
//! runs under CI redirection.

use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: json, text (default: text)
    #[serde(default = "default_format")]
    pub format: String,

    /// Enable colored output (text format only)
    #[serde(default = "default_true")]
    pub color: bool,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_format(),
            color: default_true(),
        }
    }
}

/// Initialize the logging system.
///
/// Priority order (highest to lowest):
/// 1. `HYDRATE_LOG` environment variable (full filter syntax)
/// 2. The provided configuration (driven by CLI flags)
/// 3. Defaults (`warn`, text format)
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), String> {
    let filter = build_env_filter(config)?;
    let format = determine_format(config)?;

    let use_color = config.map(|c| c.color).unwrap_or(true) && std::io::stderr().is_terminal();

    let base_subscriber = Registry::default().with(filter);

    if format == "json" {
        base_subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| format!("failed to initialize logging: {}", e))?;
    } else {
        base_subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(use_color)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| format!("failed to initialize logging: {}", e))?;
    }

    Ok(())
}

/// Build environment filter from config or the `HYDRATE_LOG` variable
fn build_env_filter(config: Option<&LoggingConfig>) -> Result<EnvFilter, String> {
    if let Ok(filter) = EnvFilter::try_from_env("HYDRATE_LOG") {
        return Ok(filter);
    }

    let level = config.map(|c| c.level.as_str()).unwrap_or("warn");
    EnvFilter::try_new(level).map_err(|e| format!("invalid log level '{}': {}", level, e))
}

/// Determine output format from config or environment
fn determine_format(config: Option<&LoggingConfig>) -> Result<String, String> {
    if let Ok(format) = std::env::var("HYDRATE_LOG_FORMAT") {
        if format == "json" || format == "text" {
            return Ok(format);
        }
    }

    let format = config.map(|c| c.format.as_str()).unwrap_or("text");
    if format != "json" && format != "text" {
        return Err(format!(
            "invalid log format: {} (must be 'json' or 'text')",
            format
        ));
    }

    Ok(format.to_string())
}
