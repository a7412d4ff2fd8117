//! Logging Module
//!
//! The crate only emits `tracing` events under the [`LOG_TARGET`] target. Applications
//! usually install their own subscriber; [`init_logging`] is a convenience for scripts
//! and notebooks that only want to see what the data module is doing, with everything
//! else (burn, image decoders) held at a separate level.

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

use super::error::{FundusError, Result};

/// Target every event of this crate is recorded under
pub const LOG_TARGET: &str = "fundus_datamodule";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Level for the data module's own events
    pub level: LogLevel,
    /// Level for every other target
    pub dependency_level: LogLevel,
    /// Include thread IDs (loader workers run on their own threads)
    pub include_thread_ids: bool,
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            dependency_level: LogLevel::Warn,
            include_thread_ids: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Split and cache decisions plus worker thread ids
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_thread_ids: true,
            ..Self::default()
        }
    }

    /// Errors only, from every target
    pub fn quiet() -> Self {
        Self {
            level: LogLevel::Error,
            dependency_level: LogLevel::Error,
            ..Self::default()
        }
    }

    /// Per-target filter: [`LOG_TARGET`] at `level`, everything else at `dependency_level`
    pub fn targets(&self) -> Targets {
        Targets::new()
            .with_target(LOG_TARGET, self.level.to_tracing_level())
            .with_default(self.dependency_level.to_tracing_level())
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Parse a level name (`FUNDUS_LOG=debug`), falling back to `Info`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        write!(f, "{}", name)
    }
}

/// Install a global subscriber filtered by [`LogConfig::targets`].
///
/// Fails when another global subscriber is already set.
pub fn init_logging(config: &LogConfig) -> Result<()> {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_thread_ids(config.include_thread_ids)
        .with_ansi(config.ansi_colors);

    tracing_subscriber::registry()
        .with(config.targets())
        .with(layer)
        .try_init()
        .map_err(|e| FundusError::Config(format!("failed to install log subscriber: {}", e)))
}

/// Debug output of this crate routed through the test harness capture.
///
/// Safe to call from every test; only the first call installs the subscriber.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    let config = LogConfig::verbose();
    let _ = tracing_subscriber::registry()
        .with(config.targets())
        .with(fmt::layer().compact().with_test_writer())
        .try_init();
}
