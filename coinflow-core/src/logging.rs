//! Logging infrastructure for the transaction engine
//!
//! The engine logs through the `log` facade. This module installs an
//! `env_logger` backend once per process and provides categorized helpers
//! that attach structured parameters to pipeline events.
//!
//! Transaction ids, addresses and scripts are shortened before they are
//! logged. Private keys and secrets are never passed to these helpers.
//!
//! # Usage
//!
//! ```
//! use coinflow_core::logging::{self, LogConfig, LogLevel};
//! use serde_json::json;
//!
//! logging::init(&LogConfig::default()).expect("Failed to initialize logging");
//!
//! logging::log_transaction(
//!     LogLevel::Info,
//!     "funded transaction",
//!     Some(json!({ "inputs": 2, "outputs": 2 })),
//! );
//! ```

use chrono::Local;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write as IoWrite;
use std::sync::Once;

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Categories attached to structured log events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogContext {
    /// Funding, fee estimation, signing, verification
    Transaction,
    /// Chain client and fee oracle traffic
    Network,
    /// Broadcast and confirmation polling
    Submission,
    /// Configuration loading
    Config,
}

/// Configuration for the logging system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default log level
    #[serde(default = "default_level")]
    pub level: LogLevel,
    /// Path to log file (None for console-only)
    #[serde(default)]
    pub log_file: Option<String>,
    /// Whether to include timestamps in log messages
    #[serde(default = "default_true")]
    pub include_timestamps: bool,
    /// Whether to include source location in log messages
    #[serde(default)]
    pub include_source_location: bool,
    /// Whether to use JSON lines instead of the human-readable format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            log_file: None,
            include_timestamps: true,
            include_source_location: false,
            json_format: false,
        }
    }
}

fn default_level() -> LogLevel {
    LogLevel::Info
}

fn default_true() -> bool {
    true
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Trace => LevelFilter::Trace,
        }
    }
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => log::Level::Error,
            LogLevel::Warn => log::Level::Warn,
            LogLevel::Info => log::Level::Info,
            LogLevel::Debug => log::Level::Debug,
            LogLevel::Trace => log::Level::Trace,
        }
    }
}

static LOGGING_INIT: Once = Once::new();

/// Initialize the logging system with the given configuration
///
/// Only the first call installs a logger. Later calls return Ok without
/// touching the installed one, so tests may call this freely. A logger
/// installed by someone else (for example a test harness) is kept.
pub fn init(config: &LogConfig) -> Result<(), String> {
    let mut result = Ok(());
    let config = config.clone();

    LOGGING_INIT.call_once(|| {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(config.level.into());

        let include_timestamps = config.include_timestamps;
        let include_source_location = config.include_source_location;
        let json_format = config.json_format;

        builder.format(move |buf, record| {
            let timestamp = if include_timestamps {
                Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string()
            } else {
                String::new()
            };

            let location = if include_source_location {
                format!(
                    " [{}:{}]",
                    record.file().unwrap_or("unknown"),
                    record.line().unwrap_or(0)
                )
            } else {
                String::new()
            };

            if json_format {
                let line = json!({
                    "timestamp": timestamp,
                    "level": record.level().to_string(),
                    "target": record.target(),
                    "location": location.trim(),
                    "message": record.args().to_string(),
                });
                writeln!(buf, "{}", line)
            } else {
                if include_timestamps {
                    write!(buf, "{} ", timestamp)?;
                }
                writeln!(buf, "[{}{}] {}", record.level(), location, record.args())
            }
        });

        if let Some(path) = &config.log_file {
            match OpenOptions::new().create(true).append(true).open(path) {
                Ok(file) => {
                    builder.target(env_logger::Target::Pipe(Box::new(file)));
                }
                Err(e) => {
                    result = Err(format!("Failed to open log file {}: {}", path, e));
                    return;
                }
            }
        }

        if builder.try_init().is_err() {
            log::debug!("Logger already installed, keeping existing instance");
        }
    });

    result
}

/// Update the log level dynamically
pub fn set_log_level(level: LogLevel) {
    log::set_max_level(level.into());
}

/// Shorten an identifier (txid, address, script hex) for logging
///
/// Keeps the first and last four characters. Very short values are masked.
pub fn sanitize_for_logging(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = input.chars().collect();
    if chars.len() <= 8 {
        return "*****".to_string();
    }
    let first: String = chars[..4].iter().collect();
    let last: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", first, last)
}

/// Build a parameter object, shortening the values of the named keys
///
/// Numbers and the remaining keys are kept verbatim.
pub fn log_params(params: Vec<(&str, serde_json::Value)>, sensitive: &[&str]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (name, value) in params {
        let value = match (&value, sensitive.contains(&name)) {
            (serde_json::Value::String(s), true) => json!(sanitize_for_logging(s)),
            _ => value,
        };
        map.insert(name.to_string(), value);
    }
    serde_json::Value::Object(map)
}

fn log_event(level: LogLevel, context: LogContext, message: &str, params: Option<serde_json::Value>) {
    match params {
        Some(params) => log::log!(level.into(), "[{:?}] {} {}", context, message, params),
        None => log::log!(level.into(), "[{:?}] {}", context, message),
    }
}

/// Log a funding, estimation, signing or verification event
pub fn log_transaction(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_event(level, LogContext::Transaction, message, params);
}

/// Log a chain client or fee oracle event
pub fn log_network(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_event(level, LogContext::Network, message, params);
}

/// Log a broadcast or polling event
pub fn log_submission(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_event(level, LogContext::Submission, message, params);
}

/// Log a configuration event
pub fn log_config(level: LogLevel, message: &str, params: Option<serde_json::Value>) {
    log_event(level, LogContext::Config, message, params);
}
