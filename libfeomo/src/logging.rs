//! Logging setup for hosts embedding the Feomo data layer
//!
//! The crate itself only emits `tracing` events. Host applications (the web
//! shell, the mobile shell, test harnesses) call into this module once at boot
//! to install a subscriber.
//!
//! ```no_run
//! use libfeomo::logging::{LogFormat, LoggingConfig};
//!
//! LoggingConfig::new(LogFormat::Json, "libfeomo=debug".to_string(), false)
//!     .try_init()
//!     .ok();
//! ```

use std::str::FromStr;

use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Plain single-line output
    Text,
    /// One JSON object per line
    Json,
    /// Multi-line output with colors
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!(
                "Unknown log format '{}'. Expected one of: text, json, pretty",
                other
            )),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        };
        f.write_str(name)
    }
}

pub struct LoggingConfig {
    pub format: LogFormat,
    /// Filter directive used when `RUST_LOG` is not set
    pub level: String,
    /// Forces `debug` as the fallback directive
    pub verbose: bool,
}

impl LoggingConfig {
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    fn filter(&self) -> EnvFilter {
        let fallback = if self.verbose { "debug" } else { self.level.as_str() };
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback))
    }

    /// Install the global subscriber.
    ///
    /// Unlike a binary, an embedded library can't assume it is the first to
    /// configure logging, so a second installation is reported as an error
    /// rather than a panic.
    pub fn try_init(&self) -> Result<(), String> {
        let filter = self.filter();

        let result = match self.format {
            LogFormat::Json => tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_current_span(true)
                .flatten_event(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_file(true)
                .with_line_number(true)
                .try_init(),
            LogFormat::Text => tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .try_init(),
        };

        result.map_err(|e| e.to_string())
    }
}

/// Install a subscriber from `FEOMO_LOG_FORMAT` and `FEOMO_LOG_LEVEL`,
/// defaulting to text output at `info`.
pub fn init_default() {
    let format = std::env::var("FEOMO_LOG_FORMAT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(LogFormat::Text);
    let level = std::env::var("FEOMO_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    if let Err(e) = LoggingConfig::new(format, level, false).try_init() {
        tracing::debug!(error = %e, "Logging subscriber already installed");
    }
}
