//! Logging setup for the binding
//!
//! The runtime emits `tracing` events:
//! - `trace` for every foreign call
//! - `debug` for model and reader lifecycle transitions
//! - `info` when a library is loaded or a budget source is opened
//! - `warn` when the engine reports a non-zero status
//!
//! Installing a subscriber is left to the application; `init_logging` is a
//! convenience for binaries and tests.

use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Single-line human-readable output
    #[default]
    Compact,
    /// Multi-line human-readable output
    Pretty,
    /// One JSON object per event
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format '{}'", other)),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum level when `RUST_LOG` is not set
    pub level: Level,
    pub format: LogFormat,
    /// Extra filter directives, e.g. `iwfm_runtime::ffi=trace`
    pub filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            format: LogFormat::Compact,
            filter: None,
        }
    }
}

impl LogConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Lower the level by one step per `-v`, never raising it
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        let requested = match verbosity {
            0 => return self,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        };
        // tracing orders levels by verbosity: TRACE > DEBUG > ... > ERROR
        if requested > self.level {
            self.level = requested;
        }
        self
    }

    /// Build from the `[logging]` table of a configuration file
    ///
    /// Unknown level or format names fall back to the defaults.
    pub fn from_settings(settings: &iwfm_config::LoggingConfig) -> Self {
        let defaults = Self::default();
        Self {
            level: settings
                .level
                .as_deref()
                .and_then(|l| l.parse().ok())
                .unwrap_or(defaults.level),
            format: settings
                .format
                .as_deref()
                .and_then(|f| f.parse().ok())
                .unwrap_or(defaults.format),
            filter: settings.filter.clone(),
        }
    }
}

fn build_filter(config: &LogConfig) -> EnvFilter {
    let base = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));

    match &config.filter {
        Some(directives) => directives
            .split(',')
            .filter(|d| !d.trim().is_empty())
            .fold(base, |filter, directive| match directive.trim().parse() {
                Ok(d) => filter.add_directive(d),
                Err(_) => filter,
            }),
        None => base,
    }
}

/// Install a global fmt subscriber
///
/// Returns false when a subscriber was already installed; calling this more
/// than once is harmless.
pub fn init_logging(config: &LogConfig) -> bool {
    let filter = build_filter(config);
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);

    let result = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.is_ok()
}
