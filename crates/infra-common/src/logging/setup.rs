use crate::errors::{Error, Result};
use serde::Deserialize;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

/// Configuration for the logging system
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base log level (`trace`, `debug`, `info`, `warn`, `error`)
    pub level: String,
    /// Extra `EnvFilter` directives, e.g. `"peercall_core=debug"`
    pub directives: Vec<String>,
    /// Whether to enable JSON formatting
    pub json: bool,
    /// Whether to include file and line information
    pub file_info: bool,
    /// Whether to log span open/close events
    pub log_spans: bool,
    /// Application name used in the welcome line
    pub app_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            directives: Vec::new(),
            json: false,
            file_info: false,
            log_spans: false,
            app_name: "peercall".to_string(),
        }
    }
}

impl LoggingConfig {
    /// Create a new logging configuration
    pub fn new(level: Level, app_name: impl Into<String>) -> Self {
        LoggingConfig {
            level: level.to_string().to_lowercase(),
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Enable JSON formatting
    pub fn with_json(mut self) -> Self {
        self.json = true;
        self
    }

    /// Enable file and line information in logs
    pub fn with_file_info(mut self) -> Self {
        self.file_info = true;
        self
    }

    /// Enable span logging
    pub fn with_spans(mut self) -> Self {
        self.log_spans = true;
        self
    }

    /// Add an `EnvFilter` directive
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    fn env_filter(&self) -> Result<EnvFilter> {
        let level = parse_log_level(&self.level)?;
        let mut filter = EnvFilter::from_default_env().add_directive(level.into());
        for directive in &self.directives {
            let parsed = directive
                .parse()
                .map_err(|e| Error::config(format!("Invalid log directive '{}': {}", directive, e)))?;
            filter = filter.add_directive(parsed);
        }
        Ok(filter)
    }
}

/// Set up the global tracing subscriber with the provided configuration
///
/// Fails with [`Error::LoggingInit`] if a subscriber is already installed,
/// which callers that may run twice (tests, embedded use) can ignore.
pub fn setup_logging(config: &LoggingConfig) -> Result<()> {
    let filter = config.env_filter()?;

    let span_events = if config.log_spans {
        FmtSpan::ACTIVE
    } else {
        FmtSpan::NONE
    };

    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_span_events(span_events)
        .with_file(config.file_info)
        .with_line_number(config.file_info);

    let installed = if config.json {
        builder.with_writer(std::io::stdout).json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| Error::LoggingInit(e.to_string()))
}

/// Parse a log level from a string
pub fn parse_log_level(level: &str) -> Result<Level> {
    Level::from_str(level.trim()).map_err(|_| Error::config(format!("Invalid log level: {}", level)))
}

/// Log a welcome message with version info
pub fn log_welcome(app_name: &str, version: &str) {
    tracing::info!("Starting {} v{}", app_name, version);
}
