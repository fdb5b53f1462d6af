//! Common infrastructure for the PeerCall workspace
//!
//! Provides the pieces every binary and integration test needs but that do
//! not belong to the call signaling core:
//!
//! - [`logging`]: `tracing-subscriber` setup driven by [`logging::LoggingConfig`]
//! - [`config`]: TOML configuration loading, with an environment fallback for the path
//! - [`errors`]: the infrastructure error type

pub mod config;
pub mod errors;
pub mod logging;

pub use config::{env_config_path, load_config, load_config_str, CONFIG_ENV_VAR};
pub use errors::{Error, Result};
pub use logging::{log_welcome, parse_log_level, setup_logging, LoggingConfig};
