//! TOML configuration loading
//!
//! Every configuration struct in the workspace derives `Deserialize` with
//! `#[serde(default)]`, so a missing file section falls back to defaults and
//! an empty file is a valid configuration.

use crate::errors::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the configuration file when no path is given
pub const CONFIG_ENV_VAR: &str = "PEERCALL_CONFIG";

/// `$PEERCALL_CONFIG`, if set to something non-blank
pub fn env_config_path() -> Option<PathBuf> {
    std::env::var(CONFIG_ENV_VAR)
        .ok()
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
}

/// Parse a configuration from a TOML string
pub fn load_config_str<T: DeserializeOwned>(contents: &str) -> Result<T> {
    Ok(toml::from_str(contents)?)
}

/// Load a configuration file
///
/// Resolution order:
/// 1. `path` if given
/// 2. `$PEERCALL_CONFIG` if set
/// 3. `T::default()` when neither is available
///
/// An explicitly requested file that does not exist is an error; silently
/// running with defaults would hide a typo in the path.
pub fn load_config<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let resolved = path.map(Path::to_path_buf).or_else(|| {
        let env_path = env_config_path();
        if env_path.is_some() {
            debug!("Using configuration path from {}", CONFIG_ENV_VAR);
        }
        env_path
    });

    let Some(path) = resolved else {
        debug!("No configuration file given, using defaults");
        return Ok(T::default());
    };

    let contents = std::fs::read_to_string(&path).map_err(|source| Error::Io {
        path: path.clone(),
        source,
    })?;
    let config = load_config_str(&contents)?;
    info!("Loaded configuration from {}", path.display());
    Ok(config)
}
