//! `peercall.toml`

use anyhow::{Context, Result};
use peercall_core::{CallConfig, RelayConfig};
use peercall_directory::DirectoryConfig;
use peercall_infra::LoggingConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub relay: RelayConfig,
    pub call: CallConfig,
    pub directory: DirectoryConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load from `path`, else `$PEERCALL_CONFIG`, else the per-user default file if it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = resolve_path(path, peercall_infra::env_config_path(), default_path());
        peercall_infra::load_config(path.as_deref()).context("loading configuration")
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        if let Some(token) = token {
            self.directory.token = token;
        }
        self
    }
}

fn resolve_path(explicit: Option<&Path>, from_env: Option<PathBuf>, per_user: Option<PathBuf>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or(from_env)
        .or_else(|| per_user.filter(|p| p.exists()))
}

/// `~/.config/peercall/peercall.toml` (or the platform equivalent)
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("peercall").join("peercall.toml"))
}
