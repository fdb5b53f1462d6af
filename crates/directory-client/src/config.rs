//! Directory client configuration

use crate::error::{DirectoryError, DirectoryResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// API root, e.g. `https://directory.example.com/api`
    pub base_url: String,
    /// Token sent as `x-auth-token`
    pub token: String,
    pub request_timeout_secs: u64,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5000/api".to_string(),
            token: String::new(),
            request_timeout_secs: 10,
        }
    }
}

impl DirectoryConfig {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token: token.into(),
            ..Default::default()
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn validate(&self) -> DirectoryResult<()> {
        let url = Url::parse(&self.base_url)
            .map_err(|e| DirectoryError::Configuration(format!("base_url '{}': {}", self.base_url, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(DirectoryError::Configuration(format!(
                "base_url must be http or https, got '{}'",
                url.scheme()
            )));
        }
        if self.token.trim().is_empty() {
            return Err(DirectoryError::invalid_token("no token configured"));
        }
        if self.request_timeout_secs == 0 {
            return Err(DirectoryError::Configuration(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// `base_url` joined with `path`, tolerating a trailing slash on either side
    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
