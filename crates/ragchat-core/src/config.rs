//! Chat client configuration
//!
//! Defaults, then `config.toml`, then the `RAGCHAT_ENDPOINT` environment
//! variable. Command-line flags are applied last by the caller.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::error::ChatError;

/// Chat endpoint used when nothing else is configured
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8000/api/v1/llm-chat";

/// Environment variable overriding the endpoint
pub const ENDPOINT_ENV: &str = "RAGCHAT_ENDPOINT";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// URL the question is POSTed to
    pub endpoint: String,
    /// Cancel a session after this many seconds (None = no deadline)
    pub deadline_secs: Option<u64>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            deadline_secs: None,
        }
    }
}

impl ChatConfig {
    /// `<config dir>/ragchat/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("ragchat").join("config.toml"))
    }

    /// Load configuration from `path`, or from the default location.
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub async fn load(path: Option<&Path>) -> Result<Self, ChatError> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !required && !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| ChatError::Config(format!("failed to read {:?}: {}", path, e)))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| ChatError::Config(format!("failed to parse {:?}: {}", path, e)))?;

        info!("Loaded config from {:?}", path);
        config.validated()
    }

    /// Apply `RAGCHAT_ENDPOINT` if set
    pub fn with_env(self) -> Result<Self, ChatError> {
        self.with_endpoint_override(std::env::var(ENDPOINT_ENV).ok())
    }

    /// Replace the endpoint when `endpoint` is non-empty
    pub fn with_endpoint_override(mut self, endpoint: Option<String>) -> Result<Self, ChatError> {
        if let Some(endpoint) = endpoint.filter(|e| !e.trim().is_empty()) {
            self.endpoint = endpoint.trim().to_string();
        }
        self.validated()
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    fn validated(self) -> Result<Self, ChatError> {
        let url = url::Url::parse(&self.endpoint)
            .map_err(|e| ChatError::Config(format!("invalid endpoint {:?}: {}", self.endpoint, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ChatError::Config(format!(
                "endpoint must be http or https, got {:?}",
                url.scheme()
            )));
        }
        Ok(self)
    }
}
