//! Configuration file support

use flexcms_stream::{CredentialProvider, Endpoints, EnvCredentials, StaticCredentials};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable holding the bearer token when the config has none
pub const TOKEN_ENV_VAR: &str = "FLEXCMS_API_TOKEN";

/// Configuration for flexcms-assist
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the CMS API
    pub base_url: Option<String>,
    /// Bearer token (alternative to FLEXCMS_API_TOKEN)
    pub api_token: Option<String>,
    /// Agent used when --agent is not given
    pub default_agent: Option<String>,
    /// Override for the task generation endpoint path
    pub task_path: Option<String>,
    /// Override for the instance generation endpoint path template
    pub instance_path: Option<String>,
    /// Cancel a generation after this many seconds without data
    pub idle_timeout_secs: Option<u64>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("flexcms")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for FLEXCMS_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("FLEXCMS_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Parse config from TOML text
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        let default_config = Config {
            base_url: Some("http://localhost:8000".to_string()),
            ..Default::default()
        };

        default_config.save()?;
        Ok(path)
    }

    /// Endpoint paths with config overrides applied
    pub fn endpoints(&self) -> Endpoints {
        let defaults = Endpoints::default();
        Endpoints {
            task_path: self.task_path.clone().unwrap_or(defaults.task_path),
            instance_path: self.instance_path.clone().unwrap_or(defaults.instance_path),
        }
    }

    /// Token source: the config file first, then the environment at request time
    pub fn credentials(&self) -> Arc<dyn CredentialProvider> {
        match self.api_token.as_deref().filter(|t| !t.is_empty()) {
            Some(token) => Arc::new(StaticCredentials::new(token)),
            None => Arc::new(EnvCredentials::new(TOKEN_ENV_VAR)),
        }
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# flexcms-assist configuration file
# Place at ~/.config/flexcms/config.toml (Linux/Mac) or %APPDATA%\flexcms\config.toml (Windows)

# Base URL of the CMS API
base_url = "http://localhost:8000"

# Agent (or agent config ID) used when --agent is not given
# default_agent = "content_writer"

# Cancel a generation when no data arrives for this many seconds.
# The stream protocol has no heartbeat, so a stalled connection is only
# detected this way. Leave unset to wait indefinitely.
# idle_timeout_secs = 120

# Endpoint overrides (defaults shown)
# task_path = "/api/agents/generate/stream"
# instance_path = "/api/content-instances/{instance_id}/generate"

# Bearer token (optional - FLEXCMS_API_TOKEN is read when this is unset)
# It's recommended to use the environment variable instead for security
# api_token = "..."
"#
}
