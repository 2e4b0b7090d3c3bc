use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::agent::http::{DEFAULT_BASE_URL, DEFAULT_REQUEST_TIMEOUT};
use crate::battle::{ArenaOptions, DEFAULT_ROUND_DELAY, DEFAULT_TASK_ID};
use crate::util::paths::config_path;

/// Example configuration file contents (bundled with the binary)
pub const EXAMPLE_CONFIG: &str = include_str!("config.toml.example");

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Battle backend API base URL
    pub base_url: String,
    /// Timeout for synchronous endpoint calls
    pub request_timeout: Duration,
    /// Task new battles are created for
    pub task_id: String,
    /// Pacing delay between rounds
    pub round_delay: Duration,
    pub server: ServerSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub cors_permissive: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlEndpointConfig {
    pub base_url: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlBattleConfig {
    pub task_id: Option<String>,
    pub round_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub cors_permissive: Option<bool>,
}

/// TOML representation of the config file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TomlConfig {
    pub endpoint: Option<TomlEndpointConfig>,
    pub battle: Option<TomlBattleConfig>,
    pub server: Option<TomlServerConfig>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            cors_permissive: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            task_id: DEFAULT_TASK_ID.to_string(),
            round_delay: DEFAULT_ROUND_DELAY,
            server: ServerSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from `~/.arena/config.toml`, merging with defaults.
    ///
    /// Writes the bundled example on first run.
    pub fn load() -> Result<Self, ConfigError> {
        let config_file = config_path();
        if !config_file.exists() {
            Self::create_default_config(&config_file);
        }
        Self::load_from(&config_file)
    }

    /// Load from `path`; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let toml_config: TomlConfig = toml::from_str(contents)?;
        let mut config = Config::default();
        config.merge(toml_config);
        Ok(config)
    }

    fn merge(&mut self, toml_config: TomlConfig) {
        if let Some(endpoint) = toml_config.endpoint {
            if let Some(base_url) = endpoint.base_url {
                self.base_url = base_url;
            }
            if let Some(secs) = endpoint.request_timeout_secs {
                self.request_timeout = Duration::from_secs(secs);
            }
        }

        if let Some(battle) = toml_config.battle {
            if let Some(task_id) = battle.task_id {
                self.task_id = task_id;
            }
            if let Some(ms) = battle.round_delay_ms {
                self.round_delay = Duration::from_millis(ms);
            }
        }

        if let Some(server) = toml_config.server {
            if let Some(host) = server.host {
                self.server.host = host;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(cors_permissive) = server.cors_permissive {
                self.server.cors_permissive = cors_permissive;
            }
        }
    }

    /// Create the default config file from the bundled example
    fn create_default_config(path: &Path) {
        if let Some(parent) = path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                tracing::warn!(error = %e, "Failed to create config directory");
                return;
            }
        }

        if let Err(e) = fs::write(path, EXAMPLE_CONFIG) {
            tracing::warn!(error = %e, "Failed to write default config");
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn with_round_delay(mut self, round_delay: Duration) -> Self {
        self.round_delay = round_delay;
        self
    }

    pub fn arena_options(&self) -> ArenaOptions {
        ArenaOptions {
            task_id: self.task_id.clone(),
            round_delay: self.round_delay,
        }
    }
}
