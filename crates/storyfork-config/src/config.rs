//! Application configuration loaded from TOML with environment overrides.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_DB_FILE: &str = "storyfork.duckdb";

/// Top-level configuration for the storyfork service
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub model: ModelConfig,
    pub preview: PreviewConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the DuckDB database file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_data_dir().join(DEFAULT_DB_FILE),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            enable_cors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// When disabled the bearer value itself is taken as the caller's username
    pub enabled: bool,
    /// JSON file with `[{ "username": .., "password_hash": .. }]`
    pub credentials_file: Option<PathBuf>,
    /// Secret used to sign tokens; random per process when absent
    pub token_secret: Option<String>,
    pub token_expiry_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            credentials_file: None,
            token_secret: None,
            token_expiry_secs: 86400,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// `mock` or `ollama`
    pub provider: String,
    pub model_name: Option<String>,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Canned text returned by the mock provider
    pub mock_response: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "mock".to_string(),
            model_name: None,
            base_url: None,
            temperature: Some(0.8),
            max_tokens: None,
            mock_response: None,
        }
    }
}

/// AI preview cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Lifetime of a fork's preview entry, refreshed on every write
    pub ttl_secs: u64,
    /// Length of the fallback summary when the provider fails
    pub summary_max_chars: usize,
    pub summary_queue_capacity: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            summary_max_chars: 200,
            summary_queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file and apply environment overrides.
    ///
    /// A missing file is not an error: defaults are used instead.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) => {
                tracing::warn!(
                    "Config file {} not found, falling back to defaults",
                    path.display()
                );
                Self::default()
            }
            None => {
                let default_path = default_config_path();
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("STORYFORK_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(host) = lookup("STORYFORK_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("STORYFORK_PORT") {
            match port.parse() {
                Ok(port) => self.server.port = port,
                Err(_) => tracing::warn!("Ignoring invalid STORYFORK_PORT value: {}", port),
            }
        }
        if let Some(provider) = lookup("STORYFORK_MODEL_PROVIDER") {
            self.model.provider = provider;
        }
        if let Some(secret) = lookup("STORYFORK_TOKEN_SECRET") {
            self.auth.token_secret = Some(secret);
        }
    }
}

/// Platform data directory for storyfork, `./.storyfork` when unavailable
pub fn default_data_dir() -> PathBuf {
    ProjectDirs::from("dev", "storyfork", "storyfork")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".storyfork"))
}

pub fn default_config_path() -> PathBuf {
    ProjectDirs::from("dev", "storyfork", "storyfork")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from(".storyfork").join("config.toml"))
}
