use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variables consulted by [`ClientConfig::with_env_overrides`].
pub const ENV_API_KEY: &str = "RAGSTREAM_API_KEY";
pub const ENV_BASE_URL: &str = "RAGSTREAM_BASE_URL";
pub const ENV_TIMEOUT_MS: &str = "RAGSTREAM_TIMEOUT_MS";
pub const ENV_MAX_RETRIES: &str = "RAGSTREAM_MAX_RETRIES";

/// Error type for configuration loading
#[derive(Debug)]
pub enum ConfigError {
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
    InvalidValue {
        path: PathBuf,
        field: String,
        value: String,
        valid_values: Vec<String>,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError { path, source } => {
                write!(
                    f,
                    "Failed to read config file {}: {}",
                    path.display(),
                    source
                )
            }
            ConfigError::ParseError { path, source } => {
                write!(f, "Invalid TOML syntax in {}: {}", path.display(), source)
            }
            ConfigError::WriteError { path, source } => {
                write!(f, "Failed to write config file {}: {}", path.display(), source)
            }
            ConfigError::InvalidValue {
                path,
                field,
                value,
                valid_values,
            } => {
                write!(
                    f,
                    "Invalid value '{}' for '{}' in {}\n  Valid values: {}",
                    value,
                    field,
                    path.display(),
                    valid_values.join(", ")
                )
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::ReadError { source, .. } => Some(source),
            ConfigError::ParseError { source, .. } => Some(source),
            ConfigError::WriteError { source, .. } => Some(source),
            ConfigError::InvalidValue { .. } => None,
        }
    }
}

/// Configuration file loaded from `~/.config/ragstream/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub debug: bool,
}

/// Settings shared by every request issued through one client.
///
/// Example in `config.toml`:
/// ```toml
/// [client]
/// api_key = "sk-..."
/// base_url = "https://rag.example.com"
/// timeout_ms = 60000
/// max_retries = 3
/// ```
///
/// A client takes its own copy at construction and never mutates it, so
/// concurrent requests read it without synchronization.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    #[serde(default)]
    pub api_key: Option<String>,
    /// Service root, without a trailing slash
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-attempt timeout in milliseconds (default: 60000)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Total attempts per logical request (default: 3)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_timeout_ms() -> u64 {
    60_000
}

fn default_max_retries() -> u32 {
    3
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &self.masked_api_key())
            .field("base_url", &self.base_url)
            .field("timeout_ms", &self.timeout_ms)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            base_url: base_url.into(),
            ..Self::default()
        }
        .normalized()
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Strip trailing slashes so `base_url + path` never doubles them.
    pub fn normalized(mut self) -> Self {
        let trimmed_len = self.base_url.trim_end_matches('/').len();
        self.base_url.truncate(trimmed_len);
        self
    }

    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }

    /// Apply `RAGSTREAM_*` environment variables on top of this config.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup (the environment in production).
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(api_key) = lookup(ENV_API_KEY).filter(|k| !k.is_empty()) {
            self.api_key = Some(api_key);
        }
        if let Some(base_url) = lookup(ENV_BASE_URL).filter(|u| !u.is_empty()) {
            self.base_url = base_url;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.timeout_ms = ms,
                _ => tracing::warn!(value = %raw, "Ignoring invalid {ENV_TIMEOUT_MS}"),
            }
        }
        if let Some(raw) = lookup(ENV_MAX_RETRIES) {
            match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => self.max_retries = n,
                _ => tracing::warn!(value = %raw, "Ignoring invalid {ENV_MAX_RETRIES}"),
            }
        }
        self.normalized()
    }

    /// API key with everything but the last four characters hidden.
    pub fn masked_api_key(&self) -> Option<String> {
        self.api_key.as_ref().map(|key| {
            let visible: String = key
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            format!("****{visible}")
        })
    }

    fn validate(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                path: path.to_path_buf(),
                field: "client.base_url".to_string(),
                value: self.base_url.clone(),
                valid_values: vec!["http://...".to_string(), "https://...".to_string()],
            });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                path: path.to_path_buf(),
                field: "client.timeout_ms".to_string(),
                value: self.timeout_ms.to_string(),
                valid_values: vec!["1 or more milliseconds".to_string()],
            });
        }
        if self.max_retries == 0 {
            return Err(ConfigError::InvalidValue {
                path: path.to_path_buf(),
                field: "client.max_retries".to_string(),
                value: self.max_retries.to_string(),
                valid_values: vec!["1 or more attempts".to_string()],
            });
        }
        Ok(())
    }
}

impl Config {
    pub fn dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ragstream")
    }

    pub fn path() -> PathBuf {
        Self::dir().join("config.toml")
    }

    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Self::path())
    }

    pub fn load_from(path: PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
            path: path.clone(),
            source: e,
        })?;
        Self::parse(&content, path)
    }

    fn parse(content: &str, path: PathBuf) -> Result<Self, ConfigError> {
        let mut config: Config = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: path.clone(),
            source: e,
        })?;
        config.client = config.client.normalized();
        config.client.validate(&path)?;
        Ok(config)
    }

    /// Write the config as pretty TOML, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        };
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::InvalidValue {
            path: path.to_path_buf(),
            field: "config".to_string(),
            value: e.to_string(),
            valid_values: vec![],
        })?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_error)?;
        }
        std::fs::write(path, content).map_err(write_error)
    }

    pub fn with_overrides(mut self, debug: bool) -> Self {
        if debug {
            self.logging.debug = true;
        }
        self.client = self.client.with_env_overrides();
        self
    }
}
