//! Configuration loading, validation, and management for GemRelay.
//!
//! Loads configuration from `config/config.toml` (or the file named by
//! `GEMRELAY_CONFIG`) with environment variable overrides. Validates all
//! settings at startup.

use gemrelay_core::remote::{ConnectOptions, Credentials};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default configuration file, relative to the working directory.
pub const CONFIG_PATH: &str = "config/config.toml";

/// Environment variable naming an alternative configuration file.
pub const CONFIG_PATH_ENV: &str = "GEMRELAY_CONFIG";

const CLIENT_ENV_PREFIX: &str = "GEMRELAY_REMOTE__CLIENTS__";

/// The root configuration structure.
///
/// Maps directly to `config/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Cross-origin request policy
    #[serde(default)]
    pub cors: CorsConfig,

    /// Remote accounts and connection policy
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Conversation store location and limits
    #[serde(default)]
    pub storage: StorageConfig,

    /// Log verbosity
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_true() -> bool {
    true
}

fn default_wildcard() -> Vec<String> {
    vec!["*".into()]
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// When set, every `/v1` request must carry `Authorization: Bearer <api_key>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("api_key", &redact(&self.api_key))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_wildcard")]
    pub allow_origins: Vec<String>,

    #[serde(default = "default_true")]
    pub allow_credentials: bool,

    #[serde(default = "default_wildcard")]
    pub allow_methods: Vec<String>,

    #[serde(default = "default_wildcard")]
    pub allow_headers: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allow_origins: default_wildcard(),
            allow_credentials: true,
            allow_methods: default_wildcard(),
            allow_headers: default_wildcard(),
        }
    }
}

/// Credential set for one remote account (one pool member).
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Unique identifier for the client
    pub id: String,

    pub secure_1psid: String,

    pub secure_1psidts: String,
}

impl ClientConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            secure_1psid: self.secure_1psid.clone(),
            secure_1psidts: self.secure_1psidts.clone(),
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("id", &self.id)
            .field("secure_1psid", &"[REDACTED]")
            .field("secure_1psidts", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Pool members, in rotation and lookup order
    #[serde(default)]
    pub clients: Vec<ClientConfig>,

    /// Connection timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Keep session cookies fresh in the background
    #[serde(default = "default_true")]
    pub auto_refresh: bool,

    /// Cookie refresh interval in seconds
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    #[serde(default)]
    pub verbose: bool,

    /// Base URL of the web-automation bridge
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,

    /// Model names accepted by `/v1/chat/completions` and listed by `/v1/models`
    #[serde(default = "default_models")]
    pub models: Vec<String>,
}

fn default_timeout() -> u64 {
    60
}
fn default_refresh_interval() -> u64 {
    540
}
fn default_bridge_url() -> String {
    "http://127.0.0.1:8765".into()
}
fn default_models() -> Vec<String> {
    vec![
        "gemini-2.5-flash".into(),
        "gemini-2.5-pro".into(),
        "gemini-2.0-flash".into(),
        "gemini-2.0-flash-thinking".into(),
    ]
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            clients: vec![],
            timeout: default_timeout(),
            auto_refresh: true,
            refresh_interval: default_refresh_interval(),
            verbose: false,
            bridge_url: default_bridge_url(),
            models: default_models(),
        }
    }
}

impl RemoteConfig {
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            timeout: Duration::from_secs(self.timeout),
            auto_refresh: self.auto_refresh,
            refresh_interval: Duration::from_secs(self.refresh_interval),
            verbose: self.verbose,
        }
    }

    /// Pool member ids in configured order.
    pub fn client_ids(&self) -> Vec<String> {
        self.clients.iter().map(|c| c.id.clone()).collect()
    }

    pub fn supports_model(&self, model: &str) -> bool {
        self.models.iter().any(|m| m == model)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory of the conversation database
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// Maximum size of the database on disk, in bytes
    #[serde(default = "default_max_size")]
    pub max_size: u64,
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/conversations")
}
fn default_max_size() -> u64 {
    128 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            max_size: default_max_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "debug".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// The level as a `tracing` filter directive.
    ///
    /// Accepts the `WARNING`/`CRITICAL` spellings used by older configs.
    pub fn filter_directive(&self) -> Option<&'static str> {
        match self.level.to_ascii_lowercase().as_str() {
            "trace" => Some("trace"),
            "debug" => Some("debug"),
            "info" => Some("info"),
            "warn" | "warning" => Some("warn"),
            "error" | "critical" => Some("error"),
            _ => None,
        }
    }
}

impl AppConfig {
    /// Load configuration from `$GEMRELAY_CONFIG` or `config/config.toml`,
    /// then apply `GEMRELAY_*` environment overrides and validate.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::default_path())
    }

    /// Load `path`, then apply `GEMRELAY_*` environment overrides and validate.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::read(path)?;
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// `$GEMRELAY_CONFIG`, or `config/config.toml`.
    pub fn default_path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(CONFIG_PATH))
    }

    /// Load configuration from a specific file path (no environment overrides).
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::read(path)?;
        config.validate()?;
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Apply `GEMRELAY_*` overrides from the given variables.
    ///
    /// Clients are patched by index: `GEMRELAY_REMOTE__CLIENTS__{i}__{FIELD}`
    /// updates client `i`, or appends a new client when `i` equals the current
    /// number of clients.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut client_overrides: BTreeMap<usize, BTreeMap<String, String>> = BTreeMap::new();

        for (key, value) in vars {
            match key.as_str() {
                "GEMRELAY_SERVER__HOST" => self.server.host = value,
                "GEMRELAY_SERVER__PORT" => self.server.port = parse_env(&key, &value)?,
                "GEMRELAY_SERVER__API_KEY" => {
                    self.server.api_key = if value.is_empty() { None } else { Some(value) }
                }
                "GEMRELAY_STORAGE__PATH" => self.storage.path = PathBuf::from(value),
                "GEMRELAY_STORAGE__MAX_SIZE" => self.storage.max_size = parse_env(&key, &value)?,
                "GEMRELAY_LOGGING__LEVEL" => self.logging.level = value,
                "GEMRELAY_REMOTE__BRIDGE_URL" => self.remote.bridge_url = value,
                "GEMRELAY_REMOTE__TIMEOUT" => self.remote.timeout = parse_env(&key, &value)?,
                _ => {
                    let Some(rest) = key.strip_prefix(CLIENT_ENV_PREFIX) else {
                        continue;
                    };
                    let Some((index, field)) = rest.split_once("__") else {
                        continue;
                    };
                    let Ok(index) = index.parse::<usize>() else {
                        continue;
                    };
                    client_overrides
                        .entry(index)
                        .or_default()
                        .insert(field.to_ascii_lowercase(), value);
                }
            }
        }

        for (index, fields) in client_overrides {
            self.merge_client(index, fields)?;
        }

        Ok(())
    }

    fn merge_client(
        &mut self,
        index: usize,
        mut fields: BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        let clients = &mut self.remote.clients;

        if index < clients.len() {
            let client = &mut clients[index];
            if let Some(id) = fields.remove("id") {
                client.id = id;
            }
            if let Some(psid) = fields.remove("secure_1psid") {
                client.secure_1psid = psid;
            }
            if let Some(psidts) = fields.remove("secure_1psidts") {
                client.secure_1psidts = psidts;
            }
            return Ok(());
        }

        if index > clients.len() {
            return Err(ConfigError::ValidationError(format!(
                "client index {index} in environment is out of range ({} configured)",
                clients.len()
            )));
        }

        let mut take = |field: &str| {
            fields.remove(field).ok_or_else(|| {
                ConfigError::ValidationError(format!(
                    "client {index} from environment is missing {field}"
                ))
            })
        };
        let client = ClientConfig {
            id: take("id")?,
            secure_1psid: take("secure_1psid")?,
            secure_1psidts: take("secure_1psidts")?,
        };
        clients.push(client);
        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote.clients.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one remote client must be configured".into(),
            ));
        }

        let mut seen = HashSet::new();
        for client in &self.remote.clients {
            if client.id.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "remote client id must not be empty".into(),
                ));
            }
            if !seen.insert(client.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate remote client id '{}'",
                    client.id
                )));
            }
        }

        if self.server.port == 0 {
            return Err(ConfigError::ValidationError("server.port must be >= 1".into()));
        }
        if self.remote.timeout == 0 {
            return Err(ConfigError::ValidationError("remote.timeout must be >= 1".into()));
        }
        if self.remote.refresh_interval == 0 {
            return Err(ConfigError::ValidationError(
                "remote.refresh_interval must be >= 1".into(),
            ));
        }
        if self.storage.max_size == 0 {
            return Err(ConfigError::ValidationError("storage.max_size must be >= 1".into()));
        }
        if self.logging.filter_directive().is_none() {
            return Err(ConfigError::ValidationError(format!(
                "unknown logging.level '{}'",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// A starter config file with one placeholder client (for `gemrelay init`).
    pub fn example_toml() -> String {
        let mut config = Self::default();
        config.remote.clients.push(ClientConfig {
            id: "example-id-1".into(),
            secure_1psid: "YOUR_SECURE_1PSID_HERE".into(),
            secure_1psidts: "YOUR_SECURE_1PSIDTS_HERE".into(),
        });
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("invalid value for {key}: '{value}'")))
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
