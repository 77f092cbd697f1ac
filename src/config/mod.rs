pub mod validation;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

/// Environment variable naming the config file path.
pub const CONFIG_PATH_ENV: &str = "STALLGUARD_CONFIG";
/// Environment variable overriding `server.port`.
pub const PORT_ENV: &str = "PORT";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// What to do with a sentinel found in a buffered body that is not JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FallbackSentinelPolicy {
    /// Remove every occurrence and keep the surrounding text.
    #[default]
    StripAll,
    /// Drop the first occurrence and everything after it.
    TruncateAtFirst,
}

impl fmt::Display for FallbackSentinelPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackSentinelPolicy::StripAll => write!(f, "strip_all"),
            FallbackSentinelPolicy::TruncateAtFirst => write!(f, "truncate_at_first"),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_max_request_body_bytes")]
    pub max_request_body_bytes: usize,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub http_use_env_proxy: bool,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_worker_threads: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_reuse_port_listener_count: Option<usize>,
}

fn default_port() -> u16 {
    3002
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_max_request_body_bytes() -> usize {
    16 * 1024 * 1024
}
fn default_http_pool_max_idle_per_host() -> usize {
    16
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    15
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_shutdown_grace_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            base_path: String::new(),
            max_request_body_bytes: default_max_request_body_bytes(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            http_use_env_proxy: false,
            shutdown_grace_secs: default_shutdown_grace_secs(),
            runtime_worker_threads: None,
            tcp_reuse_port_listener_count: None,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Relay behaviour: sentinel handling, watchdog windows and header rewriting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_sentinel")]
    pub sentinel: String,
    #[serde(default = "default_inactivity_timeout_ms")]
    pub inactivity_timeout_ms: u64,
    #[serde(default = "default_first_chunk_timeout_ms")]
    pub first_chunk_timeout_ms: u64,
    #[serde(default = "default_upstream_timeout_secs")]
    pub upstream_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub strip_accept_encoding: bool,
    #[serde(default = "default_true")]
    pub scrub_passthrough_framing_headers: bool,
    #[serde(default)]
    pub fallback_sentinel_policy: FallbackSentinelPolicy,
    #[serde(default)]
    pub accept_invalid_certs: bool,
    #[serde(default = "default_user_agent")]
    pub default_user_agent: String,
    #[serde(default = "default_accept")]
    pub default_accept: String,
}

fn default_sentinel() -> String {
    "FINISHED".to_string()
}
fn default_inactivity_timeout_ms() -> u64 {
    8000
}
fn default_first_chunk_timeout_ms() -> u64 {
    30_000
}
fn default_upstream_timeout_secs() -> u64 {
    30
}
fn default_true() -> bool {
    true
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string()
}
fn default_accept() -> String {
    "*/*".to_string()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            sentinel: default_sentinel(),
            inactivity_timeout_ms: default_inactivity_timeout_ms(),
            first_chunk_timeout_ms: default_first_chunk_timeout_ms(),
            upstream_timeout_secs: default_upstream_timeout_secs(),
            strip_accept_encoding: true,
            scrub_passthrough_framing_headers: true,
            fallback_sentinel_policy: FallbackSentinelPolicy::default(),
            accept_invalid_certs: false,
            default_user_agent: default_user_agent(),
            default_accept: default_accept(),
        }
    }
}

impl RelayConfig {
    #[must_use]
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    #[must_use]
    pub fn first_chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.first_chunk_timeout_ms)
    }

    #[must_use]
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    /// Internal alias name -> base URL.
    #[serde(default)]
    pub services: BTreeMap<String, String>,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load the config file, falling back to built-in defaults when it does not exist.
///
/// The returned flag is `true` when defaults were used, so the caller can log it
/// once tracing is up.
///
/// # Errors
///
/// Returns any error other than a missing file.
pub fn load_config_or_default(path: &str) -> Result<(AppConfig, bool), ConfigError> {
    match load_config(path) {
        Ok(config) => Ok((config, false)),
        Err(ConfigError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            Ok((AppConfig::default(), true))
        }
        Err(err) => Err(err),
    }
}

/// Apply the `PORT` override when it holds a valid port number.
pub fn apply_env_overrides(config: &mut AppConfig, port: Option<&str>) {
    if let Some(port) = port.and_then(|raw| raw.trim().parse::<u16>().ok()) {
        config.server.port = port;
    }
}
