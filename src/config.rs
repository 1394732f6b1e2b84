//! Configuration management for chatroom
//!
//! This module handles loading, parsing and validating the application
//! configuration from a YAML file, environment variables and CLI
//! overrides. Provider credentials live in the
//! [`ConfigStore`](crate::api_config::ConfigStore) instead; the `provider`
//! section here only seeds it at startup.

use crate::api_config::ApiConfigUpdate;
use crate::client::{Endpoint, RetryPolicy, DEFAULT_HISTORY_LIMIT, DEFAULT_SYSTEM_PROMPT};
use crate::error::{ChatroomError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Upper bound accepted for `client.max_attempts`
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// Main configuration structure for chatroom
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Persistence backend
    #[serde(default)]
    pub storage: StorageConfig,
    /// Chat request client behavior
    #[serde(default)]
    pub client: ClientConfig,
    /// Thinking-state coordination
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Proxy server
    #[serde(default)]
    pub server: ServerConfig,
    /// Provider values applied over the stored provider configuration
    #[serde(default)]
    pub provider: ApiConfigUpdate,
}

/// Persistence backend configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file; the platform data directory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Where chat requests are sent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// Straight to the provider's chat-completions endpoint
    #[default]
    Direct,
    /// Through a `chatroom serve` proxy
    Proxy,
}

/// Chat request client configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Attempts per request, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff base; attempt n waits `base * 2^(n-1)`
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Prior messages sent with each request
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// System prompt placed before the history
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Per-request timeout; none by default
    #[serde(default)]
    pub timeout_seconds: Option<u64>,

    /// Direct or proxied requests
    #[serde(default)]
    pub endpoint: EndpointKind,

    /// Proxy base URL, required for the proxy endpoint
    #[serde(default)]
    pub proxy_url: Option<String>,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            history_limit: default_history_limit(),
            system_prompt: default_system_prompt(),
            timeout_seconds: None,
            endpoint: EndpointKind::Direct,
            proxy_url: None,
        }
    }
}

impl ClientConfig {
    /// Retry policy described by this section
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }

    /// Request timeout, if any
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_seconds.map(Duration::from_secs)
    }

    /// Endpoint described by this section
    pub fn endpoint(&self) -> Result<Endpoint> {
        match (self.endpoint, &self.proxy_url) {
            (EndpointKind::Direct, _) => Ok(Endpoint::Direct),
            (EndpointKind::Proxy, Some(url)) if !url.trim().is_empty() => Ok(Endpoint::Proxy {
                url: url.trim().trim_end_matches('/').to_string(),
            }),
            (EndpointKind::Proxy, _) => Err(ChatroomError::Config(
                "client.proxy_url is required when client.endpoint is proxy".to_string(),
            )
            .into()),
        }
    }
}

/// Thinking-state coordination configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Age after which another window's lease is considered abandoned
    #[serde(default = "default_lease_ttl_seconds")]
    pub lease_ttl_seconds: u64,
}

fn default_lease_ttl_seconds() -> u64 {
    30
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lease_ttl_seconds: default_lease_ttl_seconds(),
        }
    }
}

impl CoordinatorConfig {
    /// Lease time-to-live
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_seconds)
    }
}

/// Proxy server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Chat requests allowed per client within one window
    #[serde(default = "default_max_requests_per_minute")]
    pub max_requests_per_minute: usize,

    /// Limiter window length
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_max_requests_per_minute() -> usize {
    10
}

fn default_window_seconds() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_requests_per_minute: default_max_requests_per_minute(),
            window_seconds: default_window_seconds(),
        }
    }
}

impl AppConfig {
    /// Load configuration from file, environment variables and CLI
    /// overrides
    ///
    /// A missing file yields the defaults. The result is not validated;
    /// call [`validate`](Self::validate).
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ChatroomError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| ChatroomError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(db) = std::env::var("CHATROOM_DB") {
            self.storage.path = Some(PathBuf::from(db));
        }

        if let Ok(key) = std::env::var("CHATROOM_API_KEY") {
            self.provider.api_key = Some(key);
        }

        if let Ok(base_url) = std::env::var("CHATROOM_BASE_URL") {
            self.provider.base_url = Some(base_url);
        }

        if let Ok(model) = std::env::var("CHATROOM_MODEL") {
            self.provider.model = Some(model);
        }

        if let Ok(port) = std::env::var("CHATROOM_SERVER_PORT") {
            if let Ok(value) = port.parse() {
                self.server.port = value;
            } else {
                tracing::warn!("Invalid CHATROOM_SERVER_PORT: {}", port);
            }
        }

        if let Ok(url) = std::env::var("CHATROOM_PROXY_URL") {
            self.client.endpoint = EndpointKind::Proxy;
            self.client.proxy_url = Some(url);
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(path) = &cli.storage_path {
            self.storage.path = Some(PathBuf::from(path));
        }
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first invalid field
    pub fn validate(&self) -> Result<()> {
        if self.client.max_attempts == 0 {
            return Err(ChatroomError::Config(
                "client.max_attempts must be greater than 0".to_string(),
            )
            .into());
        }

        if self.client.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(ChatroomError::Config(format!(
                "client.max_attempts must be less than or equal to {}",
                MAX_ATTEMPTS_LIMIT
            ))
            .into());
        }

        if self.client.history_limit == 0 {
            return Err(ChatroomError::Config(
                "client.history_limit must be greater than 0".to_string(),
            )
            .into());
        }

        if self.client.timeout_seconds == Some(0) {
            return Err(ChatroomError::Config(
                "client.timeout_seconds must be greater than 0 when set".to_string(),
            )
            .into());
        }

        self.client.endpoint()?;

        if self.coordinator.lease_ttl_seconds == 0 {
            return Err(ChatroomError::Config(
                "coordinator.lease_ttl_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.server.max_requests_per_minute == 0 {
            return Err(ChatroomError::Config(
                "server.max_requests_per_minute must be greater than 0".to_string(),
            )
            .into());
        }

        if self.server.window_seconds == 0 {
            return Err(ChatroomError::Config(
                "server.window_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        Ok(())
    }
}
