//! Server configuration recognized by the sharing core.

use std::error::Error;
use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Signed urls must remain valid for at least this long.
pub const MIN_URL_TTL_SECONDS: u64 = 900;

/// Configuration of the sharing server core.
///
/// All keys have defaults so that a config file only needs to mention the
/// keys it wants to override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerConfig {
    /// Whether bearer authentication is enforced. Disabling this serves
    /// every request as an anonymous recipient and is meant for local
    /// development only.
    pub auth_enabled: bool,
    /// A single statically configured bearer token. When unset and no
    /// token store is registered, any non-empty token is accepted.
    pub configured_bearer_token: Option<String>,
    /// Minimum lifetime of signed urls in seconds. Values below
    /// [`MIN_URL_TTL_SECONDS`] are raised to that floor.
    pub url_ttl_seconds: u64,
    /// Maximum number of snapshots kept in the snapshot cache.
    pub snapshot_cache_capacity: u64,
    /// Optional time-to-live for cached snapshots in seconds.
    pub snapshot_cache_ttl_seconds: Option<u64>,
    /// Hard cap on the `maxResults` pagination parameter.
    pub max_page_size: u32,
    /// Page size used when `maxResults` is omitted.
    pub default_page_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            auth_enabled: true,
            configured_bearer_token: None,
            url_ttl_seconds: MIN_URL_TTL_SECONDS,
            snapshot_cache_capacity: 256,
            snapshot_cache_ttl_seconds: None,
            max_page_size: 2000,
            default_page_size: 500,
        }
    }
}

impl ServerConfig {
    /// Load the configuration from a yaml file.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let handle = std::fs::OpenOptions::new()
            .read(true)
            .open(path.as_ref())
            .map_err(|e| ConfigError::new(format!("could not open config file: {e}")))?;
        serde_yaml::from_reader(handle)
            .map_err(|e| ConfigError::new(format!("could not parse config file: {e}")))
    }

    /// Lifetime of signed urls, clamped to the protocol minimum.
    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.url_ttl_seconds.max(MIN_URL_TTL_SECONDS))
    }

    /// Time-to-live of cached snapshots, if configured.
    pub fn snapshot_cache_ttl(&self) -> Option<Duration> {
        self.snapshot_cache_ttl_seconds.map(Duration::from_secs)
    }
}

/// Error raised when the server configuration could not be loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ConfigError {}
