//! Client configuration.
//!
//! Everything the core needs is passed in through [`Config`]; nothing is
//! read from the environment. Timeouts are whole seconds so the structure
//! maps cleanly onto TOML.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::store::default_root;

/// Top-level configuration for a [`Client`](crate::Client).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Local cache; `None` sends every request to the registry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,

    /// HTTP transport settings.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Per-registry credentials.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registry_auth: Vec<RegistryAuthConfig>,

    /// Maximum number of nodes fetched concurrently during a walk.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Deadline for a whole materialization, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: None,
            transport: TransportConfig::default(),
            registry_auth: Vec::new(),
            max_concurrency: default_max_concurrency(),
            operation_timeout_secs: None,
        }
    }
}

impl Config {
    /// Configuration with a cache at `root`.
    #[must_use]
    pub fn with_cache(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache = Some(CacheConfig {
            root: root.into(),
            verify_on_read: false,
        });
        self
    }

    /// Deadline for a whole operation.
    #[must_use]
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs.map(Duration::from_secs)
    }
}

fn default_max_concurrency() -> usize {
    8
}

/// Local cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory of the content store.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Re-hash cached content on every hit and evict entries that fail.
    #[serde(default)]
    pub verify_on_read: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            verify_on_read: false,
        }
    }
}

/// When to talk plain HTTP instead of HTTPS.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlainHttp {
    /// Always HTTPS.
    Never,
    /// Loopback registries try HTTPS first and fall back to HTTP on a
    /// transport error; the fallback is remembered per host.
    #[default]
    LoopbackFallback,
    /// Loopback registries always use HTTP.
    Loopback,
}

/// Registry transport settings.
///
/// Connections are pooled by `oci_distribution`; the connect and handshake
/// budgets bound the first round trip to each registry, where the
/// connection is established.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// TCP connect timeout, in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// TLS handshake timeout, in seconds.
    #[serde(default = "default_tls_handshake_timeout")]
    pub tls_handshake_timeout_secs: u64,

    /// Plain HTTP policy.
    #[serde(default)]
    pub plain_http: PlainHttp,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            tls_handshake_timeout_secs: default_tls_handshake_timeout(),
            plain_http: PlainHttp::default(),
        }
    }
}

impl TransportConfig {
    /// Budget for establishing a connection, TLS included.
    #[must_use]
    pub fn connect_budget(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs + self.tls_handshake_timeout_secs)
    }
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_tls_handshake_timeout() -> u64 {
    10
}

/// Credentials for one registry address.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAuthConfig {
    /// Registry URL or hostname, e.g. `https://index.docker.io/v1/`.
    pub address: String,

    /// Username; takes precedence over any docker config.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Password or token paired with `username`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Path to a docker `config.json`.
    #[serde(default = "default_docker_config", skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,

    /// Inline docker `config.json` content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file_content: Option<String>,
}

impl std::fmt::Debug for RegistryAuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryAuthConfig")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("config_file", &self.config_file)
            .field(
                "config_file_content",
                &self.config_file_content.as_ref().map(|_| "[redacted]"),
            )
            .finish()
    }
}

#[allow(clippy::unnecessary_wraps)]
fn default_docker_config() -> Option<String> {
    Some("~/.docker/config.json".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.cache.is_none());
        assert_eq!(config.max_concurrency, 8);
        assert_eq!(config.transport.connect_timeout_secs, 30);
        assert_eq!(config.transport.tls_handshake_timeout_secs, 10);
        assert_eq!(config.transport.plain_http, PlainHttp::LoopbackFallback);
        assert_eq!(config.transport.connect_budget(), Duration::from_secs(40));
        assert_eq!(config.operation_timeout(), None);
    }

    #[test]
    fn test_deserialize_partial_json() {
        let config: Config = serde_json::from_str(
            r#"{
                "cache": {"root": "/tmp/orca", "verify_on_read": true},
                "transport": {"plain_http": "loopback"},
                "registry_auth": [{"address": "ghcr.io", "username": "u", "password": "p"}],
                "operation_timeout_secs": 120
            }"#,
        )
        .unwrap();

        let cache = config.cache.unwrap();
        assert_eq!(cache.root, PathBuf::from("/tmp/orca"));
        assert!(cache.verify_on_read);
        assert_eq!(config.transport.plain_http, PlainHttp::Loopback);
        assert_eq!(config.transport.connect_timeout_secs, 30);
        assert_eq!(config.registry_auth.len(), 1);
        assert_eq!(
            config.registry_auth[0].config_file.as_deref(),
            Some("~/.docker/config.json")
        );
        assert_eq!(config.operation_timeout_secs, Some(120));
    }

    #[test]
    fn test_auth_debug_redacts() {
        let auth = RegistryAuthConfig {
            address: "ghcr.io".into(),
            username: Some("u".into()),
            password: Some("topsecret".into()),
            config_file: None,
            config_file_content: Some("{\"auths\":{}}".into()),
        };
        let debug = format!("{auth:?}");
        assert!(!debug.contains("topsecret"));
        assert!(!debug.contains("auths"));
    }

    #[test]
    fn test_with_cache() {
        let config = Config::default().with_cache("/var/cache/orca");
        assert_eq!(
            config.cache.map(|c| c.root),
            Some(PathBuf::from("/var/cache/orca"))
        );
    }
}
