//! Registry credentials.
//!
//! Credentials are looked up per registry host (with port) through a
//! [`CredentialResolver`]. The registry client asks once per registry and
//! remembers the answer for its own lifetime; nothing is persisted.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::RegistryAuthConfig;
use crate::{Error, Result};

/// Legacy login identity of the public Docker registry.
pub const DOCKER_HUB_LOGIN_HOST: &str = "index.docker.io";

/// A username and secret for one registry.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Username; may be empty for token-only registries.
    pub username: String,
    /// Password or token.
    pub secret: String,
}

impl Credential {
    /// Create a credential.
    #[must_use]
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &"[redacted]")
            .finish()
    }
}

/// Looks up credentials for a registry hostname.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Credential for `hostname`, or `None` for anonymous access.
    async fn lookup(&self, hostname: &str) -> Result<Option<Credential>>;
}

/// Resolver that never has credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

#[async_trait]
impl CredentialResolver for Anonymous {
    async fn lookup(&self, _hostname: &str) -> Result<Option<Credential>> {
        Ok(None)
    }
}

/// Fixed hostname → credential table.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    entries: HashMap<String, Credential>,
}

impl StaticCredentials {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a credential for a registry address (URL or hostname).
    pub fn insert(&mut self, address: &str, credential: Credential) {
        let host = convert_to_hostname(address);
        self.entries
            .insert(login_hostname(&host).to_string(), credential);
    }

    /// Build the table from `registry_auth` configuration entries.
    ///
    /// Per entry, the first available source wins: explicit username and
    /// password, inline docker config JSON, then a docker config file.
    pub fn from_config(entries: &[RegistryAuthConfig]) -> Result<Self> {
        let mut table = Self::new();
        for entry in entries {
            let hostname = convert_to_hostname(&entry.address);
            if hostname.is_empty() {
                return Err(Error::configuration("registry_auth address must not be empty"));
            }

            let credential = if let Some(username) =
                entry.username.as_deref().filter(|u| !u.is_empty())
            {
                Credential::new(username, entry.password.clone().unwrap_or_default())
            } else if let Some(content) = entry
                .config_file_content
                .as_deref()
                .filter(|c| !c.is_empty())
            {
                docker_config_credential(content, &hostname).map_err(|e| {
                    Error::configuration(format!(
                        "error parsing docker registry config json: {e}"
                    ))
                })?
            } else if let Some(file) = entry.config_file.as_deref().filter(|f| !f.is_empty()) {
                let path = expand_home(file)?;
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    Error::configuration(format!(
                        "could not open config file {}: {e}",
                        path.display()
                    ))
                })?;
                docker_config_credential(&content, &hostname)?
            } else {
                continue;
            };

            debug!(%hostname, "Configured registry credential");
            table.insert(&hostname, credential);
        }
        Ok(table)
    }

    /// Number of configured hosts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no hosts are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CredentialResolver for StaticCredentials {
    async fn lookup(&self, hostname: &str) -> Result<Option<Credential>> {
        Ok(self.entries.get(login_hostname(hostname)).cloned())
    }
}

/// Strip scheme and path from a registry address.
///
/// `https://index.docker.io/v1/` → `index.docker.io`.
#[must_use]
pub fn convert_to_hostname(address: &str) -> String {
    let stripped = address
        .strip_prefix("http://")
        .or_else(|| address.strip_prefix("https://"))
        .unwrap_or(address);
    stripped.split('/').next().unwrap_or_default().to_string()
}

/// Hostname under which credentials for `host` are registered.
///
/// The public Docker registry serves pulls from `registry-1.docker.io`
/// while logins are recorded under `index.docker.io`.
#[must_use]
pub fn login_hostname(host: &str) -> &str {
    match host {
        "docker.io" | "registry-1.docker.io" | DOCKER_HUB_LOGIN_HOST => DOCKER_HUB_LOGIN_HOST,
        other => other,
    }
}

#[derive(Debug, Deserialize)]
struct DockerConfigFile {
    #[serde(default)]
    auths: HashMap<String, DockerAuthEntry>,
}

#[derive(Debug, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

/// Extract the credential for `hostname` from docker `config.json` content.
pub fn docker_config_credential(content: &str, hostname: &str) -> Result<Credential> {
    let config: DockerConfigFile = serde_json::from_str(content)
        .map_err(|e| Error::configuration(format!("invalid docker config: {e}")))?;
    let wanted = login_hostname(hostname);

    let entry = config
        .auths
        .iter()
        .find(|(key, _)| login_hostname(&convert_to_hostname(key)) == wanted)
        .map(|(_, entry)| entry)
        .ok_or_else(|| {
            Error::configuration(format!("couldn't find registry config for '{hostname}'"))
        })?;

    if let Some(auth) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
        let decoded = STANDARD
            .decode(auth.trim())
            .map_err(|e| Error::configuration(format!("invalid auth for '{hostname}': {e}")))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|e| Error::configuration(format!("invalid auth for '{hostname}': {e}")))?;
        let (username, secret) = decoded.split_once(':').ok_or_else(|| {
            Error::configuration(format!("auth for '{hostname}' is not `user:password`"))
        })?;
        return Ok(Credential::new(username, secret));
    }

    Ok(Credential::new(
        entry.username.clone().unwrap_or_default(),
        entry.password.clone().unwrap_or_default(),
    ))
}

fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix('~') {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| Error::configuration("cannot expand '~': no home directory"))?;
            Ok(home.join(rest.trim_start_matches(['/', '\\'])))
        }
        None => Ok(Path::new(path).to_path_buf()),
    }
}
