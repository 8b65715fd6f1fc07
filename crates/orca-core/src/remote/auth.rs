//! Per-client authentication state.
//!
//! Credentials are looked up once per registry (`host[:port]`) and handed
//! to `oci_distribution` as [`RegistryAuth`]. Challenge handling and token
//! exchange are left to the distribution client; this module only
//! remembers which repositories it has already authorized.

use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, RegistryOperation};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::transport::{Failure, Scheme};
use crate::Result;
use crate::credentials::{CredentialResolver, login_hostname};

/// Credential and authorization caches shared by a client's targets.
pub struct AuthCache {
    resolver: Arc<dyn CredentialResolver>,
    credentials: Mutex<HashMap<String, RegistryAuth>>,
    authorized: Mutex<HashSet<(Scheme, String, String)>>,
}

impl AuthCache {
    /// Empty cache backed by `resolver`.
    #[must_use]
    pub fn new(resolver: Arc<dyn CredentialResolver>) -> Self {
        Self {
            resolver,
            credentials: Mutex::new(HashMap::new()),
            authorized: Mutex::new(HashSet::new()),
        }
    }

    /// Authentication for `registry`, asking the resolver only the first time.
    ///
    /// The port is part of the key: `localhost:5000` and `localhost:5001`
    /// are different registries.
    pub async fn registry_auth(&self, registry: &str) -> Result<RegistryAuth> {
        let key = login_hostname(registry);
        let mut credentials = self.credentials.lock().await;
        if let Some(found) = credentials.get(key) {
            return Ok(found.clone());
        }

        let found = self.resolver.lookup(key).await?;
        debug!(registry = %key, authenticated = found.is_some(), "Resolved registry credential");
        let auth = found.map_or(RegistryAuth::Anonymous, |credential| {
            RegistryAuth::Basic(credential.username, credential.secret)
        });
        credentials.insert(key.to_string(), auth.clone());
        Ok(auth)
    }

    /// Run the registry's authentication handshake for `reference`'s
    /// repository unless `client` already did.
    ///
    /// `budget` bounds the round trip; it is the first request to a
    /// registry and carries the connection setup.
    pub async fn authorize(
        &self,
        client: &Client,
        scheme: Scheme,
        reference: &oci_distribution::Reference,
        auth: &RegistryAuth,
        budget: Duration,
    ) -> std::result::Result<(), Failure> {
        let key = (
            scheme,
            reference.registry().to_string(),
            reference.repository().to_string(),
        );
        let mut authorized = self.authorized.lock().await;
        if authorized.contains(&key) {
            return Ok(());
        }

        debug!(
            registry = %key.1,
            repository = %key.2,
            scheme = scheme.as_str(),
            "Authorizing registry access"
        );
        tokio::time::timeout(budget, client.auth(reference, auth, RegistryOperation::Pull))
            .await
            .map_err(|_| Failure::TimedOut(budget))??;
        authorized.insert(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingResolver(StdMutex<Vec<String>>);

    #[async_trait::async_trait]
    impl CredentialResolver for RecordingResolver {
        async fn lookup(&self, hostname: &str) -> Result<Option<Credential>> {
            self.0.lock().unwrap().push(hostname.to_string());
            Ok((hostname == "localhost:5000").then(|| Credential::new("u", "p")))
        }
    }

    #[tokio::test]
    async fn test_resolver_consulted_once_per_registry() {
        let resolver = Arc::new(RecordingResolver::default());
        let cache = AuthCache::new(resolver.clone());

        for _ in 0..3 {
            assert!(matches!(
                cache.registry_auth("localhost:5000").await.unwrap(),
                RegistryAuth::Basic(ref user, ref pass) if user == "u" && pass == "p"
            ));
        }
        assert!(matches!(
            cache.registry_auth("localhost:5001").await.unwrap(),
            RegistryAuth::Anonymous
        ));
        assert_eq!(
            *resolver.0.lock().unwrap(),
            vec!["localhost:5000".to_string(), "localhost:5001".to_string()]
        );
    }

    #[tokio::test]
    async fn test_docker_hub_is_looked_up_under_login_host() {
        let resolver = Arc::new(RecordingResolver::default());
        let cache = AuthCache::new(resolver.clone());

        cache.registry_auth("registry-1.docker.io").await.unwrap();
        cache.registry_auth("docker.io").await.unwrap();
        assert_eq!(*resolver.0.lock().unwrap(), vec!["index.docker.io".to_string()]);
    }
}
