//! Read-only access to a repository on an OCI distribution registry.
//!
//! A [`RegistryClient`] owns the `oci_distribution` clients and the
//! authentication state, and is shared by every [`RemoteTarget`] it hands
//! out.

pub mod auth;
pub mod transport;

use async_trait::async_trait;
use bytes::Bytes;
use oci_distribution::errors::OciDistributionError;
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth;
use serde::Deserialize;
use serde::de::IgnoredAny;
use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use self::auth::AuthCache;
use self::transport::{Failure, Scheme, registry_client};
use crate::config::{PlainHttp, TransportConfig};
use crate::credentials::CredentialResolver;
use crate::descriptor::{
    Descriptor, MANIFEST_MEDIA_TYPES, OCI_ARTIFACT_MANIFEST, OCI_INDEX, OCI_MANIFEST,
};
use crate::digest::{Algorithm, Digest};
use crate::reference::{Reference, ReferenceTarget, is_loopback_host};
use crate::target::ReadOnlyTarget;
use crate::{Error, ErrorKind, Result};

/// Shared registry client.
///
/// Cloning is cheap; clones share the connection pools, the credential and
/// token caches, and the record of loopback hosts that fell back to HTTP.
#[derive(Clone)]
pub struct RegistryClient {
    inner: Arc<Inner>,
}

struct Inner {
    https: oci_distribution::Client,
    http: oci_distribution::Client,
    plain_http: PlainHttp,
    connect_budget: Duration,
    auth: AuthCache,
    http_fallback: Mutex<HashSet<String>>,
}

impl RegistryClient {
    /// Create a client with its own connection pools.
    #[must_use]
    pub fn new(config: &TransportConfig, resolver: Arc<dyn CredentialResolver>) -> Self {
        debug!(
            connect_budget = ?config.connect_budget(),
            plain_http = ?config.plain_http,
            "Building registry client"
        );
        Self {
            inner: Arc::new(Inner {
                https: registry_client(Scheme::Https),
                http: registry_client(Scheme::Http),
                plain_http: config.plain_http,
                connect_budget: config.connect_budget(),
                auth: AuthCache::new(resolver),
                http_fallback: Mutex::new(HashSet::new()),
            }),
        }
    }

    /// A remote target for the repository named by `reference`.
    #[must_use]
    pub fn target(&self, reference: &Reference) -> RemoteTarget {
        RemoteTarget {
            client: self.clone(),
            reference: reference.clone(),
        }
    }

    fn scheme(&self, registry: &str) -> Scheme {
        if !is_loopback_host(registry) {
            return Scheme::Https;
        }
        match self.inner.plain_http {
            PlainHttp::Never => Scheme::Https,
            PlainHttp::Loopback => Scheme::Http,
            PlainHttp::LoopbackFallback => {
                let fell_back = self
                    .inner
                    .http_fallback
                    .lock()
                    .is_ok_and(|hosts| hosts.contains(registry));
                if fell_back { Scheme::Http } else { Scheme::Https }
            }
        }
    }

    fn can_fall_back(&self, registry: &str, scheme: Scheme) -> bool {
        scheme == Scheme::Https
            && self.inner.plain_http == PlainHttp::LoopbackFallback
            && is_loopback_host(registry)
    }

    fn distribution(&self, scheme: Scheme) -> &oci_distribution::Client {
        match scheme {
            Scheme::Https => &self.inner.https,
            Scheme::Http => &self.inner.http,
        }
    }

    /// Run `op` against `reference`'s registry after authorizing for its
    /// repository. `what` names the manifest, blob or tag in errors.
    async fn run<T, F, Fut>(&self, reference: &Reference, what: &str, op: F) -> Result<T>
    where
        F: Fn(oci_distribution::Client, RegistryAuth) -> Fut,
        Fut: Future<Output = std::result::Result<T, OciDistributionError>>,
    {
        let registry = reference.registry();
        let auth = self.inner.auth.registry_auth(registry).await?;
        let image = oci_distribution::Reference::from(reference);

        let scheme = self.scheme(registry);
        let outcome = match self.attempt(scheme, &image, &auth, &op).await {
            Err(failure) if failure.is_transport() && self.can_fall_back(registry, scheme) => {
                warn!(%registry, error = ?failure, "HTTPS failed for loopback registry, falling back to plain HTTP");
                if let Ok(mut hosts) = self.inner.http_fallback.lock() {
                    hosts.insert(registry.to_string());
                }
                self.attempt(Scheme::Http, &image, &auth, &op).await
            }
            outcome => outcome,
        };
        outcome.map_err(|failure| failure.into_error(reference, what))
    }

    async fn attempt<T, F, Fut>(
        &self,
        scheme: Scheme,
        image: &oci_distribution::Reference,
        auth: &RegistryAuth,
        op: &F,
    ) -> std::result::Result<T, Failure>
    where
        F: Fn(oci_distribution::Client, RegistryAuth) -> Fut,
        Fut: Future<Output = std::result::Result<T, OciDistributionError>>,
    {
        let client = self.distribution(scheme);
        self.inner
            .auth
            .authorize(client, scheme, image, auth, self.inner.connect_budget)
            .await?;
        Ok(op(client.clone(), auth.clone()).await?)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestShape {
    media_type: Option<String>,
    manifests: Option<IgnoredAny>,
    blobs: Option<IgnoredAny>,
}

/// Media type declared by a manifest body, or inferred from its fields.
fn manifest_media_type(body: &[u8]) -> Option<String> {
    let shape: ManifestShape = serde_json::from_slice(body).ok()?;
    Some(match shape {
        ManifestShape {
            media_type: Some(media_type),
            ..
        } => media_type,
        ManifestShape {
            manifests: Some(_), ..
        } => OCI_INDEX.to_string(),
        ManifestShape { blobs: Some(_), .. } => OCI_ARTIFACT_MANIFEST.to_string(),
        _ => OCI_MANIFEST.to_string(),
    })
}

/// A repository on a remote registry.
#[derive(Clone)]
pub struct RemoteTarget {
    client: RegistryClient,
    reference: Reference,
}

impl RemoteTarget {
    /// The reference this target was created for.
    #[must_use]
    pub const fn reference(&self) -> &Reference {
        &self.reference
    }

    /// This target's repository at `target`.
    fn at(&self, target: ReferenceTarget) -> Reference {
        self.reference.with_target(target)
    }
}

impl std::fmt::Debug for RemoteTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteTarget")
            .field("reference", &self.reference.to_string())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ReadOnlyTarget for RemoteTarget {
    /// The distribution client has no HEAD for blobs, so existence is a fetch.
    #[instrument(skip(self, descriptor), fields(repository = %self.reference.locator(), digest = %descriptor.digest))]
    async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        match self.fetch(descriptor).await {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    #[instrument(skip(self, descriptor), fields(repository = %self.reference.locator(), digest = %descriptor.digest))]
    async fn fetch(&self, descriptor: &Descriptor) -> Result<Bytes> {
        let pinned = self.at(ReferenceTarget::Digest(descriptor.digest.clone()));
        let what = descriptor.digest.to_string();

        let body = if descriptor.is_manifest() {
            let accept = descriptor.media_type.as_str();
            self.client
                .run(&pinned, &what, |client, auth| {
                    let image = oci_distribution::Reference::from(&pinned);
                    async move {
                        client
                            .pull_manifest_raw(&image, &auth, &[accept])
                            .await
                            .map(|(body, _)| body)
                    }
                })
                .await?
        } else {
            let layer = OciDescriptor {
                media_type: descriptor.media_type.clone(),
                digest: what.clone(),
                size: descriptor.size,
                urls: None,
                annotations: None,
            };
            self.client
                .run(&pinned, &what, |client, _auth| {
                    let image = oci_distribution::Reference::from(&pinned);
                    let layer = &layer;
                    async move {
                        let mut out = Vec::new();
                        client.pull_blob(&image, layer, &mut out).await?;
                        Ok::<_, OciDistributionError>(out)
                    }
                })
                .await?
        };

        debug!(size = body.len(), "Fetched from registry");
        Ok(Bytes::from(body))
    }

    #[instrument(skip(self), fields(repository = %self.reference.locator()))]
    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        let requested = if reference.contains(':') {
            Some(reference.parse::<Digest>()?)
        } else {
            None
        };
        let target = requested
            .clone()
            .map_or_else(|| ReferenceTarget::Tag(reference.to_string()), ReferenceTarget::Digest);
        let located = self.at(target);

        let (body, announced) = self
            .client
            .run(&located, reference, |client, auth| {
                let image = oci_distribution::Reference::from(&located);
                async move {
                    client
                        .pull_manifest_raw(&image, &auth, MANIFEST_MEDIA_TYPES)
                        .await
                }
            })
            .await?;

        let media_type = manifest_media_type(&body)
            .ok_or_else(|| Error::invalid_manifest(reference, "manifest is not a JSON object"))?;
        let algorithm = requested.as_ref().map_or(Algorithm::Sha256, Digest::algorithm);
        let digest = Digest::compute(algorithm, &body);
        let size = i64::try_from(body.len())
            .map_err(|_| Error::invalid_manifest(reference, "manifest too large"))?;

        if let Ok(announced) = announced.parse::<Digest>()
            && announced.algorithm() == algorithm
            && announced != digest
        {
            return Err(Error::corrupt_content(announced.to_string(), digest.to_string()));
        }
        if let Some(requested) = requested
            && requested != digest
        {
            return Err(Error::corrupt_content(requested.to_string(), digest.to_string()));
        }

        let descriptor = Descriptor::new(media_type, digest, size);
        debug!(%reference, digest = %descriptor.digest, media_type = %descriptor.media_type, "Resolved reference");
        Ok(descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Anonymous;

    fn client(plain_http: PlainHttp) -> RegistryClient {
        let config = TransportConfig {
            plain_http,
            ..TransportConfig::default()
        };
        RegistryClient::new(&config, Arc::new(Anonymous))
    }

    #[test]
    fn test_scheme_policy() {
        let never = client(PlainHttp::Never);
        assert_eq!(never.scheme("127.0.0.1:5000"), Scheme::Https);
        assert!(!never.can_fall_back("127.0.0.1:5000", Scheme::Https));

        let loopback = client(PlainHttp::Loopback);
        assert_eq!(loopback.scheme("localhost:5000"), Scheme::Http);
        assert_eq!(loopback.scheme("ghcr.io"), Scheme::Https);

        let fallback = client(PlainHttp::LoopbackFallback);
        assert_eq!(fallback.scheme("127.0.0.1:5000"), Scheme::Https);
        assert!(fallback.can_fall_back("127.0.0.1:5000", Scheme::Https));
        assert!(!fallback.can_fall_back("127.0.0.1:5000", Scheme::Http));
    }

    #[test]
    fn test_non_loopback_host_never_falls_back() {
        let fallback = client(PlainHttp::LoopbackFallback);
        for host in ["ghcr.io", "registry.example.com:5000", "10.0.0.1:5000"] {
            assert_eq!(fallback.scheme(host), Scheme::Https);
            assert!(!fallback.can_fall_back(host, Scheme::Https));
        }
    }

    #[tokio::test]
    async fn test_unreachable_remote_host_stays_on_https() {
        let fallback = client(PlainHttp::LoopbackFallback);
        let reference: Reference = "registry.invalid/org/repo:v1".parse().unwrap();

        let err = fallback.target(&reference).resolve("v1").await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Network);
        assert!(fallback.inner.http_fallback.lock().unwrap().is_empty());
        assert_eq!(fallback.scheme("registry.invalid"), Scheme::Https);
    }

    #[test]
    fn test_manifest_media_type() {
        assert_eq!(
            manifest_media_type(br#"{"mediaType":"application/vnd.docker.distribution.manifest.v2+json"}"#)
                .as_deref(),
            Some(crate::descriptor::DOCKER_MANIFEST)
        );
        assert_eq!(
            manifest_media_type(br#"{"schemaVersion":2,"manifests":[]}"#).as_deref(),
            Some(OCI_INDEX)
        );
        assert_eq!(
            manifest_media_type(br#"{"blobs":[]}"#).as_deref(),
            Some(OCI_ARTIFACT_MANIFEST)
        );
        assert_eq!(
            manifest_media_type(br#"{"schemaVersion":2,"layers":[]}"#).as_deref(),
            Some(OCI_MANIFEST)
        );
        assert_eq!(manifest_media_type(b"not json"), None);
    }
}
