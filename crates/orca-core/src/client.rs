//! The entry points a host calls: materialize an artifact into a directory,
//! or read one file out of it.

use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::cache::CacheTarget;
use crate::config::Config;
use crate::copy::{CopyOptions, copy};
use crate::credentials::{CredentialResolver, StaticCredentials};
use crate::descriptor::Descriptor;
use crate::digest::Digest;
use crate::file::FileStore;
use crate::reference::Reference;
use crate::remote::RegistryClient;
use crate::store::LocalStore;
use crate::target::ReadOnlyTarget;
use crate::{Error, Result};

/// One file read out of an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    /// File content.
    pub content: Bytes,
    /// sha256 of `content`.
    pub digest: Digest,
}

/// Registry client plus optional local cache.
///
/// Construct once and reuse: the connection pool, credential lookups and
/// registry tokens live as long as the client.
#[derive(Clone)]
pub struct Client {
    config: Config,
    registry: RegistryClient,
    store: Option<Arc<LocalStore>>,
}

impl Client {
    /// Create a client using the credentials in `config.registry_auth`.
    pub fn new(config: Config) -> Result<Self> {
        let resolver = StaticCredentials::from_config(&config.registry_auth)?;
        Self::with_resolver(config, Arc::new(resolver))
    }

    /// Create a client that looks credentials up through `resolver`.
    pub fn with_resolver(config: Config, resolver: Arc<dyn CredentialResolver>) -> Result<Self> {
        let registry = RegistryClient::new(&config.transport, resolver);
        let store = config
            .cache
            .as_ref()
            .map(|cache| LocalStore::open(&cache.root).map(Arc::new))
            .transpose()?;
        if let Some(store) = &store {
            debug!(root = %store.root().display(), "Using local cache");
        }
        Ok(Self {
            config,
            registry,
            store,
        })
    }

    /// The configuration this client was built with.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// The local cache, if enabled.
    #[must_use]
    pub fn cache(&self) -> Option<&LocalStore> {
        self.store.as_deref()
    }

    /// Parse `reference` and build the target to read it through: the
    /// registry itself, or the registry behind the local cache.
    pub fn target(&self, reference: &str) -> Result<(Reference, Box<dyn ReadOnlyTarget>)> {
        let parsed: Reference = reference.parse()?;
        let remote = self.registry.target(&parsed);

        let target: Box<dyn ReadOnlyTarget> = match (&self.store, &self.config.cache) {
            (Some(store), Some(cache)) => Box::new(
                CacheTarget::new(remote, Arc::clone(store)).verify_on_read(cache.verify_on_read),
            ),
            _ => Box::new(remote),
        };
        Ok((parsed, target))
    }

    /// Materialize `reference` into `destination`, returning the root descriptor.
    pub async fn materialize(
        &self,
        reference: &str,
        destination: impl AsRef<Path>,
    ) -> Result<Descriptor> {
        self.materialize_with(reference, destination, CancellationToken::new())
            .await
    }

    /// [`materialize`](Self::materialize) with a caller-controlled cancellation token.
    #[instrument(skip(self, destination, cancel), fields(destination = %destination.as_ref().display()))]
    pub async fn materialize_with(
        &self,
        reference: &str,
        destination: impl AsRef<Path>,
        cancel: CancellationToken,
    ) -> Result<Descriptor> {
        let (parsed, target) = self.target(reference)?;
        let store = FileStore::new(destination.as_ref())?;
        self.copy_into(&parsed, target.as_ref(), &store, cancel)
            .await
    }

    /// Read `filename` from the artifact at `reference`.
    ///
    /// The artifact is materialized into a scratch directory that is removed
    /// before this returns, whether it succeeds or not.
    pub async fn read_file(&self, reference: &str, filename: &str) -> Result<ArtifactFile> {
        self.read_file_with(reference, filename, CancellationToken::new())
            .await
    }

    /// [`read_file`](Self::read_file) with a caller-controlled cancellation token.
    #[instrument(skip(self, cancel))]
    pub async fn read_file_with(
        &self,
        reference: &str,
        filename: &str,
        cancel: CancellationToken,
    ) -> Result<ArtifactFile> {
        let (parsed, target) = self.target(reference)?;
        let scratch = TempDir::new().map_err(|e| Error::io_no_path(e, "create temp dir"))?;
        let store = FileStore::new(scratch.path())?;
        self.copy_into(&parsed, target.as_ref(), &store, cancel)
            .await?;

        let not_found = || Error::FileNotFound {
            reference: parsed.to_string(),
            filename: filename.to_string(),
        };
        let path = store.resolve_name(filename)?;
        if !path.is_file() {
            return Err(not_found());
        }
        let content = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => not_found(),
            _ => Error::io(e, &path, "read"),
        })?;

        let digest = Digest::sha256_of(&content);
        debug!(%filename, %digest, size = content.len(), "Read file from artifact");
        Ok(ArtifactFile {
            content: Bytes::from(content),
            digest,
        })
    }

    async fn copy_into(
        &self,
        reference: &Reference,
        target: &dyn ReadOnlyTarget,
        store: &FileStore,
        cancel: CancellationToken,
    ) -> Result<Descriptor> {
        let options = CopyOptions {
            concurrency: self.config.max_concurrency.max(1),
            cancel,
        };
        let locator = reference.target().to_string();
        let walk = copy(target, &locator, store, &options);

        let root = match self.config.operation_timeout() {
            Some(limit) => tokio::time::timeout(limit, walk).await.map_err(|_| {
                Error::cancelled(format!(
                    "{reference} did not complete within {}s",
                    limit.as_secs()
                ))
            })??,
            None => walk.await?,
        };

        info!(
            %reference,
            digest = %root.digest,
            files = store.files().len(),
            "Materialized artifact"
        );
        Ok(root)
    }
}
