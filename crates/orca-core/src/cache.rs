//! Pull-through cache in front of a remote target.
//!
//! Digest-addressed content is served from the [`LocalStore`] when present
//! and otherwise fetched from the remote, verified, stored and returned.
//! Tags are never answered locally: a tag may have moved since the last
//! run, so every `resolve` goes to the remote.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, instrument, warn};

use crate::Result;
use crate::descriptor::Descriptor;
use crate::digest::{ensure_verified, verify};
use crate::store::LocalStore;
use crate::target::ReadOnlyTarget;

/// Counters for a [`CacheTarget`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Fetches answered from the local store.
    pub hits: u64,
    /// Fetches that went to the remote.
    pub misses: u64,
    /// Local entries removed because they failed re-verification.
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

/// A [`ReadOnlyTarget`] that caches digest-addressed content locally.
pub struct CacheTarget<R> {
    remote: R,
    store: Arc<LocalStore>,
    verify_on_read: bool,
    counters: Counters,
}

impl<R: ReadOnlyTarget> CacheTarget<R> {
    /// Wrap `remote` with `store` as its cache.
    pub fn new(remote: R, store: Arc<LocalStore>) -> Self {
        Self {
            remote,
            store,
            verify_on_read: false,
            counters: Counters::default(),
        }
    }

    /// Re-hash cached content on every hit. An entry that no longer matches
    /// its digest is removed and fetched again from the remote.
    #[must_use]
    pub const fn verify_on_read(mut self, enabled: bool) -> Self {
        self.verify_on_read = enabled;
        self
    }

    /// The local store backing this cache.
    #[must_use]
    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// The wrapped remote target.
    #[must_use]
    pub const fn remote(&self) -> &R {
        &self.remote
    }

    /// Hit, miss and eviction counts since construction.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
        }
    }

    async fn read_local(&self, descriptor: &Descriptor) -> Result<Option<Bytes>> {
        if !self.store.contains(descriptor).await? {
            return Ok(None);
        }
        let content = self.store.read(descriptor).await?;
        if self.verify_on_read && !verify(descriptor, &content) {
            warn!(
                digest = %descriptor.digest,
                root = %self.store.root().display(),
                "Cached content failed verification, evicting"
            );
            self.store.remove(&descriptor.digest).await?;
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }
        Ok(Some(content))
    }
}

#[async_trait]
impl<R: ReadOnlyTarget> ReadOnlyTarget for CacheTarget<R> {
    async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        if self.store.contains(descriptor).await? {
            return Ok(true);
        }
        self.remote.exists(descriptor).await
    }

    #[instrument(skip(self, descriptor), fields(digest = %descriptor.digest))]
    async fn fetch(&self, descriptor: &Descriptor) -> Result<Bytes> {
        if let Some(content) = self.read_local(descriptor).await? {
            debug!("Cache hit");
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(content);
        }

        debug!("Cache miss");
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        let content = self.remote.fetch(descriptor).await?;
        ensure_verified(descriptor, &content)?;
        self.store.store(descriptor, content.clone()).await?;
        Ok(content)
    }

    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        self.remote.resolve(reference).await
    }
}
