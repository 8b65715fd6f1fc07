//! The read contract shared by remote and cached targets, and the write side
//! used by materialization destinations.

use async_trait::async_trait;
use bytes::Bytes;

use crate::Result;
use crate::descriptor::Descriptor;

/// Read access to content in one repository.
///
/// Implemented by [`RemoteTarget`](crate::RemoteTarget),
/// [`CacheTarget`](crate::CacheTarget) and
/// [`LocalStore`](crate::LocalStore), so the graph walk in
/// [`copy`](crate::copy) is written once against this trait.
#[async_trait]
pub trait ReadOnlyTarget: Send + Sync {
    /// Whether content for `descriptor` is available from this target.
    async fn exists(&self, descriptor: &Descriptor) -> Result<bool>;

    /// Fetch the complete content for `descriptor`.
    async fn fetch(&self, descriptor: &Descriptor) -> Result<Bytes>;

    /// Resolve a tag or digest string to a descriptor.
    async fn resolve(&self, reference: &str) -> Result<Descriptor>;
}

/// Write access to a destination.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Whether `descriptor` has already been stored.
    async fn exists(&self, descriptor: &Descriptor) -> Result<bool>;

    /// Store already-verified `content` for `descriptor`.
    async fn push(&self, descriptor: &Descriptor, content: Bytes) -> Result<()>;
}

#[async_trait]
impl<T: ReadOnlyTarget + ?Sized> ReadOnlyTarget for Box<T> {
    async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        (**self).exists(descriptor).await
    }

    async fn fetch(&self, descriptor: &Descriptor) -> Result<Bytes> {
        (**self).fetch(descriptor).await
    }

    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        (**self).resolve(reference).await
    }
}

#[async_trait]
impl<T: ReadOnlyTarget + ?Sized> ReadOnlyTarget for std::sync::Arc<T> {
    async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        (**self).exists(descriptor).await
    }

    async fn fetch(&self, descriptor: &Descriptor) -> Result<Bytes> {
        (**self).fetch(descriptor).await
    }

    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        (**self).resolve(reference).await
    }
}
