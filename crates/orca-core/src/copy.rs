//! Manifest graph walk.
//!
//! Starting from a resolved root, every node is fetched, verified and parsed
//! for successors; successors are copied concurrently and the node itself is
//! pushed to the destination once they are done. Each digest is visited at
//! most once per walk even when several parents reference it.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, TryStreamExt};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::descriptor::Descriptor;
use crate::digest::{Digest, ensure_verified};
use crate::manifest::successors;
use crate::target::{ReadOnlyTarget, Storage};
use crate::{Error, Result};

/// Default number of nodes fetched at once.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Options for [`copy`].
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Maximum number of fetches in flight.
    pub concurrency: usize,
    /// Cancels the walk; checked around every fetch, existence check and push.
    pub cancel: CancellationToken,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            cancel: CancellationToken::new(),
        }
    }
}

/// Copy the graph rooted at `reference` from `source` into `destination`.
///
/// Returns the root descriptor. The first error aborts the walk; in-flight
/// siblings are dropped.
#[instrument(skip(source, destination, options))]
pub async fn copy<S, D>(
    source: &S,
    reference: &str,
    destination: &D,
    options: &CopyOptions,
) -> Result<Descriptor>
where
    S: ReadOnlyTarget + ?Sized,
    D: Storage + ?Sized,
{
    let root = cancellable(&options.cancel, source.resolve(reference)).await?;
    debug!(digest = %root.digest, media_type = %root.media_type, "Resolved root");

    let concurrency = options.concurrency.max(1);
    let walk = Walk {
        source,
        destination,
        cancel: &options.cancel,
        concurrency,
        permits: Semaphore::new(concurrency),
        claimed: Mutex::new(HashSet::new()),
    };
    walk.copy_node(root.clone()).await?;
    Ok(root)
}

/// Race `future` against `cancel`.
async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(Error::cancelled("copy cancelled")),
        result = future => result,
    }
}

struct Walk<'a, S: ?Sized, D: ?Sized> {
    source: &'a S,
    destination: &'a D,
    cancel: &'a CancellationToken,
    concurrency: usize,
    permits: Semaphore,
    claimed: Mutex<HashSet<Digest>>,
}

impl<'a, S, D> Walk<'a, S, D>
where
    S: ReadOnlyTarget + ?Sized,
    D: Storage + ?Sized,
{
    fn claim(&self, digest: &Digest) -> Result<bool> {
        let mut claimed = self
            .claimed
            .lock()
            .map_err(|_| Error::configuration("copy state lock poisoned"))?;
        Ok(claimed.insert(digest.clone()))
    }

    fn copy_node<'w>(&'w self, descriptor: Descriptor) -> BoxFuture<'w, Result<()>>
    where
        'a: 'w,
    {
        async move {
            if !self.claim(&descriptor.digest)? {
                trace!(digest = %descriptor.digest, "Already visited");
                return Ok(());
            }
            if cancellable(self.cancel, self.destination.exists(&descriptor)).await? {
                trace!(digest = %descriptor.digest, "Already in destination");
                return Ok(());
            }

            let content = {
                let _permit = cancellable(self.cancel, async {
                    self.permits
                        .acquire()
                        .await
                        .map_err(|_| Error::cancelled("copy permits closed"))
                })
                .await?;
                cancellable(self.cancel, self.source.fetch(&descriptor)).await?
            };
            ensure_verified(&descriptor, &content)?;

            let children = successors(&descriptor, &content)?;
            if !children.is_empty() {
                trace!(digest = %descriptor.digest, count = children.len(), "Copying successors");
                stream::iter(children.into_iter().map(Ok::<_, Error>))
                    .try_for_each_concurrent(self.concurrency, |child| self.copy_node(child))
                    .await?;
            }

            cancellable(self.cancel, self.destination.push(&descriptor, content)).await?;
            trace!(digest = %descriptor.digest, "Copied");
            Ok(())
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ANNOTATION_TITLE, DEFAULT_BLOB, OCI_INDEX, OCI_MANIFEST};
    use crate::file::FileStore;
    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct MemoryTarget {
        content: HashMap<String, Bytes>,
        tags: HashMap<String, Descriptor>,
        fetches: AtomicUsize,
    }

    impl MemoryTarget {
        fn add(&mut self, media_type: &str, content: Vec<u8>) -> Descriptor {
            let desc = Descriptor::from_bytes(media_type, &content);
            self.content.insert(desc.digest.to_string(), Bytes::from(content));
            desc
        }
    }

    #[async_trait]
    impl ReadOnlyTarget for MemoryTarget {
        async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
            Ok(self.content.contains_key(&descriptor.digest.to_string()))
        }

        async fn fetch(&self, descriptor: &Descriptor) -> Result<Bytes> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            self.content
                .get(&descriptor.digest.to_string())
                .cloned()
                .ok_or_else(|| Error::not_found(descriptor.digest.to_string(), "memory"))
        }

        async fn resolve(&self, reference: &str) -> Result<Descriptor> {
            self.tags
                .get(reference)
                .cloned()
                .ok_or_else(|| Error::not_found(reference, "memory"))
        }
    }

    fn manifest(layers: &[Descriptor]) -> Vec<u8> {
        let config = Descriptor::from_bytes("application/vnd.oci.empty.v1+json", b"{}");
        serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": OCI_MANIFEST,
            "config": config,
            "layers": layers,
        }))
        .unwrap()
    }

    fn artifact() -> (MemoryTarget, Descriptor) {
        let mut source = MemoryTarget::default();
        source.add("application/vnd.oci.empty.v1+json", b"{}".to_vec());
        let a = source
            .add(DEFAULT_BLOB, b"aaa".to_vec())
            .with_annotation(ANNOTATION_TITLE, "a.txt");
        let b = source
            .add(DEFAULT_BLOB, b"bbb".to_vec())
            .with_annotation(ANNOTATION_TITLE, "b.txt");
        let root = source.add(OCI_MANIFEST, manifest(&[a, b]));
        source.tags.insert("v1".into(), root.clone());
        (source, root)
    }

    #[tokio::test]
    async fn test_copy_materializes_titled_blobs() {
        let (source, root) = artifact();
        let temp = TempDir::new().unwrap();
        let dest = FileStore::new(temp.path()).unwrap();

        let copied = copy(&source, "v1", &dest, &CopyOptions::default()).await.unwrap();
        assert_eq!(copied, root);
        assert_eq!(std::fs::read(temp.path().join("a.txt")).unwrap(), b"aaa");
        assert_eq!(std::fs::read(temp.path().join("b.txt")).unwrap(), b"bbb");
        assert!(dest.untitled(&root.digest).is_some());
        // manifest + config + two layers
        assert_eq!(source.fetches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_shared_child_fetched_once() {
        let mut source = MemoryTarget::default();
        source.add("application/vnd.oci.empty.v1+json", b"{}".to_vec());
        let shared = source
            .add(DEFAULT_BLOB, b"shared".to_vec())
            .with_annotation(ANNOTATION_TITLE, "shared.bin");
        let m1 = source.add(OCI_MANIFEST, manifest(&[shared.clone()]));
        let mut m2_body: serde_json::Value = serde_json::from_slice(&manifest(&[shared])).unwrap();
        m2_body["annotations"] = json!({"variant": "two"});
        let m2 = source.add(OCI_MANIFEST, serde_json::to_vec(&m2_body).unwrap());
        let index = source.add(
            OCI_INDEX,
            serde_json::to_vec(&json!({"schemaVersion": 2, "manifests": [m1, m2]})).unwrap(),
        );
        source.tags.insert("multi".into(), index);

        let temp = TempDir::new().unwrap();
        let dest = FileStore::new(temp.path()).unwrap();
        copy(&source, "multi", &dest, &CopyOptions::default()).await.unwrap();

        // index + 2 manifests + config + shared blob, each once
        assert_eq!(source.fetches.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_missing_child_aborts() {
        let (mut source, root) = artifact();
        let layer_digest = serde_json::from_slice::<serde_json::Value>(
            &source.content[&root.digest.to_string()],
        )
        .unwrap()["layers"][0]["digest"]
            .as_str()
            .unwrap()
            .to_string();
        source.content.remove(&layer_digest);

        let temp = TempDir::new().unwrap();
        let dest = FileStore::new(temp.path()).unwrap();
        let err = copy(&source, "v1", &dest, &CopyOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
        // Root is pushed last, so it never reached the destination.
        assert!(dest.untitled(&root.digest).is_none());
    }

    #[tokio::test]
    async fn test_corrupt_child_aborts() {
        let (mut source, _root) = artifact();
        let key = source
            .content
            .iter()
            .find(|(_, v)| v.as_ref() == b"aaa")
            .map(|(k, _)| k.clone())
            .unwrap();
        source.content.insert(key, Bytes::from_static(b"zzz"));

        let temp = TempDir::new().unwrap();
        let dest = FileStore::new(temp.path()).unwrap();
        let err = copy(&source, "v1", &dest, &CopyOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::CorruptContent);
        assert!(!temp.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (source, _root) = artifact();
        let temp = TempDir::new().unwrap();
        let dest = FileStore::new(temp.path()).unwrap();
        let options = CopyOptions::default();
        options.cancel.cancel();

        let err = copy(&source, "v1", &dest, &options).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Cancelled);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 0);
    }
}
