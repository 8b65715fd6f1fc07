//! Content-addressed local store used as the pull-through cache.
//!
//! Blobs are stored by digest, ensuring:
//! - Same digest = same bytes, so entries are never rewritten
//! - Deduplication across references and repositories
//! - Fast cache hits without network requests
//!
//! Writes go to an exclusive temporary file under `ingest/` and are renamed
//! into place only after the digest has been verified, so a partially
//! written entry is never visible to [`LocalStore::contains`] or
//! [`LocalStore::read`]. Two writers racing on the same digest both
//! succeed; the second rename replaces identical bytes.

use async_trait::async_trait;
use bytes::Bytes;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, trace, warn};

use crate::descriptor::Descriptor;
use crate::digest::{Digest, ensure_verified};
use crate::target::{ReadOnlyTarget, Storage};
use crate::{Error, Result};

const OCI_LAYOUT_FILE: &str = "oci-layout";
const OCI_LAYOUT_CONTENT: &str = r#"{"imageLayoutVersion":"1.0.0"}"#;

/// Content-addressed store rooted at a directory.
///
/// Default location: `~/.cache/orca/`
///
/// Structure:
/// ```text
/// ~/.cache/orca/
/// ├── oci-layout
/// ├── blobs/
/// │   └── sha256/
/// │       └── abc123...       # Raw content
/// ├── descriptors/
/// │   └── sha256/
/// │       └── abc123....json  # Descriptor recorded at store time
/// └── ingest/                 # Temporary files, renamed into blobs/
/// ```
#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Open (creating if needed) a store at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { root: root.into() };
        store.ensure_dirs()?;
        Ok(store)
    }

    /// Get the store root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Get the path for a stored blob.
    #[must_use]
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join("blobs")
            .join(digest.algorithm().as_str())
            .join(digest.hex())
    }

    /// Get the path for the descriptor recorded alongside a blob.
    #[must_use]
    pub fn descriptor_path(&self, digest: &Digest) -> PathBuf {
        self.root
            .join("descriptors")
            .join(digest.algorithm().as_str())
            .join(format!("{}.json", digest.hex()))
    }

    fn ingest_dir(&self) -> PathBuf {
        self.root.join("ingest")
    }

    /// Ensure store directories and the layout marker exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.root.join("blobs").join("sha256"),
            self.root.join("descriptors").join("sha256"),
            self.ingest_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| Error::io(e, &dir, "create directory"))?;
        }
        let marker = self.root.join(OCI_LAYOUT_FILE);
        if !marker.exists() {
            std::fs::write(&marker, OCI_LAYOUT_CONTENT)
                .map_err(|e| Error::io(e, &marker, "write"))?;
        }
        Ok(())
    }

    /// Whether a complete entry for `descriptor` is present.
    pub async fn contains(&self, descriptor: &Descriptor) -> Result<bool> {
        let path = self.blob_path(&descriptor.digest);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => {
                let complete = meta.is_file()
                    && u64::try_from(descriptor.size).is_ok_and(|size| size == meta.len());
                if !complete {
                    warn!(digest = %descriptor.digest, ?path, "Ignoring store entry with unexpected size");
                }
                Ok(complete)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::io(e, &path, "stat")),
        }
    }

    /// Read the stored content for `descriptor`.
    pub async fn read(&self, descriptor: &Descriptor) -> Result<Bytes> {
        let path = self.blob_path(&descriptor.digest);
        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(
                    descriptor.digest.to_string(),
                    format!("local store {}", self.root.display()),
                ));
            }
            Err(e) => return Err(Error::io(e, &path, "read")),
        };

        if !usize::try_from(descriptor.size).is_ok_and(|size| size == content.len()) {
            return Err(Error::corrupt_content(
                format!("{} ({} bytes)", descriptor.digest, descriptor.size),
                format!("{} bytes in {}", content.len(), path.display()),
            ));
        }
        trace!(digest = %descriptor.digest, "Read blob from store");
        Ok(Bytes::from(content))
    }

    /// Verify and atomically publish `content` under its digest.
    pub async fn store(&self, descriptor: &Descriptor, content: Bytes) -> Result<()> {
        ensure_verified(descriptor, &content)?;

        let store = self.clone();
        let descriptor = descriptor.clone();
        tokio::task::spawn_blocking(move || store.publish(&descriptor, &content))
            .await
            .map_err(|e| Error::io_no_path(std::io::Error::other(e), "join store task"))?
    }

    fn publish(&self, descriptor: &Descriptor, content: &[u8]) -> Result<()> {
        let dest = self.blob_path(&descriptor.digest);
        self.write_atomic(&dest, content)?;

        let metadata = serde_json::to_vec(descriptor).map_err(|e| {
            Error::io_no_path(std::io::Error::other(e), "serialize descriptor metadata")
        })?;
        self.write_atomic(&self.descriptor_path(&descriptor.digest), &metadata)?;

        debug!(digest = %descriptor.digest, ?dest, "Stored blob");
        Ok(())
    }

    /// Write to an exclusive temp file in `ingest/`, fsync, then rename onto `dest`.
    fn write_atomic(&self, dest: &Path, content: &[u8]) -> Result<()> {
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::io(e, parent, "create directory"))?;
        }
        let ingest = self.ingest_dir();
        std::fs::create_dir_all(&ingest).map_err(|e| Error::io(e, &ingest, "create directory"))?;

        let mut tmp =
            NamedTempFile::new_in(&ingest).map_err(|e| Error::io(e, &ingest, "create temp file"))?;
        tmp.write_all(content)
            .map_err(|e| Error::io(e, tmp.path(), "write"))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| Error::io(e, tmp.path(), "sync"))?;

        match tmp.persist(dest) {
            Ok(_) => Ok(()),
            // Another writer won the race with identical content.
            Err(err) if dest.is_file() => {
                trace!(?dest, error = %err.error, "Entry already published");
                Ok(())
            }
            Err(err) => Err(Error::io(err.error, dest, "rename")),
        }
    }

    /// The descriptor recorded when `digest` was stored, if any.
    pub async fn descriptor(&self, digest: &Digest) -> Result<Option<Descriptor>> {
        let path = self.descriptor_path(digest);
        match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| Error::io(std::io::Error::other(e), &path, "parse descriptor metadata")),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::io(e, &path, "read")),
        }
    }

    /// Remove the entry for `digest`. Missing entries are not an error.
    pub async fn remove(&self, digest: &Digest) -> Result<()> {
        for path in [self.blob_path(digest), self.descriptor_path(digest)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::io(e, &path, "remove")),
            }
        }
        debug!(%digest, "Removed store entry");
        Ok(())
    }
}

#[async_trait]
impl ReadOnlyTarget for LocalStore {
    async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        self.contains(descriptor).await
    }

    async fn fetch(&self, descriptor: &Descriptor) -> Result<Bytes> {
        self.read(descriptor).await
    }

    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        let context = format!("local store {}", self.root.display());
        let Ok(digest) = reference.parse::<Digest>() else {
            return Err(Error::not_found(reference, context));
        };
        match self.descriptor(&digest).await? {
            Some(descriptor) if self.contains(&descriptor).await? => Ok(descriptor),
            _ => Err(Error::not_found(reference, context)),
        }
    }
}

#[async_trait]
impl Storage for LocalStore {
    async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        self.contains(descriptor).await
    }

    async fn push(&self, descriptor: &Descriptor, content: Bytes) -> Result<()> {
        self.store(descriptor, content).await
    }
}

/// Default store root: `<user cache dir>/orca`.
#[must_use]
pub fn default_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".cache"))
        .join("orca")
}
