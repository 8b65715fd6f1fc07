//! Materialization destination backed by a plain directory.
//!
//! Blobs carrying an `org.opencontainers.image.title` annotation become
//! files (or, when marked for unpacking, directories) named by that title.
//! Everything else, such as manifests and config blobs, is kept in memory
//! keyed by digest.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::descriptor::{ANNOTATION_UNPACK, Descriptor};
use crate::digest::Digest;
use crate::target::Storage;
use crate::unpack::{is_safe_relative, unpack_tar_gz};
use crate::{Error, Result};

/// A directory that titled blobs are written into.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    names: Mutex<BTreeMap<String, Digest>>,
    fallback: Mutex<HashMap<Digest, Bytes>>,
}

impl FileStore {
    /// Use `root` as the destination, creating it if needed.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| Error::io(e, &root, "create directory"))?;
        Ok(Self {
            root,
            names: Mutex::new(BTreeMap::new()),
            fallback: Mutex::new(HashMap::new()),
        })
    }

    /// The destination directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a title maps to, or [`Error::UnsafePath`] if it would escape the root.
    pub fn resolve_name(&self, name: &str) -> Result<PathBuf> {
        if !is_safe_relative(Path::new(name)) {
            return Err(Error::UnsafePath {
                name: name.to_string(),
            });
        }
        Ok(self.root.join(name))
    }

    /// Titles written so far, with the digest of their content.
    #[must_use]
    pub fn files(&self) -> Vec<(String, Digest)> {
        lock(&self.names)
            .map(|names| names.iter().map(|(n, d)| (n.clone(), d.clone())).collect())
            .unwrap_or_default()
    }

    /// Untitled content pushed into this store.
    #[must_use]
    pub fn untitled(&self, digest: &Digest) -> Option<Bytes> {
        lock(&self.fallback).ok()?.get(digest).cloned()
    }

    /// Reserve `name` for `digest`. Returns `false` if it is already written
    /// with the same content.
    fn claim(&self, name: &str, digest: &Digest) -> Result<bool> {
        let mut names = lock(&self.names)?;
        match names.get(name) {
            Some(existing) if existing == digest => Ok(false),
            Some(_) => Err(Error::DuplicateName {
                name: name.to_string(),
            }),
            None => {
                names.insert(name.to_string(), digest.clone());
                Ok(true)
            }
        }
    }

    fn release(&self, name: &str) {
        if let Ok(mut names) = lock(&self.names) {
            names.remove(name);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::configuration("file store state lock poisoned"))
}

fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create directory"))?;

    let mut tmp =
        NamedTempFile::new_in(parent).map_err(|e| Error::io(e, parent, "create temp file"))?;
    tmp.write_all(content)
        .map_err(|e| Error::io(e, tmp.path(), "write"))?;
    tmp.persist(path)
        .map_err(|e| Error::io(e.error, path, "rename"))?;
    Ok(())
}

#[async_trait]
impl Storage for FileStore {
    async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        match descriptor.title() {
            Some(name) => Ok(lock(&self.names)?.get(name) == Some(&descriptor.digest)),
            None => Ok(lock(&self.fallback)?.contains_key(&descriptor.digest)),
        }
    }

    async fn push(&self, descriptor: &Descriptor, content: Bytes) -> Result<()> {
        let Some(name) = descriptor.title() else {
            lock(&self.fallback)?.insert(descriptor.digest.clone(), content);
            return Ok(());
        };

        let path = self.resolve_name(name)?;
        if !self.claim(name, &descriptor.digest)? {
            return Ok(());
        }

        let unpack = descriptor.annotation(ANNOTATION_UNPACK) == Some("true");
        let target = path.clone();
        let result = tokio::task::spawn_blocking(move || {
            if unpack {
                unpack_tar_gz(&content, &target)
            } else {
                write_file(&target, &content)
            }
        })
        .await
        .map_err(|e| Error::io_no_path(std::io::Error::other(e), "join file write task"))
        .and_then(|r| r);

        if result.is_err() {
            self.release(name);
        }
        result?;

        debug!(%name, digest = %descriptor.digest, ?path, unpack, "Wrote file");
        Ok(())
    }
}
