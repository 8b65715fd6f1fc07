//! Shared helpers for orca-core integration tests.

// Not every test file uses every helper
#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use bytes::Bytes;
use orca_core::{
    ANNOTATION_TITLE, DEFAULT_BLOB, Descriptor, Error, OCI_MANIFEST, ReadOnlyTarget, Result,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Media type of the empty config blob.
pub const EMPTY_CONFIG: &str = "application/vnd.oci.empty.v1+json";

/// In-memory upstream whose tags and content can change between calls.
#[derive(Default)]
pub struct MemoryRemote {
    content: Mutex<HashMap<String, Bytes>>,
    tags: Mutex<HashMap<String, Descriptor>>,
    fetches: AtomicUsize,
    resolves: AtomicUsize,
}

impl MemoryRemote {
    /// Store `content` and return its descriptor.
    pub fn add(&self, media_type: &str, content: impl Into<Vec<u8>>) -> Descriptor {
        let content = content.into();
        let descriptor = Descriptor::from_bytes(media_type, &content);
        self.content
            .lock()
            .unwrap()
            .insert(descriptor.digest.to_string(), Bytes::from(content));
        descriptor
    }

    /// Replace what the registry serves for `descriptor`.
    pub fn tamper(&self, descriptor: &Descriptor, content: &'static [u8]) {
        self.content
            .lock()
            .unwrap()
            .insert(descriptor.digest.to_string(), Bytes::from_static(content));
    }

    /// Point `tag` at `descriptor`.
    pub fn tag(&self, tag: &str, descriptor: &Descriptor) {
        self.tags
            .lock()
            .unwrap()
            .insert(tag.to_string(), descriptor.clone());
    }

    /// Number of `fetch` calls so far.
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Number of `resolve` calls so far.
    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    /// Add an artifact made of titled text files and tag it.
    pub fn add_artifact(&self, tag: &str, files: &[(&str, &str)]) -> Descriptor {
        let config = self.add(EMPTY_CONFIG, b"{}".to_vec());
        let layers: Vec<Descriptor> = files
            .iter()
            .map(|(name, body)| {
                self.add(DEFAULT_BLOB, body.as_bytes().to_vec())
                    .with_annotation(ANNOTATION_TITLE, *name)
            })
            .collect();
        let root = self.add(OCI_MANIFEST, manifest_json(&config, &layers));
        self.tag(tag, &root);
        root
    }
}

#[async_trait]
impl ReadOnlyTarget for MemoryRemote {
    async fn exists(&self, descriptor: &Descriptor) -> Result<bool> {
        Ok(self
            .content
            .lock()
            .unwrap()
            .contains_key(&descriptor.digest.to_string()))
    }

    async fn fetch(&self, descriptor: &Descriptor) -> Result<Bytes> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        // Yield so concurrent callers actually interleave.
        tokio::task::yield_now().await;
        self.content
            .lock()
            .unwrap()
            .get(&descriptor.digest.to_string())
            .cloned()
            .ok_or_else(|| Error::not_found(descriptor.digest.to_string(), "memory remote"))
    }

    async fn resolve(&self, reference: &str) -> Result<Descriptor> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        self.tags
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::not_found(reference, "memory remote"))
    }
}

/// Serialize an image manifest with `config` and `layers`.
pub fn manifest_json(config: &Descriptor, layers: &[Descriptor]) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": OCI_MANIFEST,
        "config": config,
        "layers": layers,
    }))
    .unwrap()
}
