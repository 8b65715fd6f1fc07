//! Content descriptors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use crate::digest::Digest;

/// OCI image manifest.
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index.
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// OCI artifact manifest (deprecated in image-spec 1.1, still served by some registries).
pub const OCI_ARTIFACT_MANIFEST: &str = "application/vnd.oci.artifact.manifest.v1+json";
/// Docker image manifest, schema 2.
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker manifest list.
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
/// Fallback media type for opaque blobs.
pub const DEFAULT_BLOB: &str = "application/octet-stream";

/// Media types accepted when resolving or fetching manifests.
pub const MANIFEST_MEDIA_TYPES: &[&str] = &[
    OCI_MANIFEST,
    OCI_INDEX,
    OCI_ARTIFACT_MANIFEST,
    DOCKER_MANIFEST,
    DOCKER_MANIFEST_LIST,
];

/// Annotation naming the file a blob materializes as.
pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";
/// Annotation marking a titled blob as a gzip tarball to unpack into a directory.
pub const ANNOTATION_UNPACK: &str = "io.deis.oras.content.unpack";

/// Immutable description of a piece of content.
///
/// Identity is the digest: two descriptors compare equal when their digests
/// do, regardless of media type, size or annotations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: String,
    /// Digest of the content.
    pub digest: Digest,
    /// Size in bytes.
    pub size: i64,
    /// Optional annotations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    /// Create a descriptor.
    #[must_use]
    pub fn new(media_type: impl Into<String>, digest: Digest, size: i64) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
            annotations: None,
        }
    }

    /// Describe `content`, computing its SHA-256 digest and size.
    #[must_use]
    pub fn from_bytes(media_type: impl Into<String>, content: &[u8]) -> Self {
        Self::new(
            media_type,
            Digest::sha256_of(content),
            i64::try_from(content.len()).unwrap_or(i64::MAX),
        )
    }

    /// Builder-style annotation setter.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Look up an annotation.
    #[must_use]
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// The `org.opencontainers.image.title` annotation, if present and non-empty.
    #[must_use]
    pub fn title(&self) -> Option<&str> {
        self.annotation(ANNOTATION_TITLE).filter(|t| !t.is_empty())
    }

    /// Whether this describes a manifest or index (served from `/manifests/`).
    #[must_use]
    pub fn is_manifest(&self) -> bool {
        is_manifest_media_type(&self.media_type)
    }
}

impl PartialEq for Descriptor {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for Descriptor {}

impl Hash for Descriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

/// Whether `media_type` names a manifest or index.
#[must_use]
pub fn is_manifest_media_type(media_type: &str) -> bool {
    // Registries sometimes append parameters (`; charset=utf-8`).
    let base = media_type.split(';').next().unwrap_or_default().trim();
    MANIFEST_MEDIA_TYPES.contains(&base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_from_bytes() {
        let desc = Descriptor::from_bytes(DEFAULT_BLOB, b"hello");
        assert_eq!(desc.size, 5);
        assert_eq!(
            desc.digest.to_string(),
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert!(desc.annotations.is_none());
    }

    #[test]
    fn test_equality_is_digest_equality() {
        let a = Descriptor::from_bytes(DEFAULT_BLOB, b"same");
        let b = Descriptor::from_bytes(OCI_MANIFEST, b"same").with_annotation(ANNOTATION_TITLE, "x");
        let c = Descriptor::from_bytes(DEFAULT_BLOB, b"other");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let set: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_title() {
        let desc = Descriptor::from_bytes(DEFAULT_BLOB, b"x");
        assert_eq!(desc.title(), None);
        let desc = desc.with_annotation(ANNOTATION_TITLE, "config.yaml");
        assert_eq!(desc.title(), Some("config.yaml"));
        let empty = Descriptor::from_bytes(DEFAULT_BLOB, b"x").with_annotation(ANNOTATION_TITLE, "");
        assert_eq!(empty.title(), None);
    }

    #[test]
    fn test_is_manifest() {
        assert!(Descriptor::from_bytes(OCI_MANIFEST, b"{}").is_manifest());
        assert!(Descriptor::from_bytes(DOCKER_MANIFEST_LIST, b"{}").is_manifest());
        assert!(is_manifest_media_type(
            "application/vnd.oci.image.index.v1+json; charset=utf-8"
        ));
        assert!(!Descriptor::from_bytes(DEFAULT_BLOB, b"{}").is_manifest());
    }

    #[test]
    fn test_json_shape() {
        let desc = Descriptor::from_bytes(DEFAULT_BLOB, b"hello").with_annotation(ANNOTATION_TITLE, "hello.txt");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["mediaType"], DEFAULT_BLOB);
        assert_eq!(json["size"], 5);
        assert_eq!(json["annotations"][ANNOTATION_TITLE], "hello.txt");

        let plain = serde_json::to_value(Descriptor::from_bytes(DEFAULT_BLOB, b"")).unwrap();
        assert!(plain.get("annotations").is_none());
    }

    #[test]
    fn test_deserialize_ignores_unknown_fields() {
        let json = r#"{
            "mediaType": "application/vnd.oci.image.layer.v1.tar",
            "digest": "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
            "size": 0,
            "urls": ["https://example.com/layer"],
            "artifactType": "application/x-test"
        }"#;
        let desc: Descriptor = serde_json::from_str(json).unwrap();
        assert_eq!(desc.size, 0);
        assert_eq!(desc.media_type, "application/vnd.oci.image.layer.v1.tar");
    }
}
