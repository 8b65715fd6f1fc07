//! Manifest graph edges.
//!
//! Only the fields needed to find a node's children are parsed; everything
//! else in a manifest is carried opaquely as bytes.

use serde::Deserialize;

use crate::descriptor::{
    DOCKER_MANIFEST, DOCKER_MANIFEST_LIST, Descriptor, OCI_ARTIFACT_MANIFEST, OCI_INDEX,
    OCI_MANIFEST,
};
use crate::{Error, Result};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ManifestEdges {
    #[serde(default)]
    subject: Option<Descriptor>,
    #[serde(default)]
    config: Option<Descriptor>,
    #[serde(default)]
    layers: Vec<Descriptor>,
    #[serde(default)]
    manifests: Vec<Descriptor>,
    #[serde(default)]
    blobs: Vec<Descriptor>,
}

/// Child descriptors of `descriptor`, whose content is `content`.
///
/// Image manifests yield subject, config and layers; indexes and manifest
/// lists yield subject and manifests; artifact manifests yield subject and
/// blobs. Any other media type is a leaf.
pub fn successors(descriptor: &Descriptor, content: &[u8]) -> Result<Vec<Descriptor>> {
    let media_type = descriptor
        .media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim();

    let kind = match media_type {
        OCI_MANIFEST | DOCKER_MANIFEST => Kind::Image,
        OCI_INDEX | DOCKER_MANIFEST_LIST => Kind::Index,
        OCI_ARTIFACT_MANIFEST => Kind::Artifact,
        _ => return Ok(Vec::new()),
    };

    let edges: ManifestEdges = serde_json::from_slice(content)
        .map_err(|e| Error::invalid_manifest(descriptor.digest.to_string(), e.to_string()))?;

    let mut children: Vec<Descriptor> = edges.subject.into_iter().collect();
    match kind {
        Kind::Image => {
            let config = edges.config.ok_or_else(|| {
                Error::invalid_manifest(descriptor.digest.to_string(), "missing config descriptor")
            })?;
            children.push(config);
            children.extend(edges.layers);
        }
        Kind::Index => children.extend(edges.manifests),
        Kind::Artifact => children.extend(edges.blobs),
    }
    Ok(children)
}

enum Kind {
    Image,
    Index,
    Artifact,
}
