//! Pull-through cache and registry client for OCI artifacts.
//!
//! This crate provides functionality to:
//! - Resolve artifact references (`host/repo:tag`, `host/repo@sha256:…`) against a registry
//! - Fetch manifests and blobs with digest verification at every trust boundary
//! - Cache digest-addressed content in a local store shared across runs
//! - Materialize a whole artifact into a directory, or read one file out of it
//!
//! # Example
//!
//! ```ignore
//! use orca_core::{Client, Config};
//!
//! let client = Client::new(Config::default().with_cache("/var/cache/orca"))?;
//!
//! // Lay the artifact out under ./out and get its manifest digest
//! let root = client.materialize("ghcr.io/org/bundle:v1", "./out").await?;
//!
//! // Or pull a single titled file
//! let file = client.read_file("ghcr.io/org/bundle:v1", "policy.rego").await?;
//! ```

#![warn(missing_docs)]

mod cache;
mod client;
mod config;
mod copy;
mod credentials;
mod descriptor;
mod digest;
mod error;
mod file;
mod manifest;
mod reference;
mod remote;
mod store;
mod target;
mod unpack;

pub use cache::{CacheStats, CacheTarget};
pub use client::{ArtifactFile, Client};
pub use config::{CacheConfig, Config, PlainHttp, RegistryAuthConfig, TransportConfig};
pub use copy::{CopyOptions, DEFAULT_CONCURRENCY, copy};
pub use credentials::{
    Anonymous, Credential, CredentialResolver, DOCKER_HUB_LOGIN_HOST, StaticCredentials,
    convert_to_hostname, docker_config_credential, login_hostname,
};
pub use descriptor::{
    ANNOTATION_TITLE, ANNOTATION_UNPACK, DEFAULT_BLOB, DOCKER_MANIFEST, DOCKER_MANIFEST_LIST,
    Descriptor, MANIFEST_MEDIA_TYPES, OCI_ARTIFACT_MANIFEST, OCI_INDEX, OCI_MANIFEST,
    is_manifest_media_type,
};
pub use digest::{Algorithm, Digest, ensure_verified, verify};
pub use error::{Error, ErrorKind, Result};
pub use file::FileStore;
pub use manifest::successors;
pub use reference::{Reference, ReferenceTarget, host_without_port, is_loopback_host};
pub use remote::transport::Scheme;
pub use remote::{RegistryClient, RemoteTarget};
pub use store::{LocalStore, default_root};
pub use target::{ReadOnlyTarget, Storage};
pub use unpack::unpack_tar_gz;
