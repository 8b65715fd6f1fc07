//! Error types for registry, cache and materialization operations.

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Result type for orca operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Reference or digest absent upstream or locally.
    NotFound,
    /// Credential rejected or missing for a private resource.
    Auth,
    /// Transport-level failure or unexpected registry response.
    Network,
    /// Content does not hash to its claimed digest.
    CorruptContent,
    /// Local filesystem failure.
    Io,
    /// Malformed input: reference, digest, manifest, configuration or path.
    Invalid,
    /// The operation was cancelled or ran past its deadline.
    Cancelled,
}

/// Errors that can occur while resolving, fetching or materializing artifacts.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// Failed to parse an artifact reference.
    #[error("Invalid reference '{reference}': {message}")]
    #[diagnostic(
        code(orca::reference::invalid),
        help("References look like `registry.example.com/org/repo:tag` or `host/repo@sha256:<hex>`")
    )]
    InvalidReference {
        /// The reference as given.
        reference: String,
        /// What is wrong with it.
        message: String,
    },

    /// Failed to parse a content digest.
    #[error("Invalid digest '{digest}': {message}")]
    #[diagnostic(code(orca::digest::invalid))]
    InvalidDigest {
        /// The digest as given.
        digest: String,
        /// What is wrong with it.
        message: String,
    },

    /// Reference, manifest or blob is absent.
    #[error("Not found: {what} ({context})")]
    #[diagnostic(code(orca::not_found))]
    NotFound {
        /// The reference or digest that was looked up.
        what: String,
        /// Where it was looked up (registry repository or local store).
        context: String,
    },

    /// Registry rejected the request or the credential.
    #[error("Authentication failed for registry '{host}': {message}")]
    #[diagnostic(
        code(orca::registry::auth),
        help("Check `registry_auth` in the configuration or the docker config file for this host")
    )]
    Auth {
        /// Registry hostname.
        host: String,
        /// Details from the registry.
        message: String,
    },

    /// Transport failure, timeout or unexpected registry status.
    #[error("Network error talking to '{host}': {message}")]
    #[diagnostic(code(orca::registry::network))]
    Network {
        /// Registry hostname.
        host: String,
        /// What went wrong.
        message: String,
    },

    /// Content did not hash to the digest it was requested by.
    #[error("Digest mismatch: expected {expected}, got {actual}")]
    #[diagnostic(
        code(orca::content::corrupt),
        help("The registry or a proxy returned different bytes than the descriptor claims; nothing was cached")
    )]
    CorruptContent {
        /// The digest the content was requested by.
        expected: String,
        /// The digest (and size) actually computed.
        actual: String,
    },

    /// I/O error on the cache or the destination directory.
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(orca::io),
        help("Check file permissions and free space for the cache and output directories")
    )]
    Io {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available.
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "rename").
        operation: String,
    },

    /// A manifest or index could not be parsed.
    #[error("Invalid manifest {digest}: {message}")]
    #[diagnostic(code(orca::manifest::invalid))]
    InvalidManifest {
        /// Digest of the offending manifest.
        digest: String,
        /// Parser message.
        message: String,
    },

    /// Configuration could not be loaded or is inconsistent.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(orca::config))]
    Configuration {
        /// What is wrong.
        message: String,
    },

    /// A title annotation would escape the destination directory.
    #[error("Refusing to write '{name}' outside of the destination directory")]
    #[diagnostic(code(orca::file::unsafe_path))]
    UnsafePath {
        /// The annotated name.
        name: String,
    },

    /// Two different blobs carry the same title annotation.
    #[error("Duplicate file name '{name}' in artifact")]
    #[diagnostic(code(orca::file::duplicate))]
    DuplicateName {
        /// The annotated name.
        name: String,
    },

    /// The requested file is not part of the materialized artifact.
    #[error("File '{filename}' not found in artifact '{reference}'")]
    #[diagnostic(
        code(orca::file::not_found),
        help("Only blobs carrying an `org.opencontainers.image.title` annotation appear as files")
    )]
    FileNotFound {
        /// The artifact reference.
        reference: String,
        /// The requested file name.
        filename: String,
    },

    /// The operation was cancelled or its deadline passed.
    #[error("Operation cancelled: {reason}")]
    #[diagnostic(code(orca::cancelled))]
    Cancelled {
        /// Why.
        reason: String,
    },
}

impl Error {
    /// Create an invalid reference error.
    #[must_use]
    pub fn invalid_reference(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            message: message.into(),
        }
    }

    /// Create an invalid digest error.
    #[must_use]
    pub fn invalid_digest(digest: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDigest {
            digest: digest.into(),
            message: message.into(),
        }
    }

    /// Create a not found error.
    #[must_use]
    pub fn not_found(what: impl Into<String>, context: impl Into<String>) -> Self {
        Self::NotFound {
            what: what.into(),
            context: context.into(),
        }
    }

    /// Create an authentication error.
    #[must_use]
    pub fn auth(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create a network error.
    #[must_use]
    pub fn network(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Network {
            host: host.into(),
            message: message.into(),
        }
    }

    /// Create a digest mismatch error.
    #[must_use]
    pub fn corrupt_content(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::CorruptContent {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an I/O error with path context.
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an I/O error without path context.
    #[must_use]
    pub fn io_no_path(source: std::io::Error, operation: impl Into<String>) -> Self {
        Self::Io {
            source,
            path: None,
            operation: operation.into(),
        }
    }

    /// Create an invalid manifest error.
    #[must_use]
    pub fn invalid_manifest(digest: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidManifest {
            digest: digest.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a cancellation error.
    #[must_use]
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Classify this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } | Self::FileNotFound { .. } => ErrorKind::NotFound,
            Self::Auth { .. } => ErrorKind::Auth,
            Self::Network { .. } => ErrorKind::Network,
            Self::CorruptContent { .. } => ErrorKind::CorruptContent,
            Self::Io { .. } => ErrorKind::Io,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::InvalidReference { .. }
            | Self::InvalidDigest { .. }
            | Self::InvalidManifest { .. }
            | Self::Configuration { .. }
            | Self::UnsafePath { .. }
            | Self::DuplicateName { .. } => ErrorKind::Invalid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_mismatch_error() {
        let err = Error::corrupt_content("sha256:expected", "sha256:actual");
        let msg = err.to_string();
        assert!(msg.contains("expected"));
        assert!(msg.contains("actual"));
        assert_eq!(err.kind(), ErrorKind::CorruptContent);
    }

    #[test]
    fn test_io_error_includes_path() {
        let err = Error::io(
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            "/var/cache/orca/blobs",
            "write",
        );
        let msg = err.to_string();
        assert!(msg.contains("write"));
        assert!(msg.contains("/var/cache/orca/blobs"));
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_io_error_without_path() {
        let err = Error::io_no_path(std::io::Error::other("boom"), "create temp dir");
        assert_eq!(err.to_string(), "I/O create temp dir failed");
    }

    #[test]
    fn test_not_found_carries_context() {
        let err = Error::not_found("sha256:abc", "registry.example.com/org/repo");
        let msg = err.to_string();
        assert!(msg.contains("sha256:abc"));
        assert!(msg.contains("registry.example.com/org/repo"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::auth("ghcr.io", "denied").kind(), ErrorKind::Auth);
        assert_eq!(
            Error::network("ghcr.io", "reset").kind(),
            ErrorKind::Network
        );
        assert_eq!(
            Error::invalid_reference("x", "y").kind(),
            ErrorKind::Invalid
        );
        assert_eq!(Error::cancelled("deadline").kind(), ErrorKind::Cancelled);
    }
}
