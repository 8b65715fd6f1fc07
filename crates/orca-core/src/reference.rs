//! Artifact references: `host[:port]/repository[:tag][@digest]`.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::digest::Digest;
use crate::{Error, Result};

/// What a reference points at inside its repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ReferenceTarget {
    /// A mutable tag; must be re-resolved on every use.
    Tag(String),
    /// An immutable digest.
    Digest(Digest),
}

impl fmt::Display for ReferenceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(tag) => f.write_str(tag),
            Self::Digest(digest) => write!(f, "{digest}"),
        }
    }
}

/// A fully qualified artifact reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    registry: String,
    repository: String,
    target: ReferenceTarget,
}

impl Reference {
    /// Registry host, including any port.
    #[must_use]
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Repository path within the registry.
    #[must_use]
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Tag or digest.
    #[must_use]
    pub const fn target(&self) -> &ReferenceTarget {
        &self.target
    }

    /// The tag, if this is a tag reference.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        match &self.target {
            ReferenceTarget::Tag(tag) => Some(tag),
            ReferenceTarget::Digest(_) => None,
        }
    }

    /// The digest, if this is a digest reference.
    #[must_use]
    pub const fn digest(&self) -> Option<&Digest> {
        match &self.target {
            ReferenceTarget::Digest(digest) => Some(digest),
            ReferenceTarget::Tag(_) => None,
        }
    }

    /// `registry/repository`, without tag or digest.
    #[must_use]
    pub fn locator(&self) -> String {
        format!("{}/{}", self.registry, self.repository)
    }

    /// The same repository at another tag or digest.
    #[must_use]
    pub fn with_target(&self, target: ReferenceTarget) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            target,
        }
    }

    /// Whether the registry lives on a loopback address.
    #[must_use]
    pub fn is_loopback(&self) -> bool {
        is_loopback_host(&self.registry)
    }
}

impl FromStr for Reference {
    type Err = Error;

    /// Parse with the distribution grammar, additionally requiring an
    /// explicit registry host and an explicit tag or digest.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = |message: &str| Error::invalid_reference(s, message);

        let (host, _) = s
            .split_once('/')
            .ok_or_else(|| invalid("missing registry host"))?;
        if !(host.contains('.') || host.contains(':') || host == "localhost") {
            return Err(invalid(
                "first path component must be a registry host (e.g. `ghcr.io`)",
            ));
        }
        let last = s.rsplit('/').next().unwrap_or(s);
        if !s.contains('@') && !last.contains(':') {
            return Err(invalid("missing tag or digest"));
        }

        let parsed: oci_distribution::Reference = s
            .parse()
            .map_err(|e: oci_distribution::ParseError| invalid(&e.to_string()))?;

        let target = match (parsed.digest(), parsed.tag()) {
            (Some(digest), _) => ReferenceTarget::Digest(digest.parse()?),
            (None, Some(tag)) => ReferenceTarget::Tag(tag.to_string()),
            (None, None) => return Err(invalid("missing tag or digest")),
        };

        Ok(Self {
            registry: parsed.registry().to_string(),
            repository: parsed.repository().to_string(),
            target,
        })
    }
}

impl From<&Reference> for oci_distribution::Reference {
    fn from(reference: &Reference) -> Self {
        let registry = reference.registry.clone();
        let repository = reference.repository.clone();
        match &reference.target {
            ReferenceTarget::Tag(tag) => Self::with_tag(registry, repository, tag.clone()),
            ReferenceTarget::Digest(digest) => {
                Self::with_digest(registry, repository, digest.to_string())
            }
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            ReferenceTarget::Tag(tag) => write!(f, "{}/{}:{}", self.registry, self.repository, tag),
            ReferenceTarget::Digest(d) => write!(f, "{}/{}@{}", self.registry, self.repository, d),
        }
    }
}

/// Strip the port from `host[:port]`, keeping bracketed IPv6 literals intact.
#[must_use]
pub fn host_without_port(registry: &str) -> &str {
    if let Some(rest) = registry.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }
    registry.split(':').next().unwrap_or(registry)
}

/// Whether `registry` (with or without port) is a loopback host.
#[must_use]
pub fn is_loopback_host(registry: &str) -> bool {
    let host = host_without_port(registry);
    host.eq_ignore_ascii_case("localhost")
        || host.parse::<IpAddr>().is_ok_and(|ip| ip.is_loopback())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_parse_tag_reference() {
        let r: Reference = "ghcr.io/distroless/static:nonroot".parse().unwrap();
        assert_eq!(r.registry(), "ghcr.io");
        assert_eq!(r.repository(), "distroless/static");
        assert_eq!(r.tag(), Some("nonroot"));
        assert!(r.digest().is_none());
    }

    #[test]
    fn test_parse_digest_reference() {
        let r: Reference = format!("registry.example.com/org/repo@{DIGEST}").parse().unwrap();
        assert_eq!(r.repository(), "org/repo");
        assert_eq!(r.digest().map(ToString::to_string), Some(DIGEST.to_string()));
    }

    #[test]
    fn test_digest_wins_over_tag() {
        let r: Reference = format!("registry.example.com/repo:v1@{DIGEST}").parse().unwrap();
        assert!(r.tag().is_none());
        assert!(r.digest().is_some());
    }

    #[test]
    fn test_parse_with_port() {
        let r: Reference = "localhost:5000/myartifact:v1".parse().unwrap();
        assert_eq!(r.registry(), "localhost:5000");
        assert_eq!(r.repository(), "myartifact");
        assert!(r.is_loopback());
    }

    #[test]
    fn test_parse_requires_host() {
        assert!("nginx:latest".parse::<Reference>().is_err());
        assert!("library/nginx:latest".parse::<Reference>().is_err());
    }

    #[test]
    fn test_parse_requires_tag_or_digest() {
        let err = "ghcr.io/org/repo".parse::<Reference>().unwrap_err();
        assert!(err.to_string().contains("missing tag or digest"));
    }

    #[test]
    fn test_parse_invalid() {
        assert!("not a valid reference!!!".parse::<Reference>().is_err());
        assert!("ghcr.io/Org/Repo:v1".parse::<Reference>().is_err());
        assert!("ghcr.io/org/repo:-bad".parse::<Reference>().is_err());
        assert!("ghcr.io/org/repo@sha256:short".parse::<Reference>().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for s in [
            "ghcr.io/org/repo:v2.0.0",
            "127.0.0.1:5000/a/b/c:latest",
            &format!("registry.example.com/org/repo@{DIGEST}"),
        ] {
            let r: Reference = s.parse().unwrap();
            assert_eq!(r.to_string(), s);
        }
    }

    #[test]
    fn test_into_distribution_reference() {
        let tagged: Reference = "127.0.0.1:5000/org/repo:v1".parse().unwrap();
        let oci = oci_distribution::Reference::from(&tagged);
        assert_eq!(oci.registry(), "127.0.0.1:5000");
        assert_eq!(oci.repository(), "org/repo");
        assert_eq!(oci.tag(), Some("v1"));

        let pinned: Reference = format!("ghcr.io/org/repo@{DIGEST}").parse().unwrap();
        let oci = oci_distribution::Reference::from(&pinned);
        assert_eq!(oci.digest(), Some(DIGEST));
        assert_eq!(oci.tag(), None);
    }

    #[test]
    fn test_with_target_keeps_repository() {
        let r: Reference = "ghcr.io/org/repo:v1".parse().unwrap();
        let pinned = r.with_target(ReferenceTarget::Digest(DIGEST.parse().unwrap()));
        assert_eq!(pinned.to_string(), format!("ghcr.io/org/repo@{DIGEST}"));
        assert_eq!(pinned.locator(), r.locator());
    }

    #[test]
    fn test_loopback_detection() {
        assert!(is_loopback_host("127.0.0.1:8080"));
        assert!(is_loopback_host("127.1.2.3"));
        assert!(is_loopback_host("[::1]:5000"));
        assert!(is_loopback_host("LOCALHOST"));
        assert!(!is_loopback_host("registry.example.com"));
        assert!(!is_loopback_host("10.0.0.1:5000"));
    }
}
