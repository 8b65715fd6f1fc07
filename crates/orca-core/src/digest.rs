//! Content digests and verification.
//!
//! Every path that moves bytes from a registry into local storage or a
//! destination goes through [`verify`] / [`ensure_verified`]. The whole byte
//! sequence is hashed before anything downstream sees it.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest as _, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;

use crate::descriptor::Descriptor;
use crate::{Error, Result};

/// Hash algorithm of a [`Digest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Algorithm {
    /// SHA-256, the registry default.
    Sha256,
    /// SHA-512.
    Sha512,
}

impl Algorithm {
    /// Canonical name as used in digest strings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the hex-encoded hash.
    #[must_use]
    pub const fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    fn hash(self, content: &[u8]) -> String {
        match self {
            Self::Sha256 => hex::encode(Sha256::digest(content)),
            Self::Sha512 => hex::encode(Sha512::digest(content)),
        }
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(Error::invalid_digest(
                other,
                "unsupported algorithm (expected sha256 or sha512)",
            )),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A content digest: algorithm plus lowercase hex hash.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    /// Compute the digest of `content` with the given algorithm.
    #[must_use]
    pub fn compute(algorithm: Algorithm, content: &[u8]) -> Self {
        Self {
            algorithm,
            hex: algorithm.hash(content),
        }
    }

    /// Compute the SHA-256 digest of `content`.
    #[must_use]
    pub fn sha256_of(content: &[u8]) -> Self {
        Self::compute(Algorithm::Sha256, content)
    }

    /// The hash algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The hex-encoded hash.
    #[must_use]
    pub fn hex(&self) -> &str {
        &self.hex
    }

    /// Whether `content` hashes to this digest.
    #[must_use]
    pub fn matches(&self, content: &[u8]) -> bool {
        self.algorithm.hash(content) == self.hex
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (algo, hex) = s
            .split_once(':')
            .ok_or_else(|| Error::invalid_digest(s, "missing '<algorithm>:' prefix"))?;
        let algorithm: Algorithm = algo
            .parse()
            .map_err(|_| Error::invalid_digest(s, format!("unsupported algorithm '{algo}'")))?;

        if hex.len() != algorithm.hex_len() {
            return Err(Error::invalid_digest(
                s,
                format!(
                    "{} digests have {} hex characters, got {}",
                    algorithm,
                    algorithm.hex_len(),
                    hex.len()
                ),
            ));
        }
        if !hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(Error::invalid_digest(s, "hash must be lowercase hex"));
        }

        Ok(Self {
            algorithm,
            hex: hex.to_string(),
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Whether `content` is exactly what `descriptor` describes: same size and
/// same digest.
#[must_use]
pub fn verify(descriptor: &Descriptor, content: &[u8]) -> bool {
    usize::try_from(descriptor.size).is_ok_and(|size| size == content.len())
        && descriptor.digest.matches(content)
}

/// Like [`verify`], but returns a [`Error::CorruptContent`] describing the
/// mismatch.
pub fn ensure_verified(descriptor: &Descriptor, content: &[u8]) -> Result<()> {
    if verify(descriptor, content) {
        return Ok(());
    }
    let actual = Digest::compute(descriptor.digest.algorithm(), content);
    Err(Error::corrupt_content(
        format!("{} ({} bytes)", descriptor.digest, descriptor.size),
        format!("{} ({} bytes)", actual, content.len()),
    ))
}
