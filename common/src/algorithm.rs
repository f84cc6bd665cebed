//! Digest algorithms recognised in checksum manifests.
//!
//! SHA-256 and SHA-512 are the primary algorithms. MD5 and SHA-1 are kept
//! only for comparing legacy manifests and are flagged as weak.

use crate::error::{Result, ValidationError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A digest algorithm a manifest may declare.
///
/// # Examples
///
/// ```
/// use dist_integrity_common::algorithm::DigestAlgorithm;
///
/// let alg: DigestAlgorithm = "SHA-512".parse().unwrap();
/// assert_eq!(alg, DigestAlgorithm::Sha512);
/// assert_eq!(alg.extension(), "sha512");
/// assert!(!alg.is_weak());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-256.
    Sha256,
    /// SHA-512.
    Sha512,
    /// SHA-1, legacy comparison only.
    Sha1,
    /// MD5, legacy comparison only.
    Md5,
}

impl DigestAlgorithm {
    /// Every supported algorithm, strong ones first.
    pub const ALL: [Self; 4] = [Self::Sha512, Self::Sha256, Self::Sha1, Self::Md5];

    /// Return whether the algorithm is accepted only for legacy comparison.
    #[must_use]
    pub const fn is_weak(self) -> bool {
        matches!(self, Self::Sha1 | Self::Md5)
    }

    /// Return the manifest file extension (`foo.tar.gz.sha512`).
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
            Self::Sha1 => "sha1",
            Self::Md5 => "md5",
        }
    }

    /// Return the digest length in bytes.
    #[must_use]
    pub const fn output_len(self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha512 => 64,
            Self::Sha1 => 20,
            Self::Md5 => 16,
        }
    }

    /// Return the digest length in hexadecimal characters.
    #[must_use]
    pub const fn hex_len(self) -> usize {
        self.output_len() * 2
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Sha256 => "SHA256",
            Self::Sha512 => "SHA512",
            Self::Sha1 => "SHA1",
            Self::Md5 => "MD5",
        };
        f.write_str(name)
    }
}

impl FromStr for DigestAlgorithm {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self> {
        let normalised: String = value
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();
        Self::ALL
            .into_iter()
            .find(|alg| alg.extension() == normalised)
            .ok_or_else(|| ValidationError::UnsupportedAlgorithm {
                value: value.to_owned(),
                expected: Self::ALL
                    .iter()
                    .map(|alg| alg.extension())
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}
