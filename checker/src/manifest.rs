//! Checksum manifest parsing.
//!
//! Projects publish manifests in several shapes: bare digests, `sha512sum`
//! output (`<digest>  <file>`), BSD tags (`SHA512 (file) = <digest>`), and
//! `gpg --print-md` output where the digest is split into upper-case groups
//! across lines. The expected digest is the concatenation of every
//! whitespace-separated token made only of hex digits. When a manifest lists
//! several files, only the line naming the artefact is used.

use camino::{Utf8Path, Utf8PathBuf};
use dist_integrity_common::{DigestAlgorithm, DigestValue};
use std::io;

/// Manifests larger than this are rejected without parsing.
pub const MAX_MANIFEST_BYTES: u64 = 1024 * 1024;

/// A parsed companion checksum file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumManifest {
    /// Algorithm the manifest declares.
    pub algorithm: DigestAlgorithm,
    /// Digest the manifest expects the artefact to have.
    pub expected: DigestValue,
    /// File name the manifest claims to describe, when it names one.
    pub described: Option<String>,
}

/// Errors arising while loading a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The manifest could not be read.
    #[error("failed to read checksum file {path}: {source}")]
    Read {
        /// Path of the manifest.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The manifest was read but holds no usable digest.
    #[error("checksum file {path} is malformed: {reason}")]
    Malformed {
        /// Path of the manifest.
        path: Utf8PathBuf,
        /// Why the content was rejected.
        reason: String,
    },
}

/// Read and parse the manifest at `path` for the artefact named `file_name`.
///
/// # Errors
///
/// Returns [`ManifestError::Read`] on I/O failure and
/// [`ManifestError::Malformed`] when the content holds no digest of the
/// right shape for `algorithm`.
pub fn load_manifest(
    algorithm: DigestAlgorithm,
    path: &Utf8Path,
    file_name: &str,
) -> Result<ChecksumManifest, ManifestError> {
    let read_error = |source| ManifestError::Read {
        path: path.to_owned(),
        source,
    };
    let size = std::fs::metadata(path).map_err(read_error)?.len();
    if size > MAX_MANIFEST_BYTES {
        return Err(ManifestError::Malformed {
            path: path.to_owned(),
            reason: format!("{size} bytes exceeds the {MAX_MANIFEST_BYTES} byte limit"),
        });
    }
    let bytes = std::fs::read(path).map_err(read_error)?;
    let content = String::from_utf8_lossy(&bytes);
    parse_manifest(algorithm, &content, file_name).map_err(|reason| ManifestError::Malformed {
        path: path.to_owned(),
        reason,
    })
}

/// Parse manifest `content` declared as `algorithm`.
///
/// # Errors
///
/// Returns a human-readable reason when no digest of the expected length can
/// be extracted.
///
/// # Examples
///
/// ```
/// use dist_integrity_checker::manifest::parse_manifest;
/// use dist_integrity_common::DigestAlgorithm;
///
/// let line = format!("{}  foo-1.0.tar.gz\n", "ab".repeat(32));
/// let manifest = parse_manifest(DigestAlgorithm::Sha256, &line, "foo-1.0.tar.gz").unwrap();
/// assert_eq!(manifest.expected.as_str(), "ab".repeat(32));
/// assert_eq!(manifest.described.as_deref(), Some("foo-1.0.tar.gz"));
/// ```
pub fn parse_manifest(
    algorithm: DigestAlgorithm,
    content: &str,
    file_name: &str,
) -> Result<ChecksumManifest, String> {
    let whole = hex_tokens(content);
    if whole.len() == algorithm.hex_len() {
        return finish(algorithm, &whole, described_name(content));
    }
    // Multi-file manifests: use the line that names the artefact.
    if let Some(line) = content
        .lines()
        .find(|line| line.split_whitespace().any(|t| names_file(t, file_name)))
    {
        let digest = hex_tokens(line);
        if digest.len() == algorithm.hex_len() {
            return finish(algorithm, &digest, Some(file_name.to_owned()));
        }
    }
    if whole.is_empty() {
        if let Some(value) = content
            .split_whitespace()
            .find_map(|token| DigestValue::from_base64(algorithm, token).ok())
        {
            return Ok(ChecksumManifest {
                algorithm,
                expected: value,
                described: described_name(content),
            });
        }
        return Err("no digest found".to_owned());
    }
    Err(format!(
        "expected a {}-character {algorithm} digest, found {} hex characters",
        algorithm.hex_len(),
        whole.len()
    ))
}

fn finish(
    algorithm: DigestAlgorithm,
    hex: &str,
    described: Option<String>,
) -> Result<ChecksumManifest, String> {
    let expected = DigestValue::from_hex(algorithm, hex).map_err(|err| err.to_string())?;
    Ok(ChecksumManifest {
        algorithm,
        expected,
        described,
    })
}

fn hex_tokens(content: &str) -> String {
    content
        .split_whitespace()
        .filter(|token| token.chars().all(|c| c.is_ascii_hexdigit()))
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Strip the decoration different tools put around file names.
fn bare_name(token: &str) -> &str {
    let trimmed = token
        .trim_start_matches(['*', '('])
        .trim_end_matches([')', ':']);
    trimmed.rsplit(['/', '\\']).next().unwrap_or(trimmed)
}

fn names_file(token: &str, file_name: &str) -> bool {
    bare_name(token) == file_name
}

fn described_name(content: &str) -> Option<String> {
    content
        .split_whitespace()
        .filter(|token| !token.chars().all(|c| c.is_ascii_hexdigit()))
        .map(bare_name)
        .find(|name| name.contains('.') && name.parse::<DigestAlgorithm>().is_err())
        .map(str::to_owned)
}
