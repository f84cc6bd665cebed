//! Streaming digest computation over artefact bytes.
//!
//! Artefacts may be several gigabytes, so files are read in fixed-size chunks
//! and fed to every requested hasher in a single pass. The functions here are
//! pure over the bytes they read: no state is kept between calls.

use camino::{Utf8Path, Utf8PathBuf};
use dist_integrity_common::{DigestAlgorithm, DigestValue};
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Read};

/// Read buffer size used while streaming artefacts.
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Errors arising while digesting an artefact.
#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    /// The artefact could not be opened or read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path of the unreadable artefact.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// A running hash for one algorithm.
enum Hasher {
    Sha256(Sha256),
    Sha512(Sha512),
    Sha1(Sha1),
    Md5(Md5),
}

impl Hasher {
    fn new(algorithm: DigestAlgorithm) -> Self {
        match algorithm {
            DigestAlgorithm::Sha256 => Self::Sha256(Sha256::new()),
            DigestAlgorithm::Sha512 => Self::Sha512(Sha512::new()),
            DigestAlgorithm::Sha1 => Self::Sha1(Sha1::new()),
            DigestAlgorithm::Md5 => Self::Md5(Md5::new()),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        match self {
            Self::Sha256(h) => h.update(chunk),
            Self::Sha512(h) => h.update(chunk),
            Self::Sha1(h) => h.update(chunk),
            Self::Md5(h) => h.update(chunk),
        }
    }

    fn finish(self) -> DigestValue {
        match self {
            Self::Sha256(h) => DigestValue::from_bytes(DigestAlgorithm::Sha256, &h.finalize()),
            Self::Sha512(h) => DigestValue::from_bytes(DigestAlgorithm::Sha512, &h.finalize()),
            Self::Sha1(h) => DigestValue::from_bytes(DigestAlgorithm::Sha1, &h.finalize()),
            Self::Md5(h) => DigestValue::from_bytes(DigestAlgorithm::Md5, &h.finalize()),
        }
    }
}

/// Digest everything `reader` yields with each of `algorithms`.
///
/// Duplicate algorithms are computed once.
///
/// # Errors
///
/// Propagates any read error from `reader`.
///
/// # Examples
///
/// ```
/// use dist_integrity_checker::digest::digest_reader;
/// use dist_integrity_common::DigestAlgorithm;
///
/// let digests = digest_reader(&b"abc"[..], &[DigestAlgorithm::Sha256]).unwrap();
/// assert_eq!(
///     digests[&DigestAlgorithm::Sha256].as_str(),
///     "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
/// );
/// ```
pub fn digest_reader<R: Read>(
    mut reader: R,
    algorithms: &[DigestAlgorithm],
) -> io::Result<BTreeMap<DigestAlgorithm, DigestValue>> {
    let mut hashers: BTreeMap<DigestAlgorithm, Hasher> = algorithms
        .iter()
        .map(|alg| (*alg, Hasher::new(*alg)))
        .collect();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        let chunk = buffer.get(..read).unwrap_or_default();
        for hasher in hashers.values_mut() {
            hasher.update(chunk);
        }
    }
    Ok(hashers
        .into_iter()
        .map(|(alg, hasher)| (alg, hasher.finish()))
        .collect())
}

/// Digest the file at `path` with each of `algorithms` in one read pass.
///
/// # Errors
///
/// Returns [`DigestError::Read`] when the file cannot be opened or read.
pub fn digest_file(
    path: &Utf8Path,
    algorithms: &[DigestAlgorithm],
) -> Result<BTreeMap<DigestAlgorithm, DigestValue>, DigestError> {
    let read_error = |source| DigestError::Read {
        path: path.to_owned(),
        source,
    };
    let file = File::open(path).map_err(read_error)?;
    digest_reader(file, algorithms).map_err(read_error)
}
