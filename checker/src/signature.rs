//! Detached-signature policy.
//!
//! The [`SignatureVerifier`] answers three questions for each signature blob:
//! which key it claims, whether that key is known, unexpired, and unrevoked
//! in the project's ring, and whether the cryptographic check passes. The
//! last question is delegated to a [`SignatureBackend`] so the policy can be
//! exercised without real key material.
//!
//! An unknown or untrusted key is a reportable verdict, never an error. Only
//! failing to read the artefact or the blob surfaces as [`SignatureError`].

use crate::keyring::{KeyRing, KeyRingEntry, KeyValidity};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use dist_integrity_common::{SignatureFailure, VerificationOutcome};
use std::sync::Arc;

/// Metadata readable from a signature blob without any key material.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SignatureInfo {
    /// Key ids and fingerprints named as issuers, upper-case hex.
    pub issuers: Vec<String>,
    /// Creation time of the signature, when recorded.
    pub created: Option<DateTime<Utc>>,
}

/// Result of the purely cryptographic part of a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoCheck {
    /// The signature covers the artefact bytes.
    Good,
    /// The signature does not cover the artefact bytes.
    Bad(String),
    /// The signature could not be evaluated.
    Malformed(String),
    /// The signature or its key was refused by the algorithm policy before
    /// the bytes were compared.
    Rejected(String),
}

/// Errors raised while checking a signature.
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    /// The artefact or signature file could not be read.
    #[error("failed to read {path}: {source}")]
    Read {
        /// Path that could not be read.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The blob is not a signature. Reported as a verdict, not a failure.
    #[error("malformed signature: {detail}")]
    Malformed {
        /// Parser diagnostic.
        detail: String,
    },
}

/// Cryptographic operations a signature scheme provides.
pub trait SignatureBackend: Send + Sync {
    /// Parse `blob` and report the issuers it names.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::Malformed`] when the blob holds no
    /// signature.
    fn inspect(&self, blob: &[u8]) -> Result<SignatureInfo, SignatureError>;

    /// Check that `blob` is a valid signature over the file at `artefact` by
    /// one of the certificates in `ring`.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::Read`] when the artefact cannot be read.
    fn check(
        &self,
        artefact: &Utf8Path,
        blob: &[u8],
        ring: &KeyRing,
    ) -> Result<CryptoCheck, SignatureError>;
}

/// Policy verdict for one signature blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureVerdict {
    /// A trusted key made a valid signature.
    Valid {
        /// Fingerprint of the signing key.
        key: String,
    },
    /// The signature does not satisfy the policy.
    Invalid {
        /// Sub-reason.
        reason: SignatureFailure,
        /// Key the signature claims, when known.
        key: Option<String>,
        /// Human-readable context for reports.
        detail: Option<String>,
    },
}

impl SignatureVerdict {
    fn invalid(reason: SignatureFailure, key: Option<String>, detail: impl Into<String>) -> Self {
        Self::Invalid {
            reason,
            key,
            detail: Some(detail.into()),
        }
    }
}

/// Applies the key policy on top of a [`SignatureBackend`].
#[derive(Clone)]
pub struct SignatureVerifier {
    backend: Arc<dyn SignatureBackend>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier").finish_non_exhaustive()
    }
}

impl SignatureVerifier {
    /// Wrap `backend`.
    #[must_use]
    pub const fn new(backend: Arc<dyn SignatureBackend>) -> Self {
        Self { backend }
    }

    /// Judge one signature blob over the file at `artefact`.
    ///
    /// Key validity is judged at the signature's creation time, falling back
    /// to `now` when the blob does not record one, so a release signed
    /// before its key expired stays valid. Every issuer the ring knows is
    /// judged: one revoked or expired issuer invalidates the blob even when
    /// another issuer is in good standing.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureError::Read`] when the artefact cannot be read.
    pub fn verify(
        &self,
        artefact: &Utf8Path,
        blob: &[u8],
        ring: &KeyRing,
        now: DateTime<Utc>,
    ) -> Result<SignatureVerdict, SignatureError> {
        let info = match self.backend.inspect(blob) {
            Ok(info) => info,
            Err(SignatureError::Malformed { detail }) => {
                return Ok(SignatureVerdict::invalid(
                    SignatureFailure::Malformed,
                    None,
                    detail,
                ));
            }
            Err(err) => return Err(err),
        };
        let entries = ring.find_all(&info.issuers);
        let Some(entry) = entries.first().copied() else {
            return Ok(unknown_key(&info));
        };
        let signed_at = info.created.unwrap_or(now);
        if let Some(verdict) = entries
            .iter()
            .find_map(|candidate| policy_rejection(candidate, signed_at))
        {
            return Ok(verdict);
        }
        let key = Some(entry.fingerprint.clone());
        Ok(match self.backend.check(artefact, blob, ring)? {
            CryptoCheck::Good => SignatureVerdict::Valid {
                key: entry.fingerprint.clone(),
            },
            CryptoCheck::Bad(detail) => SignatureVerdict::invalid(
                SignatureFailure::CryptoMismatch,
                key,
                format!("signed by {} but does not match the file: {detail}", entry.describe()),
            ),
            CryptoCheck::Malformed(detail) => {
                SignatureVerdict::invalid(SignatureFailure::Malformed, key, detail)
            }
            CryptoCheck::Rejected(detail) => SignatureVerdict::invalid(
                SignatureFailure::PolicyRejected,
                key,
                format!(
                    "signed by {} with an algorithm that is no longer accepted: {detail}",
                    entry.describe()
                ),
            ),
        })
    }
}

fn unknown_key(info: &SignatureInfo) -> SignatureVerdict {
    let key = info.issuers.first().cloned();
    let detail = key.as_ref().map_or_else(
        || "signature does not name its issuer".to_owned(),
        |key| format!("signed with a key not found in the project's KEYS file: {key}"),
    );
    SignatureVerdict::invalid(SignatureFailure::UnknownKey, key, detail)
}

fn policy_rejection(entry: &KeyRingEntry, signed_at: DateTime<Utc>) -> Option<SignatureVerdict> {
    let key = Some(entry.fingerprint.clone());
    let who = entry.describe();
    match entry.validity_at(signed_at) {
        KeyValidity::Valid => None,
        KeyValidity::Revoked => Some(SignatureVerdict::invalid(
            SignatureFailure::RevokedKey,
            key,
            format!("signed by {who}, whose key has been revoked"),
        )),
        KeyValidity::Expired => {
            let until = entry
                .valid_until
                .map_or_else(String::new, |t| format!(" on {}", t.to_rfc3339()));
            Some(SignatureVerdict::invalid(
                SignatureFailure::ExpiredKey,
                key,
                format!("signed by {who}, whose key expired{until}"),
            ))
        }
        KeyValidity::NotYetValid => Some(SignatureVerdict::invalid(
            SignatureFailure::ExpiredKey,
            key,
            format!("signed by {who} before the key was created"),
        )),
    }
}

/// Fold per-signature verdicts into the signature half of an outcome.
///
/// Any `min_valid` valid signatures satisfy the policy. With no signatures
/// at all the result is [`VerificationOutcome::MissingSignature`]. A read
/// error only decides the outcome when the valid signatures fall short.
///
/// # Examples
///
/// ```
/// use dist_integrity_checker::signature::{SignatureVerdict, combine_verdicts};
/// use dist_integrity_common::{OutcomeKind, SignatureFailure};
///
/// let verdicts = vec![
///     Ok(SignatureVerdict::Invalid {
///         reason: SignatureFailure::UnknownKey,
///         key: Some("K2".into()),
///         detail: None,
///     }),
///     Ok(SignatureVerdict::Valid { key: "K1".into() }),
/// ];
/// assert_eq!(combine_verdicts(verdicts, 1).kind(), OutcomeKind::Ok);
/// ```
#[must_use]
pub fn combine_verdicts(
    verdicts: Vec<Result<SignatureVerdict, SignatureError>>,
    min_valid: usize,
) -> VerificationOutcome {
    if verdicts.is_empty() {
        return VerificationOutcome::MissingSignature;
    }
    let min_valid = min_valid.max(1);
    let mut valid = 0;
    let mut first_invalid = None;
    let mut first_error = None;
    for verdict in verdicts {
        match verdict {
            Ok(SignatureVerdict::Valid { .. }) => valid += 1,
            Ok(invalid) => {
                first_invalid.get_or_insert(invalid);
            }
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
    }
    if valid >= min_valid {
        return VerificationOutcome::Ok;
    }
    if let Some(err) = first_error {
        return VerificationOutcome::error(err.to_string());
    }
    match first_invalid {
        Some(SignatureVerdict::Invalid {
            reason,
            key,
            detail,
        }) if valid == 0 => VerificationOutcome::SignatureInvalid {
            reason,
            key,
            detail,
        },
        _ => quorum_not_met(valid, min_valid),
    }
}

fn quorum_not_met(valid: usize, min_valid: usize) -> VerificationOutcome {
    VerificationOutcome::SignatureInvalid {
        reason: SignatureFailure::QuorumNotMet,
        key: None,
        detail: Some(format!(
            "{valid} valid signature(s), {min_valid} required"
        )),
    }
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
