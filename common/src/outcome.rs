//! Verification outcomes and their reconciliation order.
//!
//! Every evaluated artefact receives exactly one [`VerificationOutcome`] per
//! run. The manifest check and the signature check each produce a partial
//! outcome; [`VerificationOutcome::reconcile`] keeps the more severe one
//! according to [`OutcomeKind`]'s ordering:
//!
//! ```text
//! Error > DigestMismatch > SignatureInvalid > MissingManifest
//!       > MissingSignature > OkWeak > Ok
//! ```

use crate::algorithm::DigestAlgorithm;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a detached signature did not satisfy the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureFailure {
    /// The signing key is not in the project's key ring.
    UnknownKey,
    /// The signing key is marked revoked.
    RevokedKey,
    /// The signature was made outside the key's validity window.
    ExpiredKey,
    /// The cryptographic check failed: the artefact bytes do not match.
    CryptoMismatch,
    /// The signature blob could not be parsed.
    Malformed,
    /// The signature hash or the signing key uses an algorithm the OpenPGP
    /// policy no longer accepts, such as SHA-1.
    PolicyRejected,
    /// Fewer valid signatures than the configured minimum.
    QuorumNotMet,
}

impl fmt::Display for SignatureFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::UnknownKey => "signing key not found in the project key ring",
            Self::RevokedKey => "signing key has been revoked",
            Self::ExpiredKey => "signing key had expired",
            Self::CryptoMismatch => "signature does not match the artefact",
            Self::Malformed => "signature could not be parsed",
            Self::PolicyRejected => "signature or key uses an algorithm that is no longer accepted",
            Self::QuorumNotMet => "not enough valid signatures",
        };
        f.write_str(text)
    }
}

/// Fieldless outcome category, ordered from least to most severe.
///
/// Notification deduplication compares categories rather than full
/// outcomes, so a changed diagnostic inside the same category does not
/// trigger a new alert.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// All required checks passed.
    Ok,
    /// Passed, but only against a legacy MD5/SHA-1 manifest.
    OkWeak,
    /// No detached signature accompanies the artefact.
    MissingSignature,
    /// No usable checksum manifest accompanies the artefact.
    MissingManifest,
    /// A signature exists but does not satisfy the policy.
    SignatureInvalid,
    /// A manifest digest differs from the computed digest.
    DigestMismatch,
    /// The artefact could not be verified at all.
    Error,
}

impl OutcomeKind {
    /// Every category, in ascending severity.
    pub const ALL: [Self; 7] = [
        Self::Ok,
        Self::OkWeak,
        Self::MissingSignature,
        Self::MissingManifest,
        Self::SignatureInvalid,
        Self::DigestMismatch,
        Self::Error,
    ];

    /// Return whether the category counts as verified.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Ok | Self::OkWeak)
    }

    /// Return the failure class of the category, or `None` on success.
    #[must_use]
    pub const fn class(self) -> Option<FailureClass> {
        match self {
            Self::Ok | Self::OkWeak => None,
            Self::Error => Some(FailureClass::Transient),
            Self::MissingSignature
            | Self::MissingManifest
            | Self::SignatureInvalid
            | Self::DigestMismatch => Some(FailureClass::DataIntegrity),
        }
    }
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ok => "ok",
            Self::OkWeak => "ok-weak",
            Self::MissingSignature => "missing-signature",
            Self::MissingManifest => "missing-manifest",
            Self::SignatureInvalid => "signature-invalid",
            Self::DigestMismatch => "digest-mismatch",
            Self::Error => "error",
        };
        f.write_str(text)
    }
}

/// Error taxonomy used to decide what is retried, reported, or fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureClass {
    /// I/O failures, unreachable key sources, failed sends. Healed by the
    /// next run.
    Transient,
    /// Digest mismatches and signature problems. Always reported.
    DataIntegrity,
    /// Unsupported algorithms and malformed manifests.
    Configuration,
    /// The record store is unusable; the run is aborted.
    Fatal,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Transient => "transient",
            Self::DataIntegrity => "data-integrity",
            Self::Configuration => "configuration",
            Self::Fatal => "fatal",
        };
        f.write_str(text)
    }
}

/// The result of verifying one artefact in one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerificationOutcome {
    /// All required checks passed with strong digests.
    Ok,
    /// All required checks passed, but the digest check relied on MD5/SHA-1.
    OkWeak,
    /// No detached signature was supplied.
    MissingSignature,
    /// No usable checksum manifest was supplied.
    MissingManifest {
        /// Why the manifests on offer were unusable, when any existed.
        detail: Option<String>,
    },
    /// The signature check failed.
    SignatureInvalid {
        /// Sub-reason.
        reason: SignatureFailure,
        /// Key id or fingerprint the signature claims, when known.
        key: Option<String>,
        /// Additional human-readable context.
        detail: Option<String>,
    },
    /// A manifest digest differs from the computed digest.
    DigestMismatch {
        /// Algorithm of the mismatching manifest.
        algorithm: DigestAlgorithm,
        /// Digest declared by the manifest.
        expected: String,
        /// Digest computed from the artefact bytes.
        actual: String,
    },
    /// The artefact could not be verified.
    Error {
        /// What went wrong.
        reason: String,
    },
}

impl VerificationOutcome {
    /// Build a [`VerificationOutcome::MissingManifest`] with no detail.
    #[must_use]
    pub const fn missing_manifest() -> Self {
        Self::MissingManifest { detail: None }
    }

    /// Build a [`VerificationOutcome::Error`].
    #[must_use]
    pub fn error(reason: impl Into<String>) -> Self {
        Self::Error {
            reason: reason.into(),
        }
    }

    /// Return the outcome's category.
    #[must_use]
    pub const fn kind(&self) -> OutcomeKind {
        match self {
            Self::Ok => OutcomeKind::Ok,
            Self::OkWeak => OutcomeKind::OkWeak,
            Self::MissingSignature => OutcomeKind::MissingSignature,
            Self::MissingManifest { .. } => OutcomeKind::MissingManifest,
            Self::SignatureInvalid { .. } => OutcomeKind::SignatureInvalid,
            Self::DigestMismatch { .. } => OutcomeKind::DigestMismatch,
            Self::Error { .. } => OutcomeKind::Error,
        }
    }

    /// Return whether the outcome counts as verified.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.kind().is_success()
    }

    /// Combine the manifest and signature partial outcomes, keeping the more
    /// severe. On equal severity the manifest outcome wins.
    ///
    /// # Examples
    ///
    /// ```
    /// use dist_integrity_common::outcome::{OutcomeKind, VerificationOutcome};
    ///
    /// let combined = VerificationOutcome::reconcile(
    ///     VerificationOutcome::missing_manifest(),
    ///     VerificationOutcome::MissingSignature,
    /// );
    /// assert_eq!(combined.kind(), OutcomeKind::MissingManifest);
    /// ```
    #[must_use]
    pub fn reconcile(manifest: Self, signature: Self) -> Self {
        if signature.kind() > manifest.kind() {
            signature
        } else {
            manifest
        }
    }
}

impl fmt::Display for VerificationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("verified"),
            Self::OkWeak => f.write_str("verified against a weak (MD5/SHA-1) digest only"),
            Self::MissingSignature => f.write_str("no detached signature found"),
            Self::MissingManifest { detail: None } => f.write_str("no checksum file found"),
            Self::MissingManifest {
                detail: Some(detail),
            } => write!(f, "no valid checksum file found: {detail}"),
            Self::SignatureInvalid {
                reason,
                key: Some(key),
                ..
            } => write!(f, "{reason} ({key})"),
            Self::SignatureInvalid {
                reason, key: None, ..
            } => write!(f, "{reason}"),
            Self::DigestMismatch { algorithm, .. } => {
                write!(f, "{algorithm} checksum does not match")
            }
            Self::Error { reason } => write!(f, "could not be verified: {reason}"),
        }
    }
}
