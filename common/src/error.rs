//! Error types for domain value validation.
//!
//! Each variant provides a descriptive message identifying the invalid input
//! and the constraint that was violated.

use thiserror::Error;

/// Errors arising from invalid domain values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A project namespace is empty or contains path syntax.
    #[error("invalid namespace \"{value}\": {reason}")]
    InvalidNamespace {
        /// The rejected namespace string.
        value: String,
        /// Description of the validation failure.
        reason: String,
    },

    /// An artefact path is absolute or escapes its namespace.
    #[error("invalid artefact path \"{value}\": {reason}")]
    InvalidArtefactPath {
        /// The rejected path.
        value: String,
        /// Description of the validation failure.
        reason: String,
    },

    /// A digest algorithm name is not one the checker understands.
    #[error("unsupported digest algorithm \"{value}\"; expected one of: {expected}")]
    UnsupportedAlgorithm {
        /// The rejected algorithm name.
        value: String,
        /// Comma-separated list of accepted names.
        expected: String,
    },

    /// A digest value does not have the shape its algorithm requires.
    #[error("invalid {algorithm} digest: {reason}")]
    InvalidDigest {
        /// Display name of the algorithm the digest was declared for.
        algorithm: String,
        /// Description of the validation failure.
        reason: String,
    },
}

/// Result type alias using [`ValidationError`].
pub type Result<T> = std::result::Result<T, ValidationError>;
