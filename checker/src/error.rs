//! Errors that abort a whole verification pass.

use crate::source::SourceError;
use crate::store::StoreError;
use dist_integrity_common::FailureClass;

/// A pass could not continue. Per-artefact problems never appear here; they
/// become that artefact's outcome.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The record store became unusable, so deduplication cannot be upheld.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The artefact source could not be listed at all.
    #[error(transparent)]
    Source(#[from] SourceError),

    /// A background task panicked or was aborted.
    #[error("{task} task failed: {reason}")]
    Task {
        /// Which task failed.
        task: &'static str,
        /// Join error text.
        reason: String,
    },
}

impl RunError {
    /// Failure class of the error. Every run error is fatal to the pass.
    #[must_use]
    pub const fn class(&self) -> FailureClass {
        FailureClass::Fatal
    }
}

/// Result alias for pass-level operations.
pub type Result<T> = std::result::Result<T, RunError>;
