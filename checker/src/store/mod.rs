//! Persistent per-artefact verification state.
//!
//! One [`ArtefactRecord`] exists for every artefact ever evaluated. Records
//! are keyed by [`ArtefactKey`] and carry the version they describe; when a
//! new version is observed at the same path the outcome history and
//! notification state start over. Records are never deleted, only marked
//! stale once their artefact disappears from the source.

mod journal;
mod memory;

pub use journal::{JournalStore, OpenReport};
pub use memory::MemoryRecordStore;

use crate::slot::WorkSlot;
use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use dist_integrity_common::{
    Artefact, ArtefactKey, ArtefactVersion, DigestAlgorithm, DigestValue, Namespace,
    OutcomeKind, VerificationOutcome,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// When and for which outcome category the last notification was sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationMark {
    /// Outcome category that was reported.
    pub kind: OutcomeKind,
    /// When the notification was handed to the transport successfully.
    pub at: DateTime<Utc>,
}

/// Persisted verification state for one artefact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtefactRecord {
    /// Stable identity.
    pub key: ArtefactKey,
    /// Version the outcome describes.
    pub version: ArtefactVersion,
    /// Latest outcome.
    pub outcome: VerificationOutcome,
    /// First evaluation of this version that produced the current category.
    pub outcome_first_seen: DateTime<Utc>,
    /// Latest evaluation.
    pub last_evaluated: DateTime<Utc>,
    /// Last successful notification, if any, for this version.
    #[serde(default)]
    pub last_notified: Option<NotificationMark>,
    /// Digests computed for this version, reused until the version changes.
    #[serde(default)]
    pub digests: BTreeMap<DigestAlgorithm, DigestValue>,
    /// Set once the artefact is no longer offered by its source.
    #[serde(default)]
    pub stale: bool,
}

impl ArtefactRecord {
    /// Fold a new evaluation into the prior record, if any.
    ///
    /// A version change, or a first evaluation, starts a fresh history. A
    /// changed outcome category restarts `outcome_first_seen`. A return to
    /// success clears the notification mark so a later regression is
    /// reported as a new failure.
    #[must_use]
    pub fn observe(
        prior: Option<&Self>,
        artefact: &Artefact,
        outcome: VerificationOutcome,
        digests: BTreeMap<DigestAlgorithm, DigestValue>,
        now: DateTime<Utc>,
    ) -> Self {
        let same_version = prior.filter(|p| p.version == artefact.version);
        let outcome_first_seen = match same_version {
            Some(p) if p.outcome.kind() == outcome.kind() => p.outcome_first_seen,
            _ => now,
        };
        let last_notified = match same_version {
            Some(p) if !outcome.is_success() => p.last_notified,
            _ => None,
        };
        Self {
            key: artefact.key.clone(),
            version: artefact.version,
            outcome,
            outcome_first_seen,
            last_evaluated: now,
            last_notified,
            digests,
            stale: false,
        }
    }

    /// Return the digests that may be reused for `artefact`, which are
    /// those computed for the same version.
    #[must_use]
    pub fn reusable_digests(&self, artefact: &Artefact) -> BTreeMap<DigestAlgorithm, DigestValue> {
        if self.version == artefact.version {
            self.digests.clone()
        } else {
            BTreeMap::new()
        }
    }
}

/// Errors that make the record store unusable. Any of these aborts a run.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Another process holds the store lock.
    #[error("record store {path} is locked by another process")]
    Locked {
        /// Lock file path.
        path: Utf8PathBuf,
    },

    /// Reading or writing the store failed.
    #[error("record store I/O failed at {path}: {source}")]
    Io {
        /// Path involved.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A record could not be encoded.
    #[error("failed to encode record for {key}: {source}")]
    Encode {
        /// Key of the record.
        key: String,
        /// Underlying serialisation error.
        #[source]
        source: serde_json::Error,
    },

    /// The store refused the operation.
    #[error("record store unavailable: {reason}")]
    Unavailable {
        /// Human-readable cause.
        reason: String,
    },
}

/// Durable point lookup and upsert of artefact records.
///
/// Implementations must tolerate concurrent calls for different keys. The
/// caller guarantees at most one in-flight write per key.
pub trait RecordStore: Send + Sync {
    /// Fetch the record for `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn get(&self, key: &ArtefactKey) -> Result<Option<ArtefactRecord>, StoreError>;

    /// Insert or replace the record for `record.key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the record cannot be persisted.
    fn put(&self, record: &ArtefactRecord) -> Result<(), StoreError>;

    /// List the keys of every record in `namespace`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the store cannot be read.
    fn keys_in(&self, namespace: &Namespace) -> Result<Vec<ArtefactKey>, StoreError>;
}

/// Run `op` against `store` on the blocking pool while holding `slot`.
///
/// Journal writes end in `fsync`, so store calls never run on an async
/// worker thread.
///
/// # Errors
///
/// Returns whatever `op` returns, or [`StoreError::Unavailable`] when the
/// blocking task did not complete.
pub async fn offload<T, F>(
    store: &Arc<dyn RecordStore>,
    slot: &WorkSlot,
    op: F,
) -> Result<T, StoreError>
where
    F: FnOnce(&dyn RecordStore) -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let store = Arc::clone(store);
    slot.run_blocking(move || op(store.as_ref()))
        .await
        .map_err(|err| StoreError::Unavailable {
            reason: format!("record store task failed: {err}"),
        })?
}
