//! Per-artefact verification state machine.
//!
//! For one discovered artefact the [`Orchestrator`] loads the prior record,
//! runs the manifest check and the signature check concurrently under the
//! per-artefact timeout, reconciles the two partial outcomes, and writes the
//! new record. Anything that goes wrong for this artefact alone becomes its
//! outcome; only record store failures are returned as errors, because they
//! make every later artefact unverifiable too.

use crate::digest::digest_file;
use crate::keyring::KeyRingResolver;
use crate::manifest::{ManifestError, load_manifest};
use crate::signature::{SignatureError, SignatureVerifier, combine_verdicts};
use crate::slot::WorkSlot;
use crate::source::{DiscoveredArtefact, ManifestRef};
use crate::store::{ArtefactRecord, RecordStore, StoreError, offload};
use camino::Utf8Path;
use chrono::{DateTime, Utc};
use dist_integrity_common::{DigestAlgorithm, DigestValue, VerificationOutcome};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

type Digests = BTreeMap<DigestAlgorithm, DigestValue>;

/// Knobs that shape how an artefact is judged.
#[derive(Debug, Clone)]
pub struct VerificationPolicy {
    /// Artefacts modified after this instant need a strong manifest; a
    /// weak-only manifest then counts as missing.
    pub strong_checksum_deadline: Option<DateTime<Utc>>,
    /// Number of valid signatures required. One gives OR semantics.
    pub min_valid_signatures: usize,
    /// Upper bound on one artefact's checks.
    pub artefact_timeout: Duration,
}

impl Default for VerificationPolicy {
    fn default() -> Self {
        Self {
            strong_checksum_deadline: None,
            min_valid_signatures: 1,
            artefact_timeout: Duration::from_secs(600),
        }
    }
}

/// Result of evaluating one artefact.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// The record as written to the store.
    pub record: ArtefactRecord,
    /// Whether any digest had to be computed (rather than reused).
    pub digests_computed: bool,
}

/// Drives the digest engine and signature verifier for single artefacts.
pub struct Orchestrator {
    store: Arc<dyn RecordStore>,
    resolver: Arc<KeyRingResolver>,
    verifier: SignatureVerifier,
    policy: VerificationPolicy,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Assemble an orchestrator from its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn RecordStore>,
        resolver: Arc<KeyRingResolver>,
        verifier: SignatureVerifier,
        policy: VerificationPolicy,
    ) -> Self {
        Self {
            store,
            resolver,
            verifier,
            policy,
        }
    }

    /// Evaluate `discovered` and persist the resulting record, outside any
    /// concurrency bound.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the prior record cannot be read or the new
    /// record cannot be written.
    pub async fn evaluate(
        &self,
        discovered: &DiscoveredArtefact,
        now: DateTime<Utc>,
    ) -> Result<Evaluation, StoreError> {
        self.evaluate_in(discovered, now, &WorkSlot::detached()).await
    }

    /// Evaluate `discovered` while holding `slot`.
    ///
    /// Every piece of blocking work, store access included, keeps a clone of
    /// `slot` until it finishes, even when the timeout abandoned it.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the prior record cannot be read or the new
    /// record cannot be written.
    pub async fn evaluate_in(
        &self,
        discovered: &DiscoveredArtefact,
        now: DateTime<Utc>,
        slot: &WorkSlot,
    ) -> Result<Evaluation, StoreError> {
        let key = &discovered.artefact.key;
        let lookup = key.clone();
        let prior = offload(&self.store, slot, move |store| store.get(&lookup)).await?;
        let cached = prior
            .as_ref()
            .map(|record| record.reusable_digests(&discovered.artefact))
            .unwrap_or_default();
        let cached_count = cached.len();

        let checks = async {
            let (manifest, signature) = tokio::join!(
                self.check_manifests(discovered, cached.clone(), slot),
                self.check_signatures(discovered, now, slot),
            );
            let (manifest_outcome, digests) = manifest;
            (
                VerificationOutcome::reconcile(manifest_outcome, signature),
                digests,
            )
        };
        let (outcome, digests) =
            match tokio::time::timeout(self.policy.artefact_timeout, checks).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(
                        "{key}: verification exceeded {}s",
                        self.policy.artefact_timeout.as_secs()
                    );
                    (
                        VerificationOutcome::error(format!(
                            "verification timed out after {}s",
                            self.policy.artefact_timeout.as_secs()
                        )),
                        cached.clone(),
                    )
                }
            };

        let digests_computed = digests.len() > cached_count;
        if outcome.is_success() {
            debug!("{key}: {}", outcome.kind());
        } else {
            info!("{key}: {} ({outcome})", outcome.kind());
        }
        let record = ArtefactRecord::observe(
            prior.as_ref(),
            &discovered.artefact,
            outcome,
            digests,
            now,
        );
        let written = record.clone();
        offload(&self.store, slot, move |store| store.put(&written)).await?;
        Ok(Evaluation {
            record,
            digests_computed,
        })
    }

    /// Manifest half: choose the manifests that count, digest what is not
    /// cached, and compare.
    async fn check_manifests(
        &self,
        discovered: &DiscoveredArtefact,
        cached: Digests,
        slot: &WorkSlot,
    ) -> (VerificationOutcome, Digests) {
        let selected = match self.select_manifests(discovered) {
            Ok(selected) => selected,
            Err(outcome) => return (outcome, cached),
        };
        let location = discovered.location.clone();
        let file_name = discovered.artefact.key.file_name().to_owned();
        let fallback = cached.clone();
        match slot
            .run_blocking(move || verify_manifests(&location, &file_name, &selected, cached))
            .await
        {
            Ok(result) => result,
            Err(err) => (
                VerificationOutcome::error(format!("checksum task failed: {err}")),
                fallback,
            ),
        }
    }

    /// Apply the strong-before-weak rule.
    fn select_manifests(
        &self,
        discovered: &DiscoveredArtefact,
    ) -> Result<Vec<ManifestRef>, VerificationOutcome> {
        let (weak, strong): (Vec<_>, Vec<_>) = discovered
            .manifests
            .iter()
            .cloned()
            .partition(|m| m.algorithm.is_weak());
        if !strong.is_empty() {
            return Ok(strong);
        }
        if weak.is_empty() {
            return Err(VerificationOutcome::missing_manifest());
        }
        match self.policy.strong_checksum_deadline {
            Some(deadline) if discovered.artefact.version.modified > deadline => {
                Err(VerificationOutcome::MissingManifest {
                    detail: Some(format!(
                        "only MD5/SHA-1 checksums found; files published after {} need SHA-256 or SHA-512",
                        deadline.format("%Y-%m-%d")
                    )),
                })
            }
            _ => Ok(weak),
        }
    }

    /// Signature half: resolve the namespace's ring and judge every blob.
    async fn check_signatures(
        &self,
        discovered: &DiscoveredArtefact,
        now: DateTime<Utc>,
        slot: &WorkSlot,
    ) -> VerificationOutcome {
        if discovered.signatures.is_empty() {
            return VerificationOutcome::MissingSignature;
        }
        let namespace = discovered.artefact.key.namespace();
        let ring = match self.resolver.resolve_in(namespace, slot).await {
            Ok(ring) => ring,
            Err(err) => return VerificationOutcome::error(err.to_string()),
        };
        let verifier = self.verifier.clone();
        let location = discovered.location.clone();
        let signatures = discovered.signatures.clone();
        let min_valid = self.policy.min_valid_signatures;
        slot.run_blocking(move || {
            let verdicts = signatures
                .iter()
                .map(|path| {
                    let blob = std::fs::read(path).map_err(|source| SignatureError::Read {
                        path: path.clone(),
                        source,
                    })?;
                    verifier.verify(&location, &blob, &ring, now)
                })
                .collect();
            combine_verdicts(verdicts, min_valid)
        })
        .await
        .unwrap_or_else(|err| VerificationOutcome::error(format!("signature task failed: {err}")))
    }
}

/// Blocking body of the manifest check.
///
/// Every selected manifest must match (AND semantics). A mismatch in any
/// parsed manifest wins; otherwise a single malformed manifest leaves the
/// artefact without a usable manifest, whatever its siblings say.
fn verify_manifests(
    location: &Utf8Path,
    file_name: &str,
    selected: &[ManifestRef],
    mut digests: Digests,
) -> (VerificationOutcome, Digests) {
    let mut parsed = Vec::new();
    let mut problems = Vec::new();
    for manifest in selected {
        match load_manifest(manifest.algorithm, &manifest.path, file_name) {
            Ok(found) => {
                if let Some(described) = found.described.as_deref()
                    && described != file_name
                {
                    warn!("{}: describes {described}, not {file_name}", manifest.path);
                }
                parsed.push(found);
            }
            Err(err @ ManifestError::Malformed { .. }) => {
                warn!("{err}");
                problems.push(err.to_string());
            }
            Err(err @ ManifestError::Read { .. }) => {
                return (VerificationOutcome::error(err.to_string()), digests);
            }
        }
    }
    if parsed.is_empty() {
        let detail = (!problems.is_empty()).then(|| problems.join("; "));
        return (VerificationOutcome::MissingManifest { detail }, digests);
    }

    let missing: Vec<DigestAlgorithm> = parsed
        .iter()
        .map(|m| m.algorithm)
        .filter(|alg| !digests.contains_key(alg))
        .collect();
    if !missing.is_empty() {
        match digest_file(location, &missing) {
            Ok(computed) => digests.extend(computed),
            Err(err) => return (VerificationOutcome::error(err.to_string()), digests),
        }
    }

    for manifest in &parsed {
        let Some(actual) = digests.get(&manifest.algorithm) else {
            continue;
        };
        if *actual != manifest.expected {
            return (
                VerificationOutcome::DigestMismatch {
                    algorithm: manifest.algorithm,
                    expected: manifest.expected.to_string(),
                    actual: actual.to_string(),
                },
                digests,
            );
        }
    }
    if !problems.is_empty() {
        return (
            VerificationOutcome::MissingManifest {
                detail: Some(problems.join("; ")),
            },
            digests,
        );
    }
    let outcome = if parsed.iter().all(|m| m.algorithm.is_weak()) {
        VerificationOutcome::OkWeak
    } else {
        VerificationOutcome::Ok
    };
    (outcome, digests)
}

#[cfg(test)]
#[path = "orchestrator_tests.rs"]
mod tests;
