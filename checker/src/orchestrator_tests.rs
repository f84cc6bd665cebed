//! Unit tests for single-artefact evaluation.

use super::*;
use crate::keyring::KeyRingResolver;
use crate::source::{ArtefactSource, DistTreeSource};
use crate::store::MemoryRecordStore;
use crate::test_support::{DistFixture, StaticKeySource, StubSignatureBackend, trusted_ring};
use chrono::TimeZone;
use dist_integrity_common::{Namespace, OutcomeKind, SignatureFailure};
use rstest::{fixture, rstest};

const K1: &str = "1111111111111111111111111111111111111111";
const K2: &str = "2222222222222222222222222222222222222222";
const ARTEFACT: &str = "foo/1.0/foo-1.0.tar.gz";

struct Harness {
    tree: DistFixture,
    keys: Arc<StaticKeySource>,
    store: Arc<MemoryRecordStore>,
    orchestrator: Orchestrator,
}

impl Harness {
    fn with_policy(policy: VerificationPolicy) -> Self {
        let tree = DistFixture::new();
        let keys = Arc::new(StaticKeySource::new());
        keys.set_ring(&ns(), trusted_ring(&[K1]));
        let store = Arc::new(MemoryRecordStore::new());
        let resolver = Arc::new(KeyRingResolver::new(
            Arc::clone(&keys) as Arc<dyn crate::keyring::KeySource>,
            Duration::from_secs(3600),
        ));
        let orchestrator = Orchestrator::new(
            Arc::clone(&store) as Arc<dyn RecordStore>,
            resolver,
            SignatureVerifier::new(Arc::new(StubSignatureBackend)),
            policy,
        );
        Self {
            tree,
            keys,
            store,
            orchestrator,
        }
    }

    fn release(&self, content: &[u8]) {
        self.tree.write(ARTEFACT, content);
    }

    fn sign(&self, fingerprint: &str, content: &[u8]) {
        self.tree.write(
            &format!("{ARTEFACT}.asc"),
            StubSignatureBackend::sign(fingerprint, content),
        );
    }

    fn discovered(&self) -> DiscoveredArtefact {
        DistTreeSource::new(
            self.tree.root(),
            ["gz".to_owned()],
            DigestAlgorithm::ALL.to_vec(),
        )
        .discover()
        .expect("discover fixture tree")
        .artefacts
        .into_iter()
        .next()
        .expect("one artefact")
    }

    async fn evaluate(&self) -> Evaluation {
        self.orchestrator
            .evaluate(&self.discovered(), now())
            .await
            .expect("store available")
    }
}

fn ns() -> Namespace {
    Namespace::try_from("foo").expect("namespace")
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0)
        .single()
        .expect("timestamp")
}

#[fixture]
fn harness() -> Harness {
    Harness::with_policy(VerificationPolicy::default())
}

#[rstest]
#[tokio::test]
async fn good_digest_and_trusted_signature_is_ok(harness: Harness) {
    harness.release(b"release");
    harness.tree.correct_manifest(ARTEFACT, DigestAlgorithm::Sha256);
    harness.sign(K1, b"release");

    let evaluation = harness.evaluate().await;
    assert_eq!(evaluation.record.outcome, VerificationOutcome::Ok);
    assert!(evaluation.digests_computed);
    assert_eq!(harness.store.write_count(), 1);
}

#[rstest]
#[tokio::test]
async fn digest_mismatch_dominates_a_valid_signature(harness: Harness) {
    harness.release(b"release");
    harness
        .tree
        .write(&format!("{ARTEFACT}.sha256"), format!("{}\n", "ab".repeat(32)));
    harness.sign(K1, b"release");

    let evaluation = harness.evaluate().await;
    let VerificationOutcome::DigestMismatch {
        algorithm,
        expected,
        ..
    } = evaluation.record.outcome
    else {
        panic!("expected digest mismatch");
    };
    assert_eq!(algorithm, DigestAlgorithm::Sha256);
    assert_eq!(expected, "ab".repeat(32));
}

#[rstest]
#[tokio::test]
async fn every_strong_manifest_must_match(harness: Harness) {
    harness.release(b"release");
    harness.tree.correct_manifest(ARTEFACT, DigestAlgorithm::Sha256);
    harness
        .tree
        .write(&format!("{ARTEFACT}.sha512"), "cd".repeat(64));
    harness.sign(K1, b"release");

    let evaluation = harness.evaluate().await;
    assert_eq!(evaluation.record.outcome.kind(), OutcomeKind::DigestMismatch);
}

#[rstest]
#[tokio::test]
async fn nothing_but_the_artefact_is_missing_manifest(harness: Harness) {
    harness.release(b"release");
    let evaluation = harness.evaluate().await;
    assert_eq!(evaluation.record.outcome, VerificationOutcome::missing_manifest());
}

#[rstest]
#[tokio::test]
async fn unsigned_artefact_is_missing_signature(harness: Harness) {
    harness.release(b"release");
    harness.tree.correct_manifest(ARTEFACT, DigestAlgorithm::Sha512);
    let evaluation = harness.evaluate().await;
    assert_eq!(evaluation.record.outcome, VerificationOutcome::MissingSignature);
    assert_eq!(harness.keys.fetches(), 0);
}

#[rstest]
#[tokio::test]
async fn untrusted_signer_is_signature_invalid(harness: Harness) {
    harness.release(b"release");
    harness.tree.correct_manifest(ARTEFACT, DigestAlgorithm::Sha512);
    harness.sign(K2, b"release");
    let evaluation = harness.evaluate().await;
    assert!(matches!(
        evaluation.record.outcome,
        VerificationOutcome::SignatureInvalid {
            reason: SignatureFailure::UnknownKey,
            ..
        }
    ));
}

#[rstest]
#[tokio::test]
async fn weak_only_manifest_is_ok_weak(harness: Harness) {
    harness.release(b"release");
    harness.tree.correct_manifest(ARTEFACT, DigestAlgorithm::Md5);
    harness.sign(K1, b"release");
    let evaluation = harness.evaluate().await;
    assert_eq!(evaluation.record.outcome, VerificationOutcome::OkWeak);
}

#[tokio::test]
async fn weak_only_manifest_after_deadline_is_missing() {
    let harness = Harness::with_policy(VerificationPolicy {
        strong_checksum_deadline: Some(
            Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0)
                .single()
                .expect("timestamp"),
        ),
        ..VerificationPolicy::default()
    });
    harness.release(b"release");
    harness.tree.correct_manifest(ARTEFACT, DigestAlgorithm::Sha1);
    harness.sign(K1, b"release");
    let evaluation = harness.evaluate().await;
    let VerificationOutcome::MissingManifest { detail } = evaluation.record.outcome else {
        panic!("expected missing manifest");
    };
    assert!(detail.is_some_and(|d| d.contains("2000-01-01")));
}

#[rstest]
#[tokio::test]
async fn malformed_manifest_counts_as_missing_with_detail(harness: Harness) {
    harness.release(b"release");
    harness
        .tree
        .write(&format!("{ARTEFACT}.sha512"), "not a checksum\n");
    harness.sign(K1, b"release");
    let evaluation = harness.evaluate().await;
    let VerificationOutcome::MissingManifest { detail } = evaluation.record.outcome else {
        panic!("expected missing manifest");
    };
    assert!(detail.is_some_and(|d| d.contains("malformed")));
}

#[rstest]
#[tokio::test]
async fn malformed_manifest_beside_a_matching_one_is_not_ok(harness: Harness) {
    harness.release(b"release");
    harness.tree.correct_manifest(ARTEFACT, DigestAlgorithm::Sha256);
    harness
        .tree
        .write(&format!("{ARTEFACT}.sha512"), "this is not a checksum\n");
    harness.sign(K1, b"release");

    let evaluation = harness.evaluate().await;
    let VerificationOutcome::MissingManifest { detail } = evaluation.record.outcome else {
        panic!("expected missing manifest, got {:?}", evaluation.record.outcome);
    };
    assert!(detail.is_some_and(|d| d.contains(".sha512")));
}

#[rstest]
#[tokio::test]
async fn mismatch_still_wins_over_a_malformed_sibling(harness: Harness) {
    harness.release(b"release");
    harness
        .tree
        .write(&format!("{ARTEFACT}.sha256"), format!("{}\n", "ab".repeat(32)));
    harness
        .tree
        .write(&format!("{ARTEFACT}.sha512"), "this is not a checksum\n");
    harness.sign(K1, b"release");

    let evaluation = harness.evaluate().await;
    assert_eq!(evaluation.record.outcome.kind(), OutcomeKind::DigestMismatch);
}

#[rstest]
#[tokio::test]
async fn unreachable_key_source_is_an_error(harness: Harness) {
    harness.keys.set_failing(true);
    harness.release(b"release");
    harness.tree.correct_manifest(ARTEFACT, DigestAlgorithm::Sha512);
    harness.sign(K1, b"release");
    let evaluation = harness.evaluate().await;
    assert_eq!(evaluation.record.outcome.kind(), OutcomeKind::Error);
}

#[rstest]
#[tokio::test]
async fn unchanged_version_reuses_cached_digests(harness: Harness) {
    harness.release(b"release");
    harness.tree.correct_manifest(ARTEFACT, DigestAlgorithm::Sha256);
    harness.sign(K1, b"release");

    let first = harness.evaluate().await;
    assert!(first.digests_computed);
    let second = harness.evaluate().await;
    assert!(!second.digests_computed);
    assert_eq!(second.record.digests, first.record.digests);
}

#[tokio::test]
async fn slow_checks_time_out_as_error_and_are_recorded() {
    let harness = Harness::with_policy(VerificationPolicy {
        artefact_timeout: Duration::from_millis(50),
        ..VerificationPolicy::default()
    });
    harness.keys.set_delay(Duration::from_millis(500));
    harness.release(b"release");
    harness.tree.correct_manifest(ARTEFACT, DigestAlgorithm::Sha512);
    harness.sign(K1, b"release");

    let evaluation = harness.evaluate().await;
    let VerificationOutcome::Error { reason } = &evaluation.record.outcome else {
        panic!("expected error outcome");
    };
    assert!(reason.contains("timed out"));
    assert_eq!(harness.store.write_count(), 1);
}

#[tokio::test]
async fn store_failure_is_returned() {
    let tree = DistFixture::new();
    tree.write(ARTEFACT, b"release");
    let resolver = Arc::new(KeyRingResolver::new(
        Arc::new(StaticKeySource::new()),
        Duration::from_secs(3600),
    ));
    let orchestrator = Orchestrator::new(
        Arc::new(MemoryRecordStore::failing()),
        resolver,
        SignatureVerifier::new(Arc::new(StubSignatureBackend)),
        VerificationPolicy::default(),
    );
    let discovered = DistTreeSource::new(tree.root(), ["gz".to_owned()], Vec::new())
        .discover()
        .expect("discover")
        .artefacts
        .remove(0);
    let result = orchestrator.evaluate(&discovered, now()).await;
    assert!(matches!(result, Err(StoreError::Unavailable { .. })));
}
