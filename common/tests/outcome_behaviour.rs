//! Behaviour tests for outcome reconciliation.
//!
//! Scenarios check that the manifest and signature partial outcomes combine
//! according to the documented severity order.

use dist_integrity_common::algorithm::DigestAlgorithm;
use dist_integrity_common::outcome::{SignatureFailure, VerificationOutcome};
use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};

#[derive(Default)]
struct OutcomeWorld {
    manifest: Option<VerificationOutcome>,
    signature: Option<VerificationOutcome>,
    reconciled: Option<VerificationOutcome>,
}

#[fixture]
fn world() -> OutcomeWorld {
    OutcomeWorld::default()
}

fn outcome_named(name: &str) -> VerificationOutcome {
    match name {
        "ok" => VerificationOutcome::Ok,
        "ok-weak" => VerificationOutcome::OkWeak,
        "missing-signature" => VerificationOutcome::MissingSignature,
        "missing-manifest" => VerificationOutcome::missing_manifest(),
        "signature-invalid" => VerificationOutcome::SignatureInvalid {
            reason: SignatureFailure::CryptoMismatch,
            key: None,
            detail: None,
        },
        "digest-mismatch" => VerificationOutcome::DigestMismatch {
            algorithm: DigestAlgorithm::Sha512,
            expected: "abc123".to_owned(),
            actual: "def456".to_owned(),
        },
        "error" => VerificationOutcome::error("key source unreachable"),
        other => panic!("unknown outcome name in feature file: {other}"),
    }
}

#[given("a manifest outcome of \"{name}\"")]
fn given_manifest_outcome(world: &mut OutcomeWorld, name: String) {
    world.manifest = Some(outcome_named(&name));
}

#[given("a signature outcome of \"{name}\"")]
fn given_signature_outcome(world: &mut OutcomeWorld, name: String) {
    world.signature = Some(outcome_named(&name));
}

#[when("the outcomes are reconciled")]
fn when_reconciled(world: &mut OutcomeWorld) {
    let manifest = world.manifest.clone().expect("manifest outcome set");
    let signature = world.signature.clone().expect("signature outcome set");
    world.reconciled = Some(VerificationOutcome::reconcile(manifest, signature));
}

#[then("the reconciled outcome is \"{name}\"")]
fn then_reconciled_is(world: &mut OutcomeWorld, name: String) {
    let reconciled = world.reconciled.as_ref().expect("outcomes reconciled");
    assert_eq!(reconciled.kind().to_string(), name);
}

#[then("the reconciled outcome counts as verified")]
fn then_verified(world: &mut OutcomeWorld) {
    let reconciled = world.reconciled.as_ref().expect("outcomes reconciled");
    assert!(reconciled.is_success());
}

#[scenario(
    path = "tests/features/outcome_precedence.feature",
    name = "Matching digest and valid signature verify the artefact"
)]
fn scenario_all_checks_pass(world: OutcomeWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/outcome_precedence.feature",
    name = "A digest mismatch dominates an invalid signature"
)]
fn scenario_mismatch_dominates_signature(world: OutcomeWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/outcome_precedence.feature",
    name = "A missing manifest dominates a missing signature"
)]
fn scenario_missing_manifest_dominates(world: OutcomeWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/outcome_precedence.feature",
    name = "An unreadable key source dominates everything"
)]
fn scenario_error_dominates(world: OutcomeWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/outcome_precedence.feature",
    name = "A weak digest match with a valid signature is a weak success"
)]
fn scenario_weak_success(world: OutcomeWorld) {
    let _ = world;
}
