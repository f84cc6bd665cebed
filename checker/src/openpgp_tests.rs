//! Unit tests for the Sequoia-backed key parsing and signature checks.

use super::*;
use camino::Utf8PathBuf;
use openpgp::serialize::SerializeInto;
use openpgp::types::HashAlgorithm;
use openpgp::serialize::stream::{Armorer, Message, Signer};
use rstest::{fixture, rstest};
use std::io::Write;

struct Signed {
    _dir: tempfile::TempDir,
    artefact: Utf8PathBuf,
    signature: Vec<u8>,
    cert: Cert,
}

fn generate_cert(uid: &str) -> Cert {
    let (cert, _revocation) = CertBuilder::new()
        .add_userid(uid)
        .add_signing_subkey()
        .generate()
        .expect("generate certificate");
    cert
}

fn sign_detached(cert: &Cert, data: &[u8]) -> Vec<u8> {
    sign_detached_with(cert, data, None)
}

fn sign_detached_with(cert: &Cert, data: &[u8], hash: Option<HashAlgorithm>) -> Vec<u8> {
    let policy = StandardPolicy::new();
    let keypair = cert
        .keys()
        .unencrypted_secret()
        .with_policy(&policy, None)
        .supported()
        .alive()
        .revoked(false)
        .for_signing()
        .next()
        .expect("signing key")
        .key()
        .clone()
        .into_keypair()
        .expect("keypair");
    let mut sink = Vec::new();
    {
        let message = Message::new(&mut sink);
        let message = Armorer::new(message)
            .kind(openpgp::armor::Kind::Signature)
            .build()
            .expect("armorer");
        let mut builder = Signer::new(message, keypair).detached();
        if let Some(hash) = hash {
            builder = builder.hash_algo(hash).expect("hash algorithm");
        }
        let mut signer = builder.build().expect("signer");
        signer.write_all(data).expect("sign");
        signer.finalize().expect("finalise");
    }
    sink
}

#[fixture]
fn signed() -> Signed {
    let dir = tempfile::tempdir().expect("temp dir");
    let artefact = Utf8PathBuf::from_path_buf(dir.path().join("foo-1.0.tar.gz"))
        .expect("utf-8 temp path");
    std::fs::write(&artefact, b"release bytes").expect("write artefact");
    let cert = generate_cert("Release Manager <rm@example.org>");
    let signature = sign_detached(&cert, b"release bytes");
    Signed {
        _dir: dir,
        artefact,
        signature,
        cert,
    }
}

fn keys_file(certs: &[&Cert]) -> Vec<u8> {
    let mut text = b"pub   ed25519 2024-01-01\nuid   Release Manager\n\n".to_vec();
    for cert in certs {
        text.extend(cert.armored().to_vec().expect("armour"));
        text.extend(b"\n\n");
    }
    text
}

#[test]
fn parses_every_block_and_skips_prose() {
    let first = generate_cert("First <first@example.org>");
    let second = generate_cert("Second <second@example.org>");
    let parsed = parse_keys(&keys_file(&[&first, &second]));
    assert_eq!(parsed.certs.len(), 2);
    assert!(parsed.rejected.is_empty());
}

#[test]
fn duplicate_blocks_are_collapsed() {
    let cert = generate_cert("Dup <dup@example.org>");
    let parsed = parse_keys(&keys_file(&[&cert, &cert]));
    assert_eq!(parsed.certs.len(), 1);
}

#[test]
fn corrupt_block_is_rejected_and_others_kept() {
    let good = generate_cert("Good <good@example.org>");
    let mut text = format!("{BLOCK_BEGIN}\n\nnot base64 at all\n{BLOCK_END}\n").into_bytes();
    text.extend(keys_file(&[&good]));
    let parsed = parse_keys(&text);
    assert_eq!(parsed.certs.len(), 1);
    assert_eq!(parsed.rejected.len(), 1);
}

#[test]
fn entries_cover_primary_and_subkeys() {
    let cert = generate_cert("Owner <owner@example.org>");
    let entries = key_ring_entries(&cert);
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|e| !e.revoked));
    assert!(entries
        .iter()
        .all(|e| e.owner.as_deref() == Some("Owner <owner@example.org>")));
    assert_eq!(entries[0].fingerprint, cert.fingerprint().to_hex());
}

#[rstest]
fn inspect_reports_the_signing_subkey(signed: Signed) {
    let info = OpenPgpBackend
        .inspect(&signed.signature)
        .expect("parseable signature");
    let ring = KeyRing::from_certs(vec![signed.cert.clone()]);
    assert!(ring.find(&info.issuers).is_some());
    assert!(info.created.is_some());
}

#[test]
fn inspect_rejects_garbage() {
    let err = OpenPgpBackend
        .inspect(b"definitely not a signature")
        .expect_err("garbage");
    assert!(matches!(err, SignatureError::Malformed { .. }));
}

#[rstest]
fn check_accepts_a_matching_signature(signed: Signed) {
    let ring = KeyRing::from_certs(vec![signed.cert.clone()]);
    let verdict = OpenPgpBackend
        .check(&signed.artefact, &signed.signature, &ring)
        .expect("readable artefact");
    assert_eq!(verdict, CryptoCheck::Good);
}

#[rstest]
fn check_rejects_tampered_bytes(signed: Signed) {
    std::fs::write(&signed.artefact, b"tampered bytes").expect("rewrite artefact");
    let ring = KeyRing::from_certs(vec![signed.cert.clone()]);
    let verdict = OpenPgpBackend
        .check(&signed.artefact, &signed.signature, &ring)
        .expect("readable artefact");
    assert!(matches!(verdict, CryptoCheck::Bad(_)), "got {verdict:?}");
}

#[rstest]
fn check_reports_missing_artefact_as_read_error(signed: Signed) {
    let ring = KeyRing::from_certs(vec![signed.cert.clone()]);
    let missing = signed.artefact.with_file_name("gone.tar.gz");
    let err = OpenPgpBackend
        .check(&missing, &signed.signature, &ring)
        .expect_err("missing artefact");
    assert!(matches!(err, SignatureError::Read { .. }));
}

#[rstest]
fn sha1_signature_is_refused_by_policy_not_mismatched(signed: Signed) {
    let weak = sign_detached_with(&signed.cert, b"release bytes", Some(HashAlgorithm::SHA1));
    let ring = KeyRing::from_certs(vec![signed.cert.clone()]);
    let verdict = OpenPgpBackend
        .check(&signed.artefact, &weak, &ring)
        .expect("readable artefact");
    assert!(matches!(verdict, CryptoCheck::Rejected(_)), "got {verdict:?}");
}

#[rstest]
fn sha1_signature_is_reported_as_policy_rejection(signed: Signed) {
    use crate::signature::SignatureVerifier;
    use dist_integrity_common::SignatureFailure;
    use std::sync::Arc;

    let weak = sign_detached_with(&signed.cert, b"release bytes", Some(HashAlgorithm::SHA1));
    let ring = KeyRing::from_certs(vec![signed.cert.clone()]);
    let verdict = SignatureVerifier::new(Arc::new(OpenPgpBackend))
        .verify(&signed.artefact, &weak, &ring, Utc::now())
        .expect("readable artefact");
    assert!(
        matches!(
            verdict,
            crate::signature::SignatureVerdict::Invalid {
                reason: SignatureFailure::PolicyRejected,
                ..
            }
        ),
        "got {verdict:?}"
    );
}
