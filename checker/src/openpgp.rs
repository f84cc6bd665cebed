//! OpenPGP support backed by Sequoia.
//!
//! Three jobs live here: splitting a project `KEYS` file into certificates,
//! deriving [`KeyRingEntry`] values from a certificate, and checking detached
//! signatures through [`OpenPgpBackend`].

use crate::keyring::{KeyRing, KeyRingEntry};
use crate::signature::{CryptoCheck, SignatureBackend, SignatureError, SignatureInfo};
use camino::Utf8Path;
use chrono::{DateTime, Utc};
use sequoia_openpgp as openpgp;
use openpgp::cert::prelude::*;
use openpgp::parse::Parse;
use openpgp::parse::stream::{
    DetachedVerifierBuilder, MessageLayer, MessageStructure, VerificationError,
    VerificationHelper,
};
use openpgp::policy::{Policy, StandardPolicy};
use openpgp::types::RevocationStatus;
use openpgp::{Cert, KeyHandle, Packet, PacketPile};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;

const BLOCK_BEGIN: &str = "-----BEGIN PGP PUBLIC KEY BLOCK-----";
const BLOCK_END: &str = "-----END PGP PUBLIC KEY BLOCK-----";

/// Certificates recovered from a `KEYS` file.
#[derive(Debug, Default)]
pub struct ParsedKeys {
    /// Certificates that parsed, deduplicated by fingerprint.
    pub certs: Vec<Cert>,
    /// One message per armoured block that was skipped.
    pub rejected: Vec<String>,
}

/// Extract every ASCII-armoured public key block from `raw`.
///
/// `KEYS` files interleave `pub`/`uid` listings and prose with the armoured
/// blocks; everything outside the blocks is ignored. A block that does not
/// parse is reported in [`ParsedKeys::rejected`] and skipped.
#[must_use]
pub fn parse_keys(raw: &[u8]) -> ParsedKeys {
    let text = String::from_utf8_lossy(raw);
    let mut parsed = ParsedKeys::default();
    let mut seen = BTreeSet::new();
    let mut rest: &str = &text;
    while let Some(start) = rest.find(BLOCK_BEGIN) {
        let tail = rest.get(start..).unwrap_or_default();
        let Some(end) = tail.find(BLOCK_END) else {
            parsed
                .rejected
                .push("unterminated public key block".to_owned());
            break;
        };
        let block_len = end + BLOCK_END.len();
        let block = tail.get(..block_len).unwrap_or_default();
        match Cert::from_bytes(block.as_bytes()) {
            Ok(cert) => {
                if seen.insert(cert.fingerprint().to_hex()) {
                    parsed.certs.push(cert);
                }
            }
            Err(err) => parsed.rejected.push(err.to_string()),
        }
        rest = tail.get(block_len..).unwrap_or_default();
    }
    parsed
}

/// Render a key handle as upper-case hex without spaces.
#[must_use]
pub fn handle_hex(handle: &KeyHandle) -> String {
    match handle {
        KeyHandle::Fingerprint(fpr) => fpr.to_hex(),
        KeyHandle::KeyID(id) => id.to_hex(),
    }
}

/// Derive one policy entry per primary key and subkey of `cert`.
///
/// Expiry and revocation are evaluated under the standard policy at the
/// current time. A revoked certificate revokes all of its keys.
#[must_use]
pub fn key_ring_entries(cert: &Cert) -> Vec<KeyRingEntry> {
    let policy = StandardPolicy::new();
    entries_under(cert, &policy)
}

fn entries_under(cert: &Cert, policy: &dyn Policy) -> Vec<KeyRingEntry> {
    let cert_revoked = matches!(
        cert.revocation_status(policy, None),
        RevocationStatus::Revoked(_)
    );
    let owner = cert
        .userids()
        .next()
        .map(|uid| String::from_utf8_lossy(uid.userid().value()).into_owned());
    cert.keys()
        .map(|ka| {
            let key = ka.key();
            let (valid_until, key_revoked) = match ka.clone().with_policy(policy, None) {
                Ok(valid) => (
                    valid.key_expiration_time().map(DateTime::<Utc>::from),
                    matches!(valid.revocation_status(), RevocationStatus::Revoked(_)),
                ),
                Err(_) => (None, false),
            };
            KeyRingEntry {
                key_id: key.keyid().to_hex(),
                fingerprint: key.fingerprint().to_hex(),
                owner: owner.clone(),
                valid_from: Some(DateTime::<Utc>::from(key.creation_time())),
                valid_until,
                revoked: cert_revoked || key_revoked,
            }
        })
        .collect()
}

/// Detached-signature checks over OpenPGP (`.asc` and binary `.sig`).
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenPgpBackend;

impl SignatureBackend for OpenPgpBackend {
    fn inspect(&self, blob: &[u8]) -> Result<SignatureInfo, SignatureError> {
        let malformed = |detail: String| SignatureError::Malformed { detail };
        let pile = PacketPile::from_bytes(blob).map_err(|err| malformed(err.to_string()))?;
        let signatures: Vec<_> = pile
            .descendants()
            .filter_map(|packet| match packet {
                Packet::Signature(sig) => Some(sig),
                _ => None,
            })
            .collect();
        if signatures.is_empty() {
            return Err(malformed("no signature packet found".to_owned()));
        }
        let mut issuers = Vec::new();
        for handle in signatures.iter().flat_map(|sig| sig.get_issuers()) {
            let hex = handle_hex(&handle);
            if !issuers.contains(&hex) {
                issuers.push(hex);
            }
        }
        let created = signatures
            .iter()
            .filter_map(|sig| sig.signature_creation_time())
            .min()
            .map(DateTime::<Utc>::from);
        Ok(SignatureInfo { issuers, created })
    }

    fn check(
        &self,
        artefact: &Utf8Path,
        blob: &[u8],
        ring: &KeyRing,
    ) -> Result<CryptoCheck, SignatureError> {
        let policy = StandardPolicy::new();
        let helper = RingHelper::new(ring.certs());
        let builder = match DetachedVerifierBuilder::from_bytes(blob) {
            Ok(builder) => builder,
            Err(err) => return Ok(CryptoCheck::Malformed(err.to_string())),
        };
        let mut verifier = match builder.with_policy(&policy, None, helper) {
            Ok(verifier) => verifier,
            Err(err) => return Ok(CryptoCheck::Malformed(err.to_string())),
        };
        let file = File::open(artefact).map_err(|source| SignatureError::Read {
            path: artefact.to_owned(),
            source,
        })?;
        if let Err(err) = verifier.verify_reader(BufReader::new(file)) {
            if let Some(io) = err.downcast_ref::<std::io::Error>() {
                return Err(SignatureError::Read {
                    path: artefact.to_owned(),
                    source: std::io::Error::new(io.kind(), io.to_string()),
                });
            }
            let helper = verifier.into_helper();
            return Ok(helper.verdict().unwrap_or_else(|| CryptoCheck::Bad(err.to_string())));
        }
        Ok(verifier
            .into_helper()
            .verdict()
            .unwrap_or_else(|| CryptoCheck::Bad("no signature was checked".to_owned())))
    }
}

/// How a single signature result failed, least severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Failure {
    Malformed,
    Rejected,
    Bad,
}

impl Failure {
    fn of(err: &VerificationError<'_>) -> Self {
        match err {
            VerificationError::MalformedSignature { error, .. }
                if is_policy_violation(error.downcast_ref()) =>
            {
                Self::Rejected
            }
            VerificationError::MalformedSignature { .. } => Self::Malformed,
            VerificationError::UnboundKey { .. } | VerificationError::BadKey { .. } => {
                Self::Rejected
            }
            VerificationError::BadSignature { error, .. }
                if is_policy_violation(error.downcast_ref()) =>
            {
                Self::Rejected
            }
            _ => Self::Bad,
        }
    }
}

const fn is_policy_violation(error: Option<&openpgp::Error>) -> bool {
    matches!(error, Some(openpgp::Error::PolicyViolation(..)))
}

/// Hands the ring's certificates to Sequoia and records per-signature
/// results.
struct RingHelper<'r> {
    certs: &'r [Cert],
    good: bool,
    worst: Option<Failure>,
    failures: Vec<String>,
}

impl<'r> RingHelper<'r> {
    fn new(certs: &'r [Cert]) -> Self {
        Self {
            certs,
            good: false,
            worst: None,
            failures: Vec::new(),
        }
    }

    fn verdict(&self) -> Option<CryptoCheck> {
        if self.good {
            return Some(CryptoCheck::Good);
        }
        let worst = self.worst?;
        let detail = self.failures.join("; ");
        Some(match worst {
            Failure::Malformed => CryptoCheck::Malformed(detail),
            Failure::Rejected => CryptoCheck::Rejected(detail),
            Failure::Bad => CryptoCheck::Bad(detail),
        })
    }
}

impl VerificationHelper for RingHelper<'_> {
    fn get_certs(&mut self, _ids: &[KeyHandle]) -> openpgp::Result<Vec<Cert>> {
        Ok(self.certs.to_vec())
    }

    fn check(&mut self, structure: MessageStructure) -> openpgp::Result<()> {
        for layer in structure {
            if let MessageLayer::SignatureGroup { results } = layer {
                for result in results {
                    match result {
                        Ok(_) => self.good = true,
                        Err(err) => {
                            let failure = Failure::of(&err);
                            self.worst = self.worst.max(Some(failure));
                            self.failures.push(err.to_string());
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "openpgp_tests.rs"]
mod tests;
