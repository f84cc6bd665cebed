//! Trusted key material per project namespace.
//!
//! A [`KeyRing`] pairs the policy view of each key ([`KeyRingEntry`]: ids,
//! validity window, revocation flag) with the certificates the cryptographic
//! backend needs. Rings are produced by a [`KeySource`] and cached by the
//! [`KeyRingResolver`]; verifiers only ever borrow them.

mod resolver;
mod source;

pub use resolver::{KeyRingError, KeyRingResolver};
pub use source::{HttpKeySource, KeySource, KeySourceError, KeysFileSource};

#[cfg(test)]
pub use source::MockKeySource;

use chrono::{DateTime, Utc};
use sequoia_openpgp::Cert;

/// A trusted public key as seen by the signature policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRingEntry {
    /// Upper-case hex key id (the low 64 bits of the fingerprint).
    pub key_id: String,
    /// Upper-case hex fingerprint.
    pub fingerprint: String,
    /// First user id on the owning certificate, for reports.
    pub owner: Option<String>,
    /// Start of the validity window.
    pub valid_from: Option<DateTime<Utc>>,
    /// End of the validity window; `None` means the key does not expire.
    pub valid_until: Option<DateTime<Utc>>,
    /// Whether the key or its certificate has been revoked.
    pub revoked: bool,
}

/// Result of checking a key against a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyValidity {
    /// Usable.
    Valid,
    /// Marked revoked.
    Revoked,
    /// The instant lies after the end of the validity window.
    Expired,
    /// The instant lies before the start of the validity window.
    NotYetValid,
}

impl KeyRingEntry {
    /// Build an entry for a key with no validity limits.
    #[must_use]
    pub fn new(key_id: impl Into<String>, fingerprint: impl Into<String>) -> Self {
        Self {
            key_id: key_id.into().to_ascii_uppercase(),
            fingerprint: fingerprint.into().to_ascii_uppercase(),
            owner: None,
            valid_from: None,
            valid_until: None,
            revoked: false,
        }
    }

    /// Return whether `handle` (a key id or fingerprint, any case, spaces
    /// ignored) names this key.
    #[must_use]
    pub fn matches(&self, handle: &str) -> bool {
        let normalised: String = handle
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| c.to_ascii_uppercase())
            .collect();
        normalised == self.key_id
            || normalised == self.fingerprint
            || (normalised.len() >= 16 && self.fingerprint.ends_with(&normalised))
    }

    /// Judge the key at `at`. Revocation wins over the validity window.
    #[must_use]
    pub fn validity_at(&self, at: DateTime<Utc>) -> KeyValidity {
        if self.revoked {
            return KeyValidity::Revoked;
        }
        if self.valid_from.is_some_and(|from| at < from) {
            return KeyValidity::NotYetValid;
        }
        if self.valid_until.is_some_and(|until| at >= until) {
            return KeyValidity::Expired;
        }
        KeyValidity::Valid
    }

    /// Short description used in notification bodies.
    #[must_use]
    pub fn describe(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{owner} ({})", self.fingerprint),
            None => self.fingerprint.clone(),
        }
    }
}

/// The trusted key set for one namespace.
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    entries: Vec<KeyRingEntry>,
    certs: Vec<Cert>,
}

impl KeyRing {
    /// Build a ring from explicit entries and certificates.
    #[must_use]
    pub fn new(entries: Vec<KeyRingEntry>, certs: Vec<Cert>) -> Self {
        Self { entries, certs }
    }

    /// Build a ring from OpenPGP certificates, deriving one entry per key.
    #[must_use]
    pub fn from_certs(certs: Vec<Cert>) -> Self {
        let entries = certs
            .iter()
            .flat_map(crate::openpgp::key_ring_entries)
            .collect();
        Self { entries, certs }
    }

    /// Find the entry for the first issuer handle that names a known key.
    #[must_use]
    pub fn find<S: AsRef<str>>(&self, issuers: &[S]) -> Option<&KeyRingEntry> {
        issuers.iter().find_map(|issuer| {
            self.entries
                .iter()
                .find(|entry| entry.matches(issuer.as_ref()))
        })
    }

    /// Every distinct entry named by `issuers`, in issuer order.
    #[must_use]
    pub fn find_all<S: AsRef<str>>(&self, issuers: &[S]) -> Vec<&KeyRingEntry> {
        let mut found: Vec<&KeyRingEntry> = Vec::new();
        for issuer in issuers {
            for entry in self.entries.iter().filter(|e| e.matches(issuer.as_ref())) {
                if !found.iter().any(|seen| seen.fingerprint == entry.fingerprint) {
                    found.push(entry);
                }
            }
        }
        found
    }

    /// Mark every key whose id or fingerprint matches `handle` as revoked.
    ///
    /// Returns the number of entries changed. Used to apply revocations
    /// published out of band.
    pub fn revoke(&mut self, handle: &str) -> usize {
        let mut changed = 0;
        for entry in self.entries.iter_mut().filter(|e| e.matches(handle)) {
            if !entry.revoked {
                entry.revoked = true;
                changed += 1;
            }
        }
        changed
    }

    /// Return the policy entries.
    #[must_use]
    pub fn entries(&self) -> &[KeyRingEntry] {
        &self.entries
    }

    /// Return the certificates handed to the cryptographic backend.
    #[must_use]
    pub fn certs(&self) -> &[Cert] {
        &self.certs
    }

    /// Return whether the ring holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
