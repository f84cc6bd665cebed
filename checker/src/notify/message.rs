//! Rendering of notification messages.
//!
//! One message is sent per project per run. The body lists every artefact
//! due for notification with the diagnostic lines for its outcome.

use super::DEFAULT_RENOTIFY_COOLDOWN;
use crate::store::ArtefactRecord;
use chrono::TimeDelta;
use dist_integrity_common::{ArtefactKey, Namespace, VerificationOutcome};
use std::time::Duration;

/// An addressed message ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Project the message is about.
    pub namespace: Namespace,
    /// `From` address.
    pub sender: String,
    /// `To` addresses.
    pub recipients: Vec<String>,
    /// Subject line.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
    /// Artefacts the message reports.
    pub artefacts: Vec<ArtefactKey>,
}

/// Human-readable lines explaining `outcome` for the artefact `key`.
///
/// # Examples
///
/// ```
/// use dist_integrity_checker::notify::diagnostic_lines;
/// use dist_integrity_common::{ArtefactKey, Namespace, VerificationOutcome};
///
/// let key = ArtefactKey::new(Namespace::try_from("foo").unwrap(), "foo-1.0.tar.gz").unwrap();
/// let lines = diagnostic_lines(&key, &VerificationOutcome::MissingSignature);
/// assert!(lines[0].contains("foo-1.0.tar.gz.asc"));
/// ```
#[must_use]
pub fn diagnostic_lines(key: &ArtefactKey, outcome: &VerificationOutcome) -> Vec<String> {
    let file = key.file_name();
    match outcome {
        VerificationOutcome::Ok | VerificationOutcome::OkWeak => Vec::new(),
        VerificationOutcome::MissingSignature => vec![format!(
            "No detached signature file ({file}.asc) could be found for {file}."
        )],
        VerificationOutcome::MissingManifest { detail } => {
            let mut lines = vec![format!(
                "No valid checksum file ({file}.sha256 or {file}.sha512) could be found for {file}."
            )];
            lines.extend(detail.iter().cloned());
            lines
        }
        VerificationOutcome::DigestMismatch {
            algorithm,
            expected,
            actual,
        } => {
            let manifest = format!("{file}.{}", algorithm.extension());
            vec![
                format!("Checksum does not match checksum file {manifest}!"),
                format!("Calculated {algorithm} checksum of {file} was: {actual}"),
                format!("Checksum file {manifest} said it should have been: {expected}"),
            ]
        }
        VerificationOutcome::SignatureInvalid {
            reason,
            key: signer,
            detail,
        } => {
            let mut lines = vec![format!(
                "The detached signature for {file} could not be verified: {reason}."
            )];
            if let Some(signer) = signer {
                lines.push(format!("Signing key: {signer}"));
            }
            lines.extend(detail.iter().cloned());
            lines
        }
        VerificationOutcome::Error { reason } => vec![
            format!("{file} could not be verified: {reason}"),
            "The check will be retried on the next run.".to_owned(),
        ],
    }
}

/// Builds subjects and bodies.
#[derive(Debug, Clone)]
pub struct MessageComposer {
    sender: String,
    site_name: String,
    renotify_cooldown: Duration,
}

impl MessageComposer {
    /// Create a composer sending as `sender` on behalf of `site_name`.
    #[must_use]
    pub fn new(sender: impl Into<String>, site_name: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            site_name: site_name.into(),
            renotify_cooldown: DEFAULT_RENOTIFY_COOLDOWN,
        }
    }

    /// State `cooldown` as the interval before an unchanged failure is
    /// reported again.
    #[must_use]
    pub const fn with_renotify_cooldown(mut self, cooldown: Duration) -> Self {
        self.renotify_cooldown = cooldown;
        self
    }

    /// Compose the message for `namespace` covering `records`.
    #[must_use]
    pub fn compose(
        &self,
        namespace: &Namespace,
        recipients: Vec<String>,
        records: &[&ArtefactRecord],
    ) -> Notification {
        let subject = format!(
            "Verification of download artefacts on {} FAILED for {namespace}!",
            self.site_name
        );
        let mut body = format!(
            "Dear {namespace} PMC,\n\n\
             An automated verification of the release artefacts published on {} \
             found problems with {} file(s). Please correct them as soon as possible.\n\n",
            self.site_name,
            records.len()
        );
        for record in records {
            body.push_str(&format!(
                "Errors were found while verifying {} ({}):\n",
                record.key.path(),
                record.outcome.kind()
            ));
            for line in diagnostic_lines(&record.key, &record.outcome) {
                body.push_str(&format!(" - {line}\n"));
            }
            body.push_str(&format!(
                " - First seen: {}\n\n",
                record.outcome_first_seen.format("%Y-%m-%d %H:%M UTC")
            ));
        }
        body.push_str(&format!(
            "This message was generated by the distribution integrity checker.\n\
             If the problems above are still unresolved it will be sent again in {}. \
             A change in any of them is reported on the next run.\n",
            describe_interval(self.renotify_cooldown)
        ));
        Notification {
            namespace: namespace.clone(),
            sender: self.sender.clone(),
            recipients,
            subject,
            body,
            artefacts: records.iter().map(|r| r.key.clone()).collect(),
        }
    }
}

/// Render `interval` in the largest whole unit, for message text.
fn describe_interval(interval: Duration) -> String {
    let delta = TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX);
    if delta.num_days() > 0 {
        format!("{} day(s)", delta.num_days())
    } else if delta.num_hours() > 0 {
        format!("{} hour(s)", delta.num_hours())
    } else {
        format!("{} minute(s)", delta.num_minutes())
    }
}
