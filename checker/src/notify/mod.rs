//! Deduplicated failure notifications.
//!
//! [`NotificationPolicy`] decides per record whether a failure must be
//! reported. [`NotificationDispatcher`] groups the due records by project,
//! sends one message per project and marks the records as notified only
//! after the transport accepted the message. A failed send leaves the records
//! unmarked so the next run retries them.

mod message;
mod recipients;
mod transport;

pub use message::{MessageComposer, Notification, diagnostic_lines};
pub use recipients::{MailMapError, RecipientResolver, fetch_mail_map, parse_mail_map};
#[cfg(test)]
pub use transport::MockNotificationTransport;
pub use transport::{
    LogTransport, NotificationTransport, SENDMAIL_TIMEOUT, SendmailTransport, TransportError,
    render_rfc5322,
};

use crate::slot::WorkSlot;
use crate::store::{ArtefactRecord, NotificationMark, RecordStore, StoreError, offload};
use chrono::{DateTime, TimeDelta, Utc};
use dist_integrity_common::{ArtefactKey, Namespace, OutcomeKind};
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Default interval before an unresolved failure is reported again.
pub const DEFAULT_RENOTIFY_COOLDOWN: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Why a record is being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyReason {
    /// First failing observation for this artefact version.
    FirstFailure,
    /// The outcome category differs from the one last reported.
    OutcomeChanged {
        /// Category previously reported.
        previous: OutcomeKind,
    },
    /// The same failure is still unresolved after the cooldown.
    CooldownElapsed {
        /// When it was last reported.
        last_notified: DateTime<Utc>,
    },
}

/// Outcome of [`NotificationPolicy::decide`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Nothing to report.
    Skip,
    /// Report the record.
    Notify(NotifyReason),
}

/// The deduplication rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationPolicy {
    /// Minimum interval before an unchanged, unresolved failure is reported
    /// again.
    pub renotify_cooldown: Duration,
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self {
            renotify_cooldown: DEFAULT_RENOTIFY_COOLDOWN,
        }
    }
}

impl NotificationPolicy {
    /// Decide whether `record` must be reported at `now`.
    ///
    /// Successful outcomes are never reported. A failure is reported when it
    /// has not been reported for this version, when its category changed
    /// since the last report, or when the cooldown has elapsed.
    #[must_use]
    pub fn decide(&self, record: &ArtefactRecord, now: DateTime<Utc>) -> Decision {
        let kind = record.outcome.kind();
        if kind.is_success() {
            return Decision::Skip;
        }
        let Some(mark) = record.last_notified else {
            return Decision::Notify(NotifyReason::FirstFailure);
        };
        if mark.kind != kind {
            return Decision::Notify(NotifyReason::OutcomeChanged {
                previous: mark.kind,
            });
        }
        let cooldown = TimeDelta::from_std(self.renotify_cooldown).unwrap_or(TimeDelta::MAX);
        if now.signed_duration_since(mark.at) >= cooldown {
            Decision::Notify(NotifyReason::CooldownElapsed {
                last_notified: mark.at,
            })
        } else {
            Decision::Skip
        }
    }
}

/// What one dispatch achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Keys whose failure was reported and recorded.
    pub notified: Vec<ArtefactKey>,
    /// Projects whose message could not be sent.
    pub failed: Vec<Namespace>,
}

/// Sends due notifications and records them.
pub struct NotificationDispatcher {
    policy: NotificationPolicy,
    transport: Arc<dyn NotificationTransport>,
    recipients: Mutex<RecipientResolver>,
    mail_map_url: Option<String>,
    composer: MessageComposer,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("policy", &self.policy)
            .field("mail_map_url", &self.mail_map_url)
            .field("composer", &self.composer)
            .finish_non_exhaustive()
    }
}

impl NotificationDispatcher {
    /// Assemble a dispatcher.
    #[must_use]
    pub fn new(
        policy: NotificationPolicy,
        transport: Arc<dyn NotificationTransport>,
        recipients: RecipientResolver,
        composer: MessageComposer,
    ) -> Self {
        Self {
            policy,
            transport,
            recipients: Mutex::new(recipients),
            mail_map_url: None,
            composer: composer.with_renotify_cooldown(policy.renotify_cooldown),
        }
    }

    /// Refresh the committee mail map from `url` before each dispatch.
    #[must_use]
    pub fn with_mail_map_url(mut self, url: Option<String>) -> Self {
        self.mail_map_url = url;
        self
    }

    /// The dedup rule in force.
    #[must_use]
    pub const fn policy(&self) -> NotificationPolicy {
        self.policy
    }

    /// Report every due record among `records` and persist the marks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when a notification mark cannot be written. The
    /// message has been sent by then, so the next run may report it again.
    pub async fn dispatch(
        &self,
        store: &Arc<dyn RecordStore>,
        records: Vec<ArtefactRecord>,
        now: DateTime<Utc>,
    ) -> Result<DispatchReport, StoreError> {
        let mut due: BTreeMap<Namespace, Vec<ArtefactRecord>> = BTreeMap::new();
        for record in records {
            match self.policy.decide(&record, now) {
                Decision::Skip => debug!("{}: no notification due", record.key),
                Decision::Notify(reason) => {
                    debug!("{}: notification due ({reason:?})", record.key);
                    due.entry(record.key.namespace().clone())
                        .or_default()
                        .push(record);
                }
            }
        }

        let mut report = DispatchReport::default();
        if due.is_empty() {
            return Ok(report);
        }
        self.refresh_mail_map().await;

        for (namespace, mut records) in due {
            let recipients = self
                .recipients
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .recipients_for(&namespace);
            let refs: Vec<&ArtefactRecord> = records.iter().collect();
            let message = self.composer.compose(&namespace, recipients, &refs);
            let transport = Arc::clone(&self.transport);
            let sent = tokio::task::spawn_blocking(move || transport.send(&message))
                .await
                .unwrap_or_else(|err| {
                    Err(TransportError::Spawn {
                        program: "notification task".into(),
                        source: std::io::Error::other(err.to_string()),
                    })
                });
            match sent {
                Ok(()) => {
                    info!("{namespace}: reported {} artefact(s)", records.len());
                    for record in &mut records {
                        record.last_notified = Some(NotificationMark {
                            kind: record.outcome.kind(),
                            at: now,
                        });
                    }
                    report
                        .notified
                        .extend(records.iter().map(|record| record.key.clone()));
                    offload(store, &WorkSlot::detached(), move |target| {
                        records.iter().try_for_each(|record| target.put(record))
                    })
                    .await?;
                }
                Err(err) => {
                    warn!("{namespace}: notification not sent, will retry next run: {err}");
                    report.failed.push(namespace);
                }
            }
        }
        Ok(report)
    }

    async fn refresh_mail_map(&self) {
        let Some(url) = self.mail_map_url.clone() else {
            return;
        };
        match tokio::task::spawn_blocking(move || fetch_mail_map(&url)).await {
            Ok(Ok(map)) => self
                .recipients
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .set_mail_map(map),
            Ok(Err(err)) => warn!("{err}; using the previous mail map"),
            Err(err) => warn!("mail map task failed: {err}"),
        }
    }
}

#[cfg(test)]
#[path = "notify_tests.rs"]
mod tests;
