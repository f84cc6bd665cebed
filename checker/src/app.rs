//! Assembly of a ready-to-run checker from configuration.

use crate::config::{CheckerConfig, ConfigError, KeySourceKind, TransportKind};
use crate::error::RunError;
use crate::keyring::{HttpKeySource, KeyRingResolver, KeySource, KeysFileSource};
use crate::notify::{
    LogTransport, MessageComposer, NotificationDispatcher, NotificationPolicy,
    NotificationTransport, RecipientResolver, SendmailTransport,
};
use crate::openpgp::OpenPgpBackend;
use crate::orchestrator::{Orchestrator, VerificationPolicy};
use crate::run::{RunControl, RunSummary, VerificationRun};
use crate::signature::SignatureVerifier;
use crate::source::{ArtefactSource, DistTreeSource};
use crate::store::{JournalStore, RecordStore, StoreError};
use log::{info, warn};
use std::sync::Arc;

/// Errors raised while assembling the checker.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The record store could not be opened.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Overrides supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct StartupOptions {
    /// Restrict passes to these projects.
    pub projects: Vec<String>,
    /// Log messages instead of sending them.
    pub dry_run: bool,
}

/// A configured checker.
pub struct Checker {
    run: VerificationRun,
    source: Arc<dyn ArtefactSource>,
}

impl std::fmt::Debug for Checker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checker")
            .field("run", &self.run)
            .finish_non_exhaustive()
    }
}

impl Checker {
    /// Build every collaborator described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError`] when the record store cannot be opened.
    pub fn build(config: &CheckerConfig, options: &StartupOptions) -> Result<Self, StartupError> {
        let state_path = config.resolved_state_path();
        let (journal, report) = JournalStore::open(state_path)?;
        info!(
            "record store {} holds {} record(s)",
            journal.path(),
            report.records
        );
        if report.skipped_lines > 0 {
            warn!(
                "record store {}: skipped {} unreadable line(s)",
                journal.path(),
                report.skipped_lines
            );
        }
        let store: Arc<dyn RecordStore> = Arc::new(journal);

        let keys: Arc<dyn KeySource> = match config.keyring.source {
            KeySourceKind::KeysFile => Arc::new(KeysFileSource::new(
                config.dist_dir.clone(),
                config.keyring.keys_file_names.clone(),
            )),
            KeySourceKind::Http => Arc::new(HttpKeySource::new(
                config.keyring.url_template.clone().unwrap_or_default(),
            )),
        };
        let resolver = Arc::new(
            KeyRingResolver::new(keys, config.keyring.refresh_interval())
                .with_revoked_keys(config.keyring.revoked_keys.iter().cloned()),
        );
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            resolver,
            SignatureVerifier::new(Arc::new(OpenPgpBackend)),
            VerificationPolicy {
                strong_checksum_deadline: config.deadline(),
                min_valid_signatures: config.engine.min_valid_signatures,
                artefact_timeout: config.engine.artefact_timeout(),
            },
        ));

        let transport: Arc<dyn NotificationTransport> =
            if options.dry_run || config.notify.transport == TransportKind::Log {
                Arc::new(LogTransport)
            } else {
                Arc::new(SendmailTransport::new(config.notify.sendmail_path.clone()))
            };
        let recipients = RecipientResolver::new(config.notify.mail_domain.clone())
            .with_overrides(config.notify.mail_lists.clone())
            .with_extra_recipients(config.notify.extra_recipients.clone());
        let dispatcher = NotificationDispatcher::new(
            NotificationPolicy {
                renotify_cooldown: config.engine.renotify_cooldown(),
            },
            transport,
            recipients,
            MessageComposer::new(config.notify.sender.clone(), config.site_name.clone()),
        )
        .with_mail_map_url(config.notify.mail_map_url.clone());

        let source = DistTreeSource::new(
            config.dist_dir.clone(),
            config.known_extensions.clone(),
            config.algorithms(),
        )
        .with_projects(options.projects.iter().cloned());

        Ok(Self {
            run: VerificationRun::new(orchestrator, dispatcher, store, config.engine.concurrency),
            source: Arc::new(source),
        })
    }

    /// Run one pass over the configured tree.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when the pass is aborted.
    pub async fn pass(&self, control: &RunControl) -> Result<RunSummary, RunError> {
        self.run
            .run_source(Arc::clone(&self.source), control)
            .await
    }
}
