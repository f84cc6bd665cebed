//! A verification pass over one artefact set.
//!
//! [`VerificationRun`] evaluates the discovered artefacts on a bounded pool
//! of tasks, hands the fresh records to the notification dispatcher, and
//! marks records whose artefacts have disappeared as stale. Cancellation is
//! cooperative through [`RunControl`]: no new evaluation starts once a
//! shutdown was requested, and the evaluations already running finish and
//! persist their records.

use crate::error::{Result, RunError};
use crate::notify::NotificationDispatcher;
use crate::orchestrator::{Evaluation, Orchestrator};
use crate::slot::WorkSlot;
use crate::source::{ArtefactSource, Discovery};
use crate::store::{ArtefactRecord, RecordStore, StoreError, offload};
use chrono::{DateTime, Utc};
use dist_integrity_common::{ArtefactKey, Namespace, OutcomeKind};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

/// Shared cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    shutdown: Arc<AtomicBool>,
}

impl RunControl {
    /// Create a flag that is not set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask running passes to stop starting new evaluations.
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Return whether a shutdown was requested.
    #[must_use]
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// What a pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    /// Evaluations per outcome category, every category present.
    pub outcomes: BTreeMap<OutcomeKind, usize>,
    /// Keys newly reported in this pass.
    pub notified: Vec<ArtefactKey>,
    /// Projects whose notification could not be sent.
    pub failed_notifications: Vec<Namespace>,
    /// Artefacts evaluated and recorded.
    pub evaluated: usize,
    /// Evaluations that computed at least one digest.
    pub digests_computed: usize,
    /// Artefacts skipped because a shutdown was requested.
    pub skipped: usize,
    /// Repeated discoveries of a key that were dropped.
    pub duplicates: usize,
    /// Records newly marked stale.
    pub stale_marked: usize,
    /// Whether the pass stopped early.
    pub cancelled: bool,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self {
            outcomes: OutcomeKind::ALL.iter().map(|kind| (*kind, 0)).collect(),
            notified: Vec::new(),
            failed_notifications: Vec::new(),
            evaluated: 0,
            digests_computed: 0,
            skipped: 0,
            duplicates: 0,
            stale_marked: 0,
            cancelled: false,
        }
    }
}

impl RunSummary {
    /// Number of evaluations that ended in `kind`.
    #[must_use]
    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.get(&kind).copied().unwrap_or_default()
    }

    /// Number of evaluations that did not verify.
    #[must_use]
    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(kind, _)| !kind.is_success())
            .map(|(_, count)| count)
            .sum()
    }

    fn absorb(&mut self, evaluation: &Evaluation) {
        self.evaluated += 1;
        if evaluation.digests_computed {
            self.digests_computed += 1;
        }
        *self
            .outcomes
            .entry(evaluation.record.outcome.kind())
            .or_default() += 1;
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evaluated {} artefact(s):", self.evaluated)?;
        for (kind, count) in &self.outcomes {
            write!(f, " {kind}={count}")?;
        }
        write!(
            f,
            "; notified {}, {} failed send(s), {} duplicate(s), {} newly stale",
            self.notified.len(),
            self.failed_notifications.len(),
            self.duplicates,
            self.stale_marked
        )?;
        if self.cancelled {
            write!(f, "; cancelled with {} artefact(s) skipped", self.skipped)?;
        }
        Ok(())
    }
}

/// The pass entry point.
pub struct VerificationRun {
    orchestrator: Arc<Orchestrator>,
    dispatcher: NotificationDispatcher,
    store: Arc<dyn RecordStore>,
    concurrency: usize,
}

impl fmt::Debug for VerificationRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerificationRun")
            .field("orchestrator", &self.orchestrator)
            .field("dispatcher", &self.dispatcher)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl VerificationRun {
    /// Assemble a pass runner evaluating at most `concurrency` artefacts at
    /// once.
    #[must_use]
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        dispatcher: NotificationDispatcher,
        store: Arc<dyn RecordStore>,
        concurrency: usize,
    ) -> Self {
        Self {
            orchestrator,
            dispatcher,
            store,
            concurrency: concurrency.max(1),
        }
    }

    /// Discover artefacts from `source` and verify them.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when discovery fails or the record store becomes
    /// unusable.
    pub async fn run_source(
        &self,
        source: Arc<dyn ArtefactSource>,
        control: &RunControl,
    ) -> Result<RunSummary> {
        let discovery = tokio::task::spawn_blocking(move || source.discover())
            .await
            .map_err(|err| task_error("discovery", &err))??;
        self.run(discovery, control).await
    }

    /// Verify `discovery` as of now.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when the record store becomes unusable.
    pub async fn run(&self, discovery: Discovery, control: &RunControl) -> Result<RunSummary> {
        self.run_at(discovery, control, Utc::now()).await
    }

    /// Verify `discovery` as of `now`.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when the record store becomes unusable. The
    /// in-flight evaluations are awaited first so their records are not
    /// lost.
    pub async fn run_at(
        &self,
        discovery: Discovery,
        control: &RunControl,
        now: DateTime<Utc>,
    ) -> Result<RunSummary> {
        let mut pass = Pass::default();
        let offered: HashSet<ArtefactKey> = discovery
            .artefacts
            .iter()
            .map(|d| d.artefact.key.clone())
            .collect();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        let mut started = HashSet::new();

        for discovered in discovery.artefacts {
            let key = discovered.artefact.key.clone();
            if !started.insert(key.clone()) {
                warn!("{key}: discovered more than once, evaluating it once");
                pass.summary.duplicates += 1;
                continue;
            }
            while let Some(joined) = tasks.try_join_next() {
                pass.absorb(joined);
            }
            if pass.stopping(control) {
                pass.summary.skipped += 1;
                continue;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                pass.summary.skipped += 1;
                continue;
            };
            if pass.stopping(control) {
                pass.summary.skipped += 1;
                continue;
            }
            let orchestrator = Arc::clone(&self.orchestrator);
            let slot = WorkSlot::new(permit);
            tasks.spawn(async move { orchestrator.evaluate_in(&discovered, now, &slot).await });
        }
        while let Some(joined) = tasks.join_next().await {
            pass.absorb(joined);
        }

        let Pass {
            mut summary,
            records,
            fatal,
        } = pass;
        if let Some(err) = fatal {
            return Err(err);
        }
        summary.cancelled = control.is_shutdown_requested();
        if summary.cancelled {
            // Unsent notifications stay due: the records carry no mark yet.
            info!("pass cancelled: {summary}");
            return Ok(summary);
        }

        let report = self.dispatcher.dispatch(&self.store, records, now).await?;
        summary.notified = report.notified;
        summary.failed_notifications = report.failed;
        let complete = discovery.complete_namespaces;
        summary.stale_marked = offload(&self.store, &WorkSlot::detached(), move |store| {
            mark_stale(store, &complete, &offered, now)
        })
        .await?;
        info!("pass complete: {summary}");
        Ok(summary)
    }
}

fn mark_stale(
    store: &dyn RecordStore,
    namespaces: &[Namespace],
    offered: &HashSet<ArtefactKey>,
    now: DateTime<Utc>,
) -> std::result::Result<usize, StoreError> {
    let mut marked = 0;
    for namespace in namespaces {
        for key in store.keys_in(namespace)? {
            if offered.contains(&key) {
                continue;
            }
            let Some(mut record) = store.get(&key)? else {
                continue;
            };
            if record.stale {
                continue;
            }
            debug!("{key}: no longer published, marking stale as of {now}");
            record.stale = true;
            store.put(&record)?;
            marked += 1;
        }
    }
    Ok(marked)
}

/// Accumulates task results for one pass.
#[derive(Default)]
struct Pass {
    summary: RunSummary,
    records: Vec<ArtefactRecord>,
    fatal: Option<RunError>,
}

impl Pass {
    fn stopping(&self, control: &RunControl) -> bool {
        self.fatal.is_some() || control.is_shutdown_requested()
    }

    fn absorb(
        &mut self,
        joined: std::result::Result<std::result::Result<Evaluation, StoreError>, JoinError>,
    ) {
        match joined {
            Ok(Ok(evaluation)) => {
                self.summary.absorb(&evaluation);
                self.records.push(evaluation.record);
            }
            Ok(Err(err)) => {
                warn!("record store failed, stopping the pass: {err}");
                self.fatal.get_or_insert(RunError::Store(err));
            }
            Err(err) => {
                warn!("evaluation task failed, stopping the pass: {err}");
                self.fatal
                    .get_or_insert_with(|| task_error("evaluation", &err));
            }
        }
    }
}

fn task_error(task: &'static str, err: &JoinError) -> RunError {
    RunError::Task {
        task,
        reason: err.to_string(),
    }
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
