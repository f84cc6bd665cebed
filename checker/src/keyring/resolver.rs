//! Namespace-keyed key ring cache with single-flight refresh.
//!
//! Each namespace owns a slot guarded by an async mutex. The first caller to
//! find the slot empty or older than the refresh interval performs the fetch
//! while holding the slot; concurrent callers for the same namespace wait on
//! the mutex and then see the fresh ring, so one staleness window costs at
//! most one fetch. Different namespaces never contend.
//!
//! When a refresh fails and an older ring is cached, the old ring is served
//! and a warning logged. Only a failure with nothing cached is an error.
//!
//! Keys the operator has revoked out of band are marked revoked in every
//! ring the resolver hands out, whatever the project's KEYS file says.

use super::{KeyRing, KeySource, KeySourceError};
use crate::slot::WorkSlot;
use dist_integrity_common::Namespace;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

/// Errors returned when no key ring can be produced for a namespace.
#[derive(Debug, thiserror::Error)]
pub enum KeyRingError {
    /// The source failed and nothing was cached.
    #[error("no key ring available for {namespace}: {source}")]
    Unavailable {
        /// Namespace that was requested.
        namespace: String,
        /// Why the fetch failed.
        #[source]
        source: KeySourceError,
    },

    /// The fetch task did not complete.
    #[error("key ring fetch for {namespace} was aborted: {reason}")]
    Aborted {
        /// Namespace that was requested.
        namespace: String,
        /// Join failure description.
        reason: String,
    },
}

#[derive(Default)]
struct Slot {
    cached: Option<Cached>,
}

struct Cached {
    ring: Arc<KeyRing>,
    fetched_at: Instant,
}

/// Shared, read-mostly cache of key rings per namespace.
pub struct KeyRingResolver {
    source: Arc<dyn KeySource>,
    refresh_interval: Duration,
    revoked: Vec<String>,
    slots: Mutex<HashMap<Namespace, Arc<AsyncMutex<Slot>>>>,
    fetches: AtomicU64,
}

impl std::fmt::Debug for KeyRingResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRingResolver")
            .field("refresh_interval", &self.refresh_interval)
            .field("revoked", &self.revoked)
            .field("fetches", &self.fetch_count())
            .finish_non_exhaustive()
    }
}

impl KeyRingResolver {
    /// Create a resolver over `source` that refetches rings older than
    /// `refresh_interval`.
    #[must_use]
    pub fn new(source: Arc<dyn KeySource>, refresh_interval: Duration) -> Self {
        Self {
            source,
            refresh_interval,
            revoked: Vec::new(),
            slots: Mutex::new(HashMap::new()),
            fetches: AtomicU64::new(0),
        }
    }

    /// Treat the keys named by `handles` (ids or fingerprints) as revoked in
    /// every ring this resolver returns.
    #[must_use]
    pub fn with_revoked_keys(mut self, handles: impl IntoIterator<Item = String>) -> Self {
        self.revoked = handles.into_iter().collect();
        self
    }

    /// Number of fetches issued to the source since construction.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    fn slot(&self, namespace: &Namespace) -> Arc<AsyncMutex<Slot>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(namespace.clone()).or_default())
    }

    /// Return the trusted ring for `namespace`, refreshing it when missing or
    /// older than the refresh interval.
    ///
    /// # Errors
    ///
    /// Returns [`KeyRingError`] when the source fails and no earlier ring is
    /// cached for the namespace.
    pub async fn resolve(&self, namespace: &Namespace) -> Result<Arc<KeyRing>, KeyRingError> {
        self.resolve_in(namespace, &WorkSlot::detached()).await
    }

    /// As [`resolve`](Self::resolve), with any fetch holding `work` until
    /// it returns.
    ///
    /// # Errors
    ///
    /// Returns [`KeyRingError`] when the source fails and no earlier ring is
    /// cached for the namespace.
    pub async fn resolve_in(
        &self,
        namespace: &Namespace,
        work: &WorkSlot,
    ) -> Result<Arc<KeyRing>, KeyRingError> {
        let cell = self.slot(namespace);
        let mut slot = cell.lock().await;
        if let Some(cached) = &slot.cached
            && cached.fetched_at.elapsed() < self.refresh_interval
        {
            return Ok(Arc::clone(&cached.ring));
        }

        self.fetches.fetch_add(1, Ordering::Relaxed);
        let source = Arc::clone(&self.source);
        let requested = namespace.clone();
        let fetched = work
            .run_blocking(move || source.fetch(&requested))
            .await
            .map_err(|err| KeyRingError::Aborted {
                namespace: namespace.to_string(),
                reason: err.to_string(),
            })?;

        match fetched {
            Ok(mut ring) => {
                let revoked: usize = self.revoked.iter().map(|handle| ring.revoke(handle)).sum();
                debug!(
                    "refreshed key ring for {namespace}: {} key(s), {revoked} revoked locally",
                    ring.entries().len()
                );
                let shared = Arc::new(ring);
                slot.cached = Some(Cached {
                    ring: Arc::clone(&shared),
                    fetched_at: Instant::now(),
                });
                Ok(shared)
            }
            Err(err) => {
                let Some(stale) = &slot.cached else {
                    return Err(KeyRingError::Unavailable {
                        namespace: namespace.to_string(),
                        source: err,
                    });
                };
                warn!(
                    "key ring refresh for {namespace} failed, serving copy from {}s ago: {err}",
                    stale.fetched_at.elapsed().as_secs()
                );
                Ok(Arc::clone(&stale.ring))
            }
        }
    }
}
