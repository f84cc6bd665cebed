//! Concurrency slots that outlive cancelled futures.
//!
//! A pass bounds its evaluations with a semaphore. When an evaluation times
//! out its future is dropped, yet the blocking work it started keeps running
//! on tokio's blocking pool. Every such closure holds a clone of the
//! evaluation's [`WorkSlot`], so the permit returns to the semaphore only
//! once the last piece of work has finished.

use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::JoinError;

/// Shared ownership of one semaphore permit.
#[derive(Debug, Clone, Default)]
pub struct WorkSlot {
    permit: Option<Arc<OwnedSemaphorePermit>>,
}

impl WorkSlot {
    /// Wrap `permit`; it is released when the last clone is dropped.
    #[must_use]
    pub fn new(permit: OwnedSemaphorePermit) -> Self {
        Self {
            permit: Some(Arc::new(permit)),
        }
    }

    /// A slot that bounds nothing, for callers outside a pass.
    #[must_use]
    pub const fn detached() -> Self {
        Self { permit: None }
    }

    /// Run `work` on the blocking pool while holding this slot.
    ///
    /// # Errors
    ///
    /// Returns the [`JoinError`] when the blocking task panicked or was
    /// cancelled by runtime shutdown.
    pub async fn run_blocking<T, F>(&self, work: F) -> Result<T, JoinError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let held = self.clone();
        tokio::task::spawn_blocking(move || {
            let result = work();
            drop(held);
            result
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn permit_stays_taken_until_abandoned_work_finishes() {
        let semaphore = Arc::new(Semaphore::new(1));
        let permit = Arc::clone(&semaphore)
            .acquire_owned()
            .await
            .expect("semaphore open");
        let slot = WorkSlot::new(permit);

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            slot.run_blocking(|| std::thread::sleep(Duration::from_millis(200))),
        )
        .await;
        assert!(abandoned.is_err(), "the blocking work outlives the timeout");
        drop(slot);
        assert_eq!(semaphore.available_permits(), 0);

        let reacquired =
            tokio::time::timeout(Duration::from_secs(5), Arc::clone(&semaphore).acquire_owned())
                .await;
        assert!(matches!(reacquired, Ok(Ok(_))));
    }

    #[tokio::test]
    async fn detached_slot_runs_work() {
        let value = WorkSlot::detached()
            .run_blocking(|| 6 * 7)
            .await
            .expect("blocking task");
        assert_eq!(value, 42);
    }
}
