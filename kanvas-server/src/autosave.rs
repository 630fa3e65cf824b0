//! Background autosave of dirty projects.
//!
//! Handlers and generation tasks call [`AutosaveQueue::touch`] after mutating
//! a project. [`spawn_autosave_task`] wakes up every half debounce window and
//! writes whatever the [`Debouncer`] reports as due.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use kanvas_core::{AutosaveConfig, Debouncer, Persisted, ProjectStore, StoreError};
use tokio::task::JoinHandle;

use crate::metrics;

/// Shared handle to the debouncer.
#[derive(Debug, Clone, Default)]
pub struct AutosaveQueue {
    inner: Arc<Mutex<Debouncer>>,
}

impl AutosaveQueue {
    /// Create a queue with the given timing.
    #[must_use]
    pub fn new(config: AutosaveConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Debouncer::new(config))),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Debouncer> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a change to `project_id`.
    pub fn touch(&self, project_id: &str) {
        self.lock().touch(project_id, Instant::now());
    }

    /// Projects due for saving now.
    #[must_use]
    pub fn due(&self) -> Vec<String> {
        self.lock().due(Instant::now())
    }

    /// Forget pending changes for `project_id`.
    pub fn mark_saved(&self, project_id: &str) {
        self.lock().mark_saved(project_id);
    }

    /// Whether `project_id` has unsaved changes.
    #[must_use]
    pub fn is_pending(&self, project_id: &str) -> bool {
        self.lock().is_pending(project_id)
    }

    /// The timing in use.
    #[must_use]
    pub fn config(&self) -> AutosaveConfig {
        self.lock().config()
    }

    /// How often the background task should check for due projects.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        (self.config().debounce / 2).max(Duration::from_millis(10))
    }
}

/// Persist every project in `project_ids`, returning how many were written.
///
/// The queue entry is cleared before writing, so a change that lands while a
/// project is being written queues it again.
pub fn save_projects(store: &ProjectStore, queue: &AutosaveQueue, project_ids: &[String]) -> usize {
    let mut saved = 0;
    for project_id in project_ids {
        queue.mark_saved(project_id);
        match store.persist(project_id) {
            Ok(Persisted::Skipped) => {}
            Ok(outcome) => {
                saved += 1;
                metrics::record_autosave("success");
                if outcome == Persisted::StillDirty {
                    queue.touch(project_id);
                }
            }
            Err(StoreError::ProjectNotFound(_)) => {
                // Deleted since it was touched
            }
            Err(e) => {
                queue.touch(project_id);
                metrics::record_autosave("failure");
                tracing::warn!(project_id = %project_id, error = %e, "Autosave failed");
            }
        }
    }
    saved
}

/// Projects that must be written before shutdown: queued or still dirty.
#[must_use]
pub fn unsaved_projects(store: &ProjectStore, queue: &AutosaveQueue) -> Vec<String> {
    store
        .project_ids()
        .into_iter()
        .filter(|id| queue.is_pending(id) || store.is_dirty(id))
        .collect()
}

/// Spawn the autosave loop.
///
/// Failed saves stay pending and are retried on a later tick.
pub fn spawn_autosave_task(store: ProjectStore, queue: AutosaveQueue) -> JoinHandle<()> {
    let tick = queue.tick_interval();
    tokio::spawn(async move {
        tracing::info!(interval_ms = tick.as_millis(), "Autosave task started");
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let due = queue.due();
            if due.is_empty() {
                continue;
            }
            let saved = save_projects(&store, &queue, &due);
            tracing::debug!(due = due.len(), saved, "Autosave tick");
        }
    })
}
