//! Debounced auto-save scheduling.
//!
//! Mutations call [`Debouncer::touch`]; a periodic task asks [`Debouncer::due`]
//! which projects to persist. A project becomes due once it has been quiet for
//! the debounce window, or once its oldest unsaved change reaches `max_delay`
//! so a constantly edited project is still written.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Default quiet period before saving.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1500);

/// Default upper bound on how long a change may stay unsaved.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Auto-save timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosaveConfig {
    /// Quiet period after the last change.
    pub debounce: Duration,
    /// Longest time a change may wait.
    pub max_delay: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    first_change: Instant,
    last_change: Instant,
}

/// Tracks unsaved projects and decides when each should be written.
#[derive(Debug, Clone, Default)]
pub struct Debouncer {
    config: AutosaveConfig,
    pending: HashMap<String, Pending>,
}

impl Debouncer {
    /// Create a debouncer.
    #[must_use]
    pub fn new(config: AutosaveConfig) -> Self {
        Self {
            config,
            pending: HashMap::new(),
        }
    }

    /// The timing in use.
    #[must_use]
    pub fn config(&self) -> AutosaveConfig {
        self.config
    }

    /// Record a change to `project_id` at `now`.
    pub fn touch(&mut self, project_id: &str, now: Instant) {
        self.pending
            .entry(project_id.to_string())
            .and_modify(|p| p.last_change = p.last_change.max(now))
            .or_insert(Pending {
                first_change: now,
                last_change: now,
            });
    }

    /// Projects that should be saved at `now`, sorted by ID.
    #[must_use]
    pub fn due(&self, now: Instant) -> Vec<String> {
        let mut due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| {
                now.saturating_duration_since(p.last_change) >= self.config.debounce
                    || now.saturating_duration_since(p.first_change) >= self.config.max_delay
            })
            .map(|(id, _)| id.clone())
            .collect();
        due.sort();
        due
    }

    /// Forget pending changes for `project_id` after a successful save.
    pub fn mark_saved(&mut self, project_id: &str) {
        self.pending.remove(project_id);
    }

    /// Whether `project_id` has unsaved changes.
    #[must_use]
    pub fn is_pending(&self, project_id: &str) -> bool {
        self.pending.contains_key(project_id)
    }

    /// Number of projects with unsaved changes.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}
