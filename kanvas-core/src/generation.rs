//! # Generation Tracking
//!
//! Book-keeping for AI generations in flight. The server registers a
//! generation when a request is accepted, updates it from each poll response
//! and finally marks it completed with the placed element IDs or failed with
//! a user-facing message.
//!
//! ```text
//! start ─► Queued{position} ─► Running ─► Completed{result_ids}
//!                     └────────────┴────► Failed{message}
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::element::{ElementId, MediaKind, Rect};
use crate::store::current_timestamp_ms;
use crate::{CanvasError, CanvasResult};

/// Unique identifier for a generation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GenerationId(Uuid);

impl GenerationId {
    /// Create a new unique generation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a generation ID from its string form.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::InvalidId`] if the string is not a UUID.
    pub fn parse(s: &str) -> CanvasResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| CanvasError::InvalidId(format!("{s}: {e}")))
    }
}

impl Default for GenerationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for GenerationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a generation is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GenerationStatus {
    /// Waiting at the provider.
    Queued {
        /// Queue position, when the provider reports one.
        position: Option<u32>,
    },
    /// Being generated.
    Running,
    /// Finished and placed on the canvas.
    Completed,
    /// Gave up.
    Failed {
        /// Message suitable for showing to the user.
        message: String,
    },
}

impl GenerationStatus {
    /// Completed or failed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Queued { .. } => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// A generation the server is tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveGeneration {
    /// Generation identifier.
    pub id: GenerationId,
    /// Project the results land in.
    pub project_id: String,
    /// Image or video.
    pub kind: MediaKind,
    /// Prompt sent to the provider.
    pub prompt: String,
    /// Provider model identifier.
    pub model: String,
    /// Current status.
    pub status: GenerationStatus,
    /// Canvas area reserved for the result.
    pub placement: Rect,
    /// Creation time (ms since epoch).
    pub created_at: u64,
    /// Last status change (ms since epoch).
    pub updated_at: u64,
    /// Elements placed on completion.
    #[serde(default)]
    pub result_ids: Vec<ElementId>,
}

/// All generations known to the server, keyed by ID.
#[derive(Debug, Clone, Default)]
pub struct GenerationTracker {
    generations: HashMap<GenerationId, ActiveGeneration>,
}

impl GenerationTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new generation in the queued state.
    pub fn start(
        &mut self,
        project_id: impl Into<String>,
        kind: MediaKind,
        prompt: impl Into<String>,
        model: impl Into<String>,
        placement: Rect,
    ) -> GenerationId {
        let now = current_timestamp_ms();
        let id = GenerationId::new();
        self.generations.insert(
            id,
            ActiveGeneration {
                id,
                project_id: project_id.into(),
                kind,
                prompt: prompt.into(),
                model: model.into(),
                status: GenerationStatus::Queued { position: None },
                placement,
                created_at: now,
                updated_at: now,
                result_ids: Vec::new(),
            },
        );
        id
    }

    /// Apply a status from the latest poll.
    ///
    /// The newest response replaces the previous one. Terminal states are
    /// final; a late response for a finished generation is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::ElementNotFound`] for an unknown generation.
    pub fn update_status(&mut self, id: GenerationId, status: GenerationStatus) -> CanvasResult<bool> {
        let generation = self.get_mut(id)?;
        if generation.status.is_terminal() {
            return Ok(false);
        }
        generation.status = status;
        generation.updated_at = current_timestamp_ms().max(generation.updated_at);
        Ok(true)
    }

    /// Mark a generation completed with the elements it placed.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::ElementNotFound`] for an unknown generation.
    pub fn complete(&mut self, id: GenerationId, result_ids: Vec<ElementId>) -> CanvasResult<()> {
        let generation = self.get_mut(id)?;
        generation.status = GenerationStatus::Completed;
        generation.result_ids = result_ids;
        generation.updated_at = current_timestamp_ms().max(generation.updated_at);
        Ok(())
    }

    /// Mark a generation failed.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::ElementNotFound`] for an unknown generation.
    pub fn fail(&mut self, id: GenerationId, message: impl Into<String>) -> CanvasResult<()> {
        let generation = self.get_mut(id)?;
        generation.status = GenerationStatus::Failed {
            message: message.into(),
        };
        generation.updated_at = current_timestamp_ms().max(generation.updated_at);
        Ok(())
    }

    /// Stop tracking a generation.
    pub fn remove(&mut self, id: GenerationId) -> Option<ActiveGeneration> {
        self.generations.remove(&id)
    }

    /// Look up a generation.
    #[must_use]
    pub fn get(&self, id: GenerationId) -> Option<&ActiveGeneration> {
        self.generations.get(&id)
    }

    /// Generations for one project, oldest first.
    #[must_use]
    pub fn for_project(&self, project_id: &str) -> Vec<&ActiveGeneration> {
        let mut found: Vec<_> = self
            .generations
            .values()
            .filter(|g| g.project_id == project_id)
            .collect();
        found.sort_by_key(|g| (g.created_at, g.id));
        found
    }

    /// Generations not yet completed or failed.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.generations
            .values()
            .filter(|g| !g.status.is_terminal())
            .count()
    }

    /// Drop finished generations last updated before `cutoff_ms`.
    ///
    /// Returns how many were removed.
    pub fn prune_finished(&mut self, cutoff_ms: u64) -> usize {
        let before = self.generations.len();
        self.generations
            .retain(|_, g| !(g.status.is_terminal() && g.updated_at < cutoff_ms));
        before - self.generations.len()
    }

    /// Total number tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.generations.len()
    }

    /// Check if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }

    fn get_mut(&mut self, id: GenerationId) -> CanvasResult<&mut ActiveGeneration> {
        self.generations
            .get_mut(&id)
            .ok_or_else(|| CanvasError::ElementNotFound(format!("generation {id}")))
    }
}
