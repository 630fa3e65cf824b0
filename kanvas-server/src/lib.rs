//! # Kanvas Server Library
//!
//! Project API, generation orchestration, provider and storage clients,
//! autosave and the studio event stream. Used by both the binary and the
//! integration tests.

use std::sync::Arc;

use kanvas_core::{AutosaveConfig, ProjectStore};

pub mod autosave;
pub mod config;
pub mod events;
pub mod health;
pub mod metrics;
pub mod orchestrator;
pub mod provider;
pub mod retry;
pub mod routes;
pub mod upload;
pub mod validation;

pub use autosave::{spawn_autosave_task, AutosaveQueue};
pub use config::Config;
pub use events::{EventBus, StudioEvent};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorError};
pub use provider::{GenerationProvider, ProviderClient, ProviderError};
pub use retry::{RetryConfig, Retryable};
pub use routes::{router, ApiError};
pub use upload::{StorageClient, UploadError};

/// Shared application state.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Projects and assets.
    pub store: ProjectStore,
    /// Generation orchestrator.
    pub orchestrator: Orchestrator,
    /// Studio event broadcast.
    pub events: EventBus,
    /// Projects waiting to be written.
    pub autosave: AutosaveQueue,
}

impl AppState {
    /// Wire up state around a store and a generation provider.
    #[must_use]
    pub fn new(
        store: ProjectStore,
        provider: Arc<dyn GenerationProvider>,
        storage: Option<StorageClient>,
        autosave: AutosaveConfig,
        config: OrchestratorConfig,
    ) -> Self {
        let events = EventBus::new();
        let autosave = AutosaveQueue::new(autosave);
        let orchestrator = Orchestrator::new(
            provider,
            storage,
            store.clone(),
            events.clone(),
            autosave.clone(),
            config,
        );
        Self {
            store,
            orchestrator,
            events,
            autosave,
        }
    }

    /// Queue a project for autosave and tell subscribers it changed.
    pub fn project_changed(&self, project_id: &str) {
        self.autosave.touch(project_id);
        self.publish_project(project_id);
    }

    /// Tell subscribers about the current state of a project.
    pub fn publish_project(&self, project_id: &str) {
        let summary = self
            .store
            .update(project_id, |canvas| (canvas.element_count(), canvas.last_modified()));
        if let Ok((element_count, last_modified)) = summary {
            self.events.publish(StudioEvent::ProjectUpdated {
                project_id: project_id.to_string(),
                element_count,
                last_modified,
            });
        }
    }
}
