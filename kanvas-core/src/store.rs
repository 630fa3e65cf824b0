//! Shared project storage.
//!
//! Provides a thread-safe [`ProjectStore`] holding the live [`Canvas`] of every
//! open project plus the [`AssetIndex`], shared by HTTP handlers, generation
//! tasks and the autosave loop. Projects are optionally persisted as JSON
//! documents in a data directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::asset::{Asset, AssetIndex};
use crate::canvas::Canvas;
use crate::conflict::{
    detect_element_conflicts, resolve, ConflictResolution, ConflictStrategy, ElementConflict,
};
use crate::document::{CanvasElement, ProjectDocument, SyncStatus};
use crate::element::{AssetId, PlacedImage, PlacedVideo};
use crate::reconcile::{self, AssetReport};
use crate::CanvasError;

/// Subdirectory of the data directory holding the asset index.
const ASSET_DIR: &str = "assets";

/// File name of the persisted asset index.
const ASSET_INDEX_FILE: &str = "index.json";

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The requested project does not exist.
    #[error("Project not found: {0}")]
    ProjectNotFound(String),
    /// The project belongs to someone else.
    #[error("Project {project_id} is not owned by {owner_id}")]
    OwnerMismatch {
        /// Project concerned.
        project_id: String,
        /// Caller that attempted the write.
        owner_id: String,
    },
    /// Persistence was requested without a data directory.
    #[error("No data directory configured")]
    NoDataDir,
    /// A canvas operation failed.
    #[error(transparent)]
    Canvas(#[from] CanvasError),
    /// An I/O error occurred during persistence.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result of [`ProjectStore::save`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveOutcome {
    /// Which version survived.
    pub resolution: ConflictResolution,
    /// Whether the project did not exist before.
    pub created: bool,
    /// Elements that differed between the two versions.
    pub conflicts: Vec<ElementConflict>,
    /// The surviving document as now stored.
    pub document: ProjectDocument,
}

/// Result of [`ProjectStore::persist`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persisted {
    /// No data directory is configured, nothing was written.
    Skipped,
    /// Written, and the project is clean.
    Clean,
    /// Written, but the project changed during the write and is still dirty.
    StillDirty,
}

impl Persisted {
    /// Whether a file was written.
    #[must_use]
    pub fn written(self) -> bool {
        !matches!(self, Self::Skipped)
    }
}

#[derive(Debug, Clone)]
struct Project {
    owner_id: String,
    name: String,
    canvas: Canvas,
}

impl Project {
    fn new(owner_id: &str) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            name: String::new(),
            canvas: Canvas::new(),
        }
    }

    fn document(&self, project_id: &str) -> ProjectDocument {
        ProjectDocument::from_canvas(project_id, &self.owner_id, &self.name, &self.canvas)
    }

    fn from_document(document: ProjectDocument) -> Self {
        Self {
            owner_id: document.owner_id.clone(),
            name: document.name.clone(),
            canvas: document.into_canvas(),
        }
    }
}

/// Thread-safe project storage shared across handlers and background tasks.
///
/// # Example
///
/// ```
/// use kanvas_core::store::ProjectStore;
/// use kanvas_core::PlacedImage;
///
/// let store = ProjectStore::new();
/// let _ = store.get_or_create("moodboard", "alice");
///
/// let id = store
///     .update("moodboard", |canvas| {
///         canvas.add_image(PlacedImage::new("https://cdn.example/a.png", 0.0, 0.0, 512.0, 512.0))
///     })
///     .unwrap();
/// assert!(store.get("moodboard").unwrap().contains(id));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ProjectStore {
    projects: Arc<RwLock<HashMap<String, Project>>>,
    assets: Arc<RwLock<AssetIndex>>,
    /// One lock per project so file writes for a project never interleave.
    persist_locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
    /// Optional data directory for filesystem persistence.
    data_dir: Option<PathBuf>,
}

impl ProjectStore {
    /// Create an in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with filesystem persistence.
    ///
    /// Projects are saved as JSON files in `data_dir`. The directory is created
    /// if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be created.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(data_dir.join(ASSET_DIR))?;
        Ok(Self {
            data_dir: Some(data_dir),
            ..Self::default()
        })
    }

    /// Data directory, if persistence is enabled.
    #[must_use]
    pub fn data_dir(&self) -> Option<&Path> {
        self.data_dir.as_deref()
    }

    /// Get the document for a project, creating an empty project if needed.
    #[must_use]
    pub fn get_or_create(&self, project_id: &str, owner_id: &str) -> ProjectDocument {
        let mut projects = self
            .projects
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        projects
            .entry(project_id.to_string())
            .or_insert_with(|| Project::new(owner_id))
            .document(project_id)
    }

    /// Create an empty project owned by `owner_id` unless it already exists.
    pub fn ensure(&self, project_id: &str, owner_id: &str) {
        let mut projects = self
            .projects
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        projects
            .entry(project_id.to_string())
            .or_insert_with(|| Project::new(owner_id));
    }

    /// Whether the project has changes not yet written to disk.
    #[must_use]
    pub fn is_dirty(&self, project_id: &str) -> bool {
        let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        projects.get(project_id).is_some_and(|p| p.canvas.is_dirty())
    }

    /// Whether the store can serve and persist projects.
    ///
    /// False once a writer panicked while holding a store lock, or when the
    /// data directory has disappeared.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        if self.projects.is_poisoned() || self.assets.is_poisoned() {
            return false;
        }
        self.data_dir.as_ref().is_none_or(|dir| dir.is_dir())
    }

    /// Get a copy of a project's live canvas.
    #[must_use]
    pub fn get(&self, project_id: &str) -> Option<Canvas> {
        let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        projects.get(project_id).map(|p| p.canvas.clone())
    }

    /// Owner of a project.
    #[must_use]
    pub fn owner_of(&self, project_id: &str) -> Option<String> {
        let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        projects.get(project_id).map(|p| p.owner_id.clone())
    }

    /// Get the canonical document for a project.
    #[must_use]
    pub fn document(&self, project_id: &str) -> Option<ProjectDocument> {
        let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        projects.get(project_id).map(|p| p.document(project_id))
    }

    /// Mutate a project's canvas using a closure and return its result.
    ///
    /// Changes are not written to disk here; the canvas is left dirty for the
    /// autosave loop.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ProjectNotFound`] if the project does not exist.
    pub fn update<F, R>(&self, project_id: &str, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&mut Canvas) -> R,
    {
        let mut projects = self
            .projects
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let project = projects
            .get_mut(project_id)
            .ok_or_else(|| StoreError::ProjectNotFound(project_id.to_string()))?;
        Ok(f(&mut project.canvas))
    }

    /// Save a client document, resolving conflicts with the stored version.
    ///
    /// When the incoming document wins it replaces the canvas content as one
    /// undoable step and is written to disk. When the stored version wins it
    /// is returned with [`SyncStatus::Conflict`] so the client can reload.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::OwnerMismatch`] when the project belongs to a
    /// different owner, or a persistence error.
    pub fn save(
        &self,
        document: ProjectDocument,
        strategy: ConflictStrategy,
    ) -> Result<SaveOutcome, StoreError> {
        let project_id = document.project_id.clone();
        let outcome = {
            let mut projects = self
                .projects
                .write()
                .unwrap_or_else(PoisonError::into_inner);

            match projects.get_mut(&project_id) {
                None => {
                    let mut stored = document.clone();
                    stored.sync_status = SyncStatus::Synced;
                    projects.insert(project_id.clone(), Project::from_document(document));
                    SaveOutcome {
                        resolution: ConflictResolution::KeepLocal,
                        created: true,
                        conflicts: Vec::new(),
                        document: stored,
                    }
                }
                Some(project) => {
                    if project.owner_id != document.owner_id {
                        return Err(StoreError::OwnerMismatch {
                            project_id,
                            owner_id: document.owner_id,
                        });
                    }
                    let remote = project.document(&project_id);
                    let conflicts = detect_element_conflicts(&document, &remote);
                    let resolution = resolve(&document, &remote, strategy);
                    let stored = match resolution {
                        ConflictResolution::KeepLocal => {
                            apply_document(project, document);
                            let mut stored = project.document(&project_id);
                            stored.sync_status = SyncStatus::Synced;
                            stored
                        }
                        ConflictResolution::KeepRemote => {
                            tracing::info!(
                                project_id = %project_id,
                                local = document.last_modified,
                                remote = remote.last_modified,
                                "Stale save rejected"
                            );
                            let mut remote = remote;
                            remote.sync_status = SyncStatus::Conflict;
                            remote
                        }
                    };
                    SaveOutcome {
                        resolution,
                        created: false,
                        conflicts,
                        document: stored,
                    }
                }
            }
        };

        if outcome.resolution == ConflictResolution::KeepLocal {
            self.persist(&project_id)?;
        }
        Ok(outcome)
    }

    /// Delete a project from memory and disk. Returns false if it did not exist.
    pub fn delete_project(&self, project_id: &str) -> bool {
        let lock = self.persist_lock(project_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let removed = {
            let mut projects = self
                .projects
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            projects.remove(project_id).is_some()
        };
        if let Some(path) = self.project_path(project_id) {
            if path.exists() {
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!("Failed to delete project file {}: {e}", path.display());
                }
            }
        }
        self.persist_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(project_id);
        removed
    }

    /// All project IDs, sorted.
    #[must_use]
    pub fn project_ids(&self) -> Vec<String> {
        let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = projects.keys().cloned().collect();
        ids.sort();
        ids
    }

    // -----------------------------------------------------------------------
    // Assets
    // -----------------------------------------------------------------------

    /// Register or replace an asset record and persist the index.
    pub fn register_asset(&self, asset: Asset) {
        {
            let mut assets = self.assets.write().unwrap_or_else(PoisonError::into_inner);
            assets.insert(asset);
        }
        self.persist_assets();
    }

    /// Look up an asset.
    #[must_use]
    pub fn asset(&self, id: &AssetId) -> Option<Asset> {
        let assets = self.assets.read().unwrap_or_else(PoisonError::into_inner);
        assets.get(id).cloned()
    }

    /// Assets owned by `owner_id`, oldest first.
    #[must_use]
    pub fn assets_for(&self, owner_id: &str) -> Vec<Asset> {
        let assets = self.assets.read().unwrap_or_else(PoisonError::into_inner);
        assets.owned_by(owner_id).into_iter().cloned().collect()
    }

    /// Check a project's asset references without changing anything.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ProjectNotFound`] if the project does not exist.
    pub fn validate(&self, project_id: &str) -> Result<AssetReport, StoreError> {
        let document = self
            .document(project_id)
            .ok_or_else(|| StoreError::ProjectNotFound(project_id.to_string()))?;
        let assets = self.assets.read().unwrap_or_else(PoisonError::into_inner);
        Ok(reconcile::validate(&document, &assets, &document.owner_id))
    }

    /// Repair a project's asset references.
    ///
    /// Repairs are applied as one undoable step and leave the project dirty.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ProjectNotFound`] if the project does not exist.
    pub fn reconcile(&self, project_id: &str) -> Result<AssetReport, StoreError> {
        let mut projects = self
            .projects
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let project = projects
            .get_mut(project_id)
            .ok_or_else(|| StoreError::ProjectNotFound(project_id.to_string()))?;

        let mut document = project.document(project_id);
        let report = {
            let assets = self.assets.read().unwrap_or_else(PoisonError::into_inner);
            reconcile::reconcile(&mut document, &assets, &project.owner_id)
        };
        if report.repaired_elements > 0 {
            document.last_modified = current_timestamp_ms().max(document.last_modified + 1);
            apply_document(project, document);
            tracing::info!(
                project_id = %project_id,
                repaired = report.repaired_elements,
                "Reconciled asset references"
            );
        }
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Write a project to disk and clear its dirty flag.
    ///
    /// Writes for the same project are serialized. The dirty flag is only
    /// cleared when nothing changed between reading the project and finishing
    /// the write; otherwise [`Persisted::StillDirty`] is returned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::ProjectNotFound`] for an unknown project, or an
    /// I/O or serialization error.
    pub fn persist(&self, project_id: &str) -> Result<Persisted, StoreError> {
        let Some(path) = self.project_path(project_id) else {
            return Ok(Persisted::Skipped);
        };
        let lock = self.persist_lock(project_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let (mut document, revision) = {
            let projects = self.projects.read().unwrap_or_else(PoisonError::into_inner);
            let project = projects
                .get(project_id)
                .ok_or_else(|| StoreError::ProjectNotFound(project_id.to_string()))?;
            (project.document(project_id), project.canvas.revision())
        };
        document.sync_status = SyncStatus::Synced;
        let json = serde_json::to_string_pretty(&document)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        std::fs::write(&path, json)?;

        let outcome = self.update(project_id, |canvas| {
            if canvas.revision() == revision {
                canvas.mark_saved();
                Persisted::Clean
            } else {
                Persisted::StillDirty
            }
        })?;
        tracing::debug!(
            project_id = %project_id,
            path = %path.display(),
            clean = outcome == Persisted::Clean,
            "Persisted project"
        );
        Ok(outcome)
    }

    fn persist_lock(&self, project_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .persist_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(project_id.to_string()).or_default())
    }

    /// Load a single project from disk into memory, replacing any live copy.
    ///
    /// # Errors
    ///
    /// Returns an error if no data directory is configured, or the file doesn't
    /// exist or can't be parsed.
    pub fn load_from_disk(&self, project_id: &str) -> Result<(), StoreError> {
        let path = self.project_path(project_id).ok_or(StoreError::NoDataDir)?;
        let contents = std::fs::read_to_string(&path)?;
        let mut document: ProjectDocument = serde_json::from_str(&contents)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        document.project_id = project_id.to_string();

        let mut projects = self
            .projects
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        projects.insert(project_id.to_string(), Project::from_document(document));
        Ok(())
    }

    /// Load the asset index and every persisted project from the data directory.
    ///
    /// Files that fail to parse are skipped with a warning. Returns the IDs of
    /// the projects loaded.
    ///
    /// # Errors
    ///
    /// Returns an error if no data directory is configured or it can't be read.
    pub fn load_all(&self) -> Result<Vec<String>, StoreError> {
        let data_dir = self.data_dir.as_ref().ok_or(StoreError::NoDataDir)?;
        self.load_assets(data_dir)?;

        let mut loaded = Vec::new();
        for entry in std::fs::read_dir(data_dir)? {
            let path = entry?.path();
            if !path.is_file() || !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match self.load_from_disk(stem) {
                Ok(()) => loaded.push(stem.to_string()),
                Err(e) => tracing::warn!("Skipping unreadable project {}: {e}", path.display()),
            }
        }
        loaded.sort();
        Ok(loaded)
    }

    fn load_assets(&self, data_dir: &Path) -> Result<(), StoreError> {
        let path = data_dir.join(ASSET_DIR).join(ASSET_INDEX_FILE);
        if !path.exists() {
            return Ok(());
        }
        let contents = std::fs::read_to_string(&path)?;
        let list: Vec<Asset> = serde_json::from_str(&contents)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut assets = self.assets.write().unwrap_or_else(PoisonError::into_inner);
        *assets = list.into_iter().collect();
        Ok(())
    }

    fn persist_assets(&self) {
        let Some(ref data_dir) = self.data_dir else {
            return;
        };
        let list: Vec<Asset> = {
            let assets = self.assets.read().unwrap_or_else(PoisonError::into_inner);
            assets.iter().cloned().collect()
        };
        let path = data_dir.join(ASSET_DIR).join(ASSET_INDEX_FILE);
        let result = serde_json::to_string_pretty(&list)
            .map_err(|e| StoreError::Serialization(e.to_string()))
            .and_then(|json| std::fs::write(&path, json).map_err(StoreError::from));
        if let Err(e) = result {
            tracing::warn!("Failed to persist asset index to {}: {e}", path.display());
        }
    }

    fn project_path(&self, project_id: &str) -> Option<PathBuf> {
        self.data_dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.json", sanitize_filename(project_id))))
    }
}

/// Replace a project's content with a document's elements as one history entry.
fn apply_document(project: &mut Project, document: ProjectDocument) {
    let last_modified = document.last_modified;
    project.name = document.name;
    project.canvas.set_viewport(document.viewport);

    let mut elements = document.elements;
    elements.sort_by_key(CanvasElement::z_index);
    let mut images = Vec::new();
    let mut videos = Vec::new();
    for element in elements {
        match element {
            CanvasElement::Image(e) => images.push(PlacedImage::from(e)),
            CanvasElement::Video(e) => videos.push(PlacedVideo::from(e)),
        }
    }
    project.canvas.replace_content(images, videos, last_modified);
}

/// Sanitize a project ID for use as a filename.
///
/// Replaces any character that is not alphanumeric, `-`, or `_` with `_`.
fn sanitize_filename(project_id: &str) -> String {
    project_id
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Get the current Unix timestamp in milliseconds.
#[must_use]
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| {
        // Timestamp will not exceed u64 max for millennia
        #[allow(clippy::cast_possible_truncation)]
        {
            d.as_millis() as u64
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asset::sample_asset;
    use crate::element::MediaKind;

    fn image(src: &str) -> PlacedImage {
        PlacedImage::new(src, 0.0, 0.0, 256.0, 256.0)
    }

    #[test]
    fn test_get_or_create_new_project() {
        let store = ProjectStore::new();
        let doc = store.get_or_create("p1", "alice");
        assert_eq!(doc.project_id, "p1");
        assert_eq!(doc.owner_id, "alice");
        assert!(doc.elements.is_empty());
        assert_eq!(store.project_ids(), vec!["p1".to_string()]);
    }

    #[test]
    fn test_get_or_create_keeps_owner() {
        let store = ProjectStore::new();
        let _ = store.get_or_create("p1", "alice");
        let doc = store.get_or_create("p1", "bob");
        assert_eq!(doc.owner_id, "alice");
    }

    #[test]
    fn test_get_nonexistent_returns_none() {
        let store = ProjectStore::new();
        assert!(store.get("missing").is_none());
        assert!(store.document("missing").is_none());
    }

    #[test]
    fn test_update_returns_closure_result() {
        let store = ProjectStore::new();
        let _ = store.get_or_create("p1", "alice");
        let id = store
            .update("p1", |canvas| canvas.add_image(image("a.png")))
            .expect("update");
        let canvas = store.get("p1").expect("exists");
        assert!(canvas.contains(id));
        assert!(canvas.is_dirty());
    }

    #[test]
    fn test_update_nonexistent_project_fails() {
        let store = ProjectStore::new();
        let result = store.update("missing", |_| ());
        assert!(matches!(result, Err(StoreError::ProjectNotFound(_))));
    }

    #[test]
    fn test_save_creates_project() {
        let store = ProjectStore::new();
        let mut doc = ProjectDocument::empty("fresh", "alice");
        doc.last_modified = 10;
        let outcome = store.save(doc, ConflictStrategy::default()).expect("save");
        assert!(outcome.created);
        assert_eq!(outcome.resolution, ConflictResolution::KeepLocal);
        assert_eq!(store.owner_of("fresh").as_deref(), Some("alice"));
    }

    #[test]
    fn test_save_newer_document_wins() {
        let store = ProjectStore::new();
        let _ = store.get_or_create("p1", "alice");
        store
            .update("p1", |c| c.add_image(image("server.png")))
            .expect("update");
        let remote = store.document("p1").expect("doc");

        let mut canvas = Canvas::new();
        canvas.add_image(image("client.png"));
        let mut local = ProjectDocument::from_canvas("p1", "alice", "Board", &canvas);
        local.last_modified = remote.last_modified + 5;

        let outcome = store.save(local, ConflictStrategy::LastWriteWins).expect("save");
        assert_eq!(outcome.resolution, ConflictResolution::KeepLocal);
        assert_eq!(outcome.conflicts.len(), 2);
        assert_eq!(outcome.document.sync_status, SyncStatus::Synced);

        let stored = store.document("p1").expect("doc");
        assert_eq!(stored.name, "Board");
        assert_eq!(stored.elements.len(), 1);
        assert_eq!(stored.elements[0].src(), "client.png");
        assert_eq!(stored.last_modified, remote.last_modified + 5);

        // The overwrite can be undone.
        store.update("p1", Canvas::undo).expect("undo");
        let restored = store.document("p1").expect("doc");
        assert_eq!(restored.elements[0].src(), "server.png");
    }

    #[test]
    fn test_save_stale_document_loses() {
        let store = ProjectStore::new();
        let _ = store.get_or_create("p1", "alice");
        store
            .update("p1", |c| c.add_image(image("server.png")))
            .expect("update");
        let remote = store.document("p1").expect("doc");

        let mut local = ProjectDocument::empty("p1", "alice");
        local.last_modified = remote.last_modified - 1;

        let outcome = store.save(local, ConflictStrategy::LastWriteWins).expect("save");
        assert_eq!(outcome.resolution, ConflictResolution::KeepRemote);
        assert_eq!(outcome.document.sync_status, SyncStatus::Conflict);
        assert_eq!(store.document("p1").expect("doc").elements.len(), 1);
    }

    #[test]
    fn test_save_rejects_other_owner() {
        let store = ProjectStore::new();
        let _ = store.get_or_create("p1", "alice");
        let mut doc = ProjectDocument::empty("p1", "mallory");
        doc.last_modified = u64::MAX;
        let result = store.save(doc, ConflictStrategy::LocalWins);
        assert!(matches!(result, Err(StoreError::OwnerMismatch { .. })));
    }

    #[test]
    fn test_delete_project() {
        let store = ProjectStore::new();
        let _ = store.get_or_create("p1", "alice");
        assert!(store.delete_project("p1"));
        assert!(!store.delete_project("p1"));
        assert!(store.project_ids().is_empty());
    }

    #[test]
    fn test_assets_for_owner() {
        let store = ProjectStore::new();
        store.register_asset(sample_asset("a", "alice", MediaKind::Image));
        store.register_asset(sample_asset("b", "bob", MediaKind::Image));
        assert_eq!(store.assets_for("alice").len(), 1);
        assert!(store.asset(&AssetId::new("b")).is_some());
    }

    #[test]
    fn test_validate_and_reconcile() {
        let store = ProjectStore::new();
        let _ = store.get_or_create("p1", "alice");
        store.register_asset(sample_asset("img", "alice", MediaKind::Image));
        let (stale, dangling) = store
            .update("p1", |c| {
                let stale = c.add_image(image("old").with_asset(AssetId::new("img")));
                let dangling = c.add_image(image("x").with_asset(AssetId::new("gone")));
                (stale, dangling)
            })
            .expect("update");

        let report = store.validate("p1").expect("validate");
        assert_eq!(report.issues.len(), 2);

        let report = store.reconcile("p1").expect("reconcile");
        assert_eq!(report.repaired_elements, 2);
        let canvas = store.get("p1").expect("exists");
        assert_eq!(canvas.image(stale).expect("image").src, "https://storage.example/img");
        assert!(canvas.image(dangling).expect("image").asset_id.is_none());

        assert!(store.validate("p1").expect("validate").is_clean());
    }

    #[test]
    fn test_validate_missing_project() {
        let store = ProjectStore::new();
        assert!(matches!(
            store.validate("nope"),
            Err(StoreError::ProjectNotFound(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Persistence tests
    // -----------------------------------------------------------------------

    #[test]
    fn test_persist_without_data_dir_is_noop() {
        let store = ProjectStore::new();
        let _ = store.get_or_create("p1", "alice");
        assert_eq!(store.persist("p1").expect("persist"), Persisted::Skipped);
    }

    #[test]
    fn test_persist_and_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProjectStore::with_data_dir(dir.path()).expect("store");
        let _ = store.get_or_create("p1", "alice");
        let id = store
            .update("p1", |c| c.add_image(image("a.png")))
            .expect("update");

        assert_eq!(store.persist("p1").expect("persist"), Persisted::Clean);
        assert!(!store.is_dirty("p1"));
        assert!(dir.path().join("p1.json").exists());

        let store2 = ProjectStore::with_data_dir(dir.path()).expect("store2");
        store2.load_from_disk("p1").expect("load");
        let canvas = store2.get("p1").expect("exists");
        assert!(canvas.contains(id));
        assert_eq!(store2.owner_of("p1").as_deref(), Some("alice"));
    }

    #[test]
    fn test_load_nonexistent_project() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProjectStore::with_data_dir(dir.path()).expect("store");
        assert!(matches!(
            store.load_from_disk("does-not-exist"),
            Err(StoreError::Io(_))
        ));
    }

    #[test]
    fn test_load_without_data_dir() {
        let store = ProjectStore::new();
        assert!(matches!(store.load_all(), Err(StoreError::NoDataDir)));
    }

    #[test]
    fn test_load_all_projects_and_assets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProjectStore::with_data_dir(dir.path()).expect("store");
        for name in ["board-a", "board-b"] {
            let _ = store.get_or_create(name, "alice");
            store.persist(name).expect("persist");
        }
        store.register_asset(sample_asset("img", "alice", MediaKind::Image));
        std::fs::write(dir.path().join("broken.json"), "{not json").expect("write");

        let store2 = ProjectStore::with_data_dir(dir.path()).expect("store2");
        let loaded = store2.load_all().expect("load");
        assert_eq!(loaded, vec!["board-a".to_string(), "board-b".to_string()]);
        assert_eq!(store2.assets_for("alice").len(), 1);
    }

    #[test]
    fn test_delete_removes_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProjectStore::with_data_dir(dir.path()).expect("store");
        let _ = store.get_or_create("p1", "alice");
        store.persist("p1").expect("persist");
        let path = dir.path().join("p1.json");
        assert!(path.exists());

        store.delete_project("p1");
        assert!(!path.exists());
    }

    #[test]
    fn test_edits_during_persist_stay_dirty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProjectStore::with_data_dir(dir.path()).expect("store");
        store.ensure("busy", "alice");
        let path = dir.path().join("busy.json");

        for round in 0..100 {
            let writer = store.clone();
            let edit = std::thread::spawn(move || {
                writer
                    .update("busy", |c| c.add_image(image(&format!("{round}.png"))))
                    .expect("update");
            });
            store.persist("busy").expect("persist");
            edit.join().expect("join");

            // Either the file has every element or the project is still dirty
            let live = store.get("busy").expect("exists").element_count();
            let on_disk: ProjectDocument =
                serde_json::from_str(&std::fs::read_to_string(&path).expect("read"))
                    .expect("parse");
            assert!(
                store.is_dirty("busy") || on_disk.elements.len() == live,
                "round {round}: clean with {} of {live} elements on disk",
                on_disk.elements.len()
            );
        }
    }

    #[test]
    fn test_concurrent_persists_leave_latest_on_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ProjectStore::with_data_dir(dir.path()).expect("store");
        store.ensure("p1", "alice");

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .update("p1", |c| c.add_image(image(&format!("{i}.png"))))
                        .expect("update");
                    store.persist("p1").expect("persist");
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("join");
        }
        if store.is_dirty("p1") {
            store.persist("p1").expect("persist");
        }

        let reloaded = ProjectStore::with_data_dir(dir.path()).expect("store");
        reloaded.load_from_disk("p1").expect("load");
        assert_eq!(reloaded.get("p1").expect("exists").element_count(), 8);
    }

    #[test]
    fn test_ensure_creates_once() {
        let store = ProjectStore::new();
        store.ensure("p1", "alice");
        store.ensure("p1", "bob");
        assert_eq!(store.owner_of("p1").as_deref(), Some("alice"));
        assert!(!store.is_dirty("p1"));
    }

    #[test]
    fn test_is_healthy() {
        let store = ProjectStore::new();
        assert!(store.is_healthy());

        let poisoned = store.clone();
        let result = std::thread::spawn(move || {
            let _guard = poisoned.projects.write().expect("lock");
            panic!("writer died");
        })
        .join();
        assert!(result.is_err());
        assert!(!store.is_healthy());
    }

    #[test]
    fn test_missing_data_dir_is_unhealthy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_dir = dir.path().join("data");
        let store = ProjectStore::with_data_dir(&data_dir).expect("store");
        assert!(store.is_healthy());

        std::fs::remove_dir_all(&data_dir).expect("remove");
        assert!(!store.is_healthy());
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("simple"), "simple");
        assert_eq!(sanitize_filename("with-dash"), "with-dash");
        assert_eq!(sanitize_filename("has/slash"), "has_slash");
        assert_eq!(sanitize_filename("../escape"), "___escape");
    }
}
