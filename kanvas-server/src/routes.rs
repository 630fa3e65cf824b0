//! HTTP API route handlers.
//!
//! All project routes act on behalf of the owner named in the `x-user-id`
//! header (`anonymous` when absent). Errors are returned as
//! `{"error": "..."}` with a matching status code.

use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use kanvas_core::store::current_timestamp_ms;
use kanvas_core::{
    ActiveGeneration, Asset, AssetId, AssetReport, CanvasError, ConflictResolution,
    ConflictStrategy, GenerationId, MediaKind, PlacedImage, PlacedVideo, ProjectDocument,
    SaveOutcome, ScreenSize, StoreError,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

use crate::events;
use crate::health;
use crate::metrics;
use crate::orchestrator::{
    GenerationRequest, OrchestratorError, VariationRequest, VideoGenerationRequest,
};
use crate::provider::ProviderError;
use crate::upload::UploadError;
use crate::validation::{
    validate_element_count, validate_owner_id, validate_project_id, validate_url,
    ValidationError,
};
use crate::AppState;

/// Header carrying the caller's user ID.
pub const OWNER_HEADER: &str = "x-user-id";
/// Owner used when no header is sent.
pub const DEFAULT_OWNER: &str = "anonymous";

/// Errors returned by API handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid input.
    #[error(transparent)]
    Validation(ValidationError),
    /// Malformed request.
    #[error("{0}")]
    BadRequest(String),
    /// Resource does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// Resource belongs to someone else.
    #[error("{0}")]
    Forbidden(String),
    /// Provider rate limit; carries the user-facing explanation.
    #[error("{0}")]
    RateLimited(String),
    /// Provider or storage failure.
    #[error("{0}")]
    Upstream(String),
    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        metrics::record_validation_failure(e.kind());
        Self::Validation(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::ProjectNotFound(id) => Self::NotFound(format!("project {id}")),
            StoreError::OwnerMismatch { project_id, .. } => {
                Self::Forbidden(format!("project {project_id} belongs to another user"))
            }
            StoreError::Canvas(CanvasError::ElementNotFound(what)) => Self::NotFound(what),
            StoreError::Canvas(e) => Self::BadRequest(e.to_string()),
            e @ (StoreError::NoDataDir | StoreError::Io(_) | StoreError::Serialization(_)) => {
                Self::Internal(e.to_string())
            }
        }
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(e: OrchestratorError) -> Self {
        match e {
            OrchestratorError::Validation(e) => e.into(),
            OrchestratorError::Store(e) => e.into(),
            OrchestratorError::SourceNotFound(id) => Self::NotFound(format!("image {id}")),
            OrchestratorError::Provider(ref p) => match p {
                ProviderError::RateLimited { .. } => Self::RateLimited(e.user_message()),
                ProviderError::InvalidRequest(_) => Self::BadRequest(e.user_message()),
                _ => Self::Upstream(e.user_message()),
            },
            OrchestratorError::Upload(UploadError::RateLimited { .. }) => {
                Self::RateLimited(e.user_message())
            }
            OrchestratorError::Upload(_) => Self::Upstream(e.user_message()),
        }
    }
}

/// The caller's user ID, from the `x-user-id` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner(pub String);

impl<S> FromRequestParts<S> for Owner
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let owner = match parts.headers.get(OWNER_HEADER) {
            Some(value) => value
                .to_str()
                .map_err(|_| ApiError::from(ValidationError::OwnerIdInvalid))?,
            None => DEFAULT_OWNER,
        };
        validate_owner_id(owner)?;
        Ok(Self(owner.to_string()))
    }
}

/// Check the project exists and belongs to `owner`.
fn authorize(state: &AppState, project_id: &str, owner: &str) -> Result<(), ApiError> {
    validate_project_id(project_id)?;
    match state.store.owner_of(project_id) {
        None => Err(ApiError::NotFound(format!("project {project_id}"))),
        Some(o) if o != owner => Err(StoreError::OwnerMismatch {
            project_id: project_id.to_string(),
            owner_id: owner.to_string(),
        }
        .into()),
        Some(_) => Ok(()),
    }
}

/// Like [`authorize`], but a missing project is fine (it will be created).
fn authorize_or_new(state: &AppState, project_id: &str, owner: &str) -> Result<(), ApiError> {
    match authorize(state, project_id, owner) {
        Err(ApiError::NotFound(_)) => Ok(()),
        other => other,
    }
}

fn document(state: &AppState, project_id: &str) -> Result<ProjectDocument, ApiError> {
    state
        .store
        .document(project_id)
        .ok_or_else(|| ApiError::NotFound(format!("project {project_id}")))
}

// ---------------------------------------------------------------------------
// Projects
// ---------------------------------------------------------------------------

/// Project IDs visible to the caller.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectList {
    /// Sorted project IDs.
    pub projects: Vec<String>,
}

/// List the caller's projects.
#[tracing::instrument(name = "list_projects", skip(state))]
pub async fn list_projects(State(state): State<AppState>, Owner(owner): Owner) -> Json<ProjectList> {
    let projects = state
        .store
        .project_ids()
        .into_iter()
        .filter(|id| state.store.owner_of(id).as_deref() == Some(owner.as_str()))
        .collect();
    Json(ProjectList { projects })
}

/// Fetch a project document.
#[tracing::instrument(name = "get_project", skip(state))]
pub async fn get_project(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(project_id): Path<String>,
) -> Result<Json<ProjectDocument>, ApiError> {
    authorize(&state, &project_id, &owner)?;
    Ok(Json(document(&state, &project_id)?))
}

/// Query parameters for saves.
#[derive(Debug, Default, Deserialize)]
pub struct SaveParams {
    /// Conflict strategy; last write wins by default.
    #[serde(default)]
    pub strategy: ConflictStrategy,
}

/// Save a project document, resolving conflicts with the stored version.
#[tracing::instrument(name = "save_project", skip(state, document), fields(elements = document.elements.len()))]
pub async fn save_project(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(project_id): Path<String>,
    Query(params): Query<SaveParams>,
    Json(document): Json<ProjectDocument>,
) -> Result<(StatusCode, Json<SaveOutcome>), ApiError> {
    validate_project_id(&project_id)?;
    let mut document = document;
    validate_element_count(document.elements.len())?;
    document.project_id.clone_from(&project_id);
    document.owner_id = owner;

    let outcome = state.store.save(document, params.strategy)?;
    match outcome.resolution {
        ConflictResolution::KeepLocal => {
            // Written by the save itself
            state.autosave.mark_saved(&project_id);
            state.publish_project(&project_id);
        }
        ConflictResolution::KeepRemote => metrics::record_save_conflict(),
    }
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

/// Delete a project.
#[tracing::instrument(name = "delete_project", skip(state))]
pub async fn delete_project(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(project_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    authorize(&state, &project_id, &owner)?;
    state.store.delete_project(&project_id);
    state.autosave.mark_saved(&project_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Result of an undo or redo.
#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    /// Whether anything changed.
    pub changed: bool,
    /// Whether a further undo is possible.
    pub can_undo: bool,
    /// Whether a further redo is possible.
    pub can_redo: bool,
    /// The project after the step.
    pub document: ProjectDocument,
}

fn step_history(
    state: &AppState,
    project_id: &str,
    owner: &str,
    undo: bool,
) -> Result<HistoryResponse, ApiError> {
    authorize(state, project_id, owner)?;
    let (changed, can_undo, can_redo) = state.store.update(project_id, |canvas| {
        let changed = if undo { canvas.undo() } else { canvas.redo() };
        (
            changed,
            canvas.history().can_undo(),
            canvas.history().can_redo(),
        )
    })?;
    if changed {
        state.project_changed(project_id);
    }
    Ok(HistoryResponse {
        changed,
        can_undo,
        can_redo,
        document: document(state, project_id)?,
    })
}

/// Undo the last change.
#[tracing::instrument(name = "undo", skip(state))]
pub async fn undo(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(project_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    step_history(&state, &project_id, &owner, true).map(Json)
}

/// Redo the last undone change.
#[tracing::instrument(name = "redo", skip(state))]
pub async fn redo(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(project_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    step_history(&state, &project_id, &owner, false).map(Json)
}

/// Screen size for culling.
#[derive(Debug, Deserialize)]
pub struct VisibleParams {
    /// Screen width in pixels.
    pub width: Option<f64>,
    /// Screen height in pixels.
    pub height: Option<f64>,
}

/// Elements inside the viewport plus the culling buffer.
#[derive(Debug, Serialize, Deserialize)]
pub struct VisibleResponse {
    /// Visible images in draw order.
    pub images: Vec<PlacedImage>,
    /// Visible videos in draw order.
    pub videos: Vec<PlacedVideo>,
    /// Total elements on the canvas.
    pub total: usize,
}

/// Cull a project against the stored viewport.
#[tracing::instrument(name = "visible_elements", skip(state))]
pub async fn visible_elements(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(project_id): Path<String>,
    Query(params): Query<VisibleParams>,
) -> Result<Json<VisibleResponse>, ApiError> {
    authorize(&state, &project_id, &owner)?;
    let default = ScreenSize::default();
    let width = params.width.unwrap_or(default.width);
    let height = params.height.unwrap_or(default.height);
    if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
        return Err(ApiError::BadRequest(
            "width and height must be positive".into(),
        ));
    }
    let screen = ScreenSize::new(width, height);
    let response = state.store.update(&project_id, |canvas| VisibleResponse {
        images: canvas.visible_images(screen).into_iter().cloned().collect(),
        videos: canvas.visible_videos(screen).into_iter().cloned().collect(),
        total: canvas.element_count(),
    })?;
    Ok(Json(response))
}

// ---------------------------------------------------------------------------
// Assets
// ---------------------------------------------------------------------------

fn record_issues(report: &AssetReport) {
    for (label, count) in report.counts() {
        metrics::record_asset_issues(label, count);
    }
}

/// Check every asset reference in a project.
#[tracing::instrument(name = "validate_assets", skip(state))]
pub async fn validate_assets(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(project_id): Path<String>,
) -> Result<Json<AssetReport>, ApiError> {
    authorize(&state, &project_id, &owner)?;
    let report = state.store.validate(&project_id)?;
    record_issues(&report);
    Ok(Json(report))
}

/// Repair asset references in a project.
#[tracing::instrument(name = "reconcile_assets", skip(state))]
pub async fn reconcile_assets(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(project_id): Path<String>,
) -> Result<Json<AssetReport>, ApiError> {
    authorize(&state, &project_id, &owner)?;
    let report = state.store.reconcile(&project_id)?;
    record_issues(&report);
    if report.repaired_elements > 0 {
        tracing::info!(
            project_id = %project_id,
            repaired = report.repaired_elements,
            "Reconciled asset references"
        );
        state.project_changed(&project_id);
    }
    Ok(Json(report))
}

/// A stored file to register for the caller.
#[derive(Debug, Deserialize)]
pub struct NewAsset {
    /// Asset ID; generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    /// Image or video.
    pub kind: MediaKind,
    /// Public URL.
    pub url: String,
    /// Storage backend ID.
    pub storage_id: String,
    /// Natural width in pixels.
    #[serde(default)]
    pub width: u32,
    /// Natural height in pixels.
    #[serde(default)]
    pub height: u32,
    /// MIME type.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// File size in bytes.
    #[serde(default)]
    pub size_bytes: Option<u64>,
    /// Clip duration (videos).
    #[serde(default)]
    pub duration: Option<f64>,
}

/// Register an uploaded file as an asset owned by the caller.
#[tracing::instrument(name = "register_asset", skip(state, asset))]
pub async fn register_asset(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Json(asset): Json<NewAsset>,
) -> Result<(StatusCode, Json<Asset>), ApiError> {
    validate_url(&asset.url)?;
    if asset.storage_id.trim().is_empty() {
        return Err(ApiError::BadRequest("storage_id must not be empty".into()));
    }
    let id = asset.id.unwrap_or_else(|| Uuid::new_v4().to_string());
    validate_project_id(&id).map_err(|_| ApiError::BadRequest(format!("invalid asset id {id}")))?;
    if let Some(existing) = state.store.asset(&AssetId::new(id.clone())) {
        if existing.owner_id != owner {
            return Err(ApiError::Forbidden(format!("asset {id} belongs to another user")));
        }
    }

    let asset = Asset {
        id: AssetId::new(id),
        owner_id: owner,
        kind: asset.kind,
        url: asset.url,
        storage_id: asset.storage_id,
        width: asset.width,
        height: asset.height,
        mime_type: asset.mime_type,
        size_bytes: asset.size_bytes,
        duration: asset.duration,
        created_at: current_timestamp_ms(),
    };
    state.store.register_asset(asset.clone());
    Ok((StatusCode::CREATED, Json(asset)))
}

/// List the caller's assets.
#[tracing::instrument(name = "list_assets", skip(state))]
pub async fn list_assets(State(state): State<AppState>, Owner(owner): Owner) -> Json<Vec<Asset>> {
    Json(state.store.assets_for(&owner))
}

// ---------------------------------------------------------------------------
// Generations
// ---------------------------------------------------------------------------

/// Accepted generation.
#[derive(Debug, Serialize, Deserialize)]
pub struct GenerationStarted {
    /// IDs to poll or watch on the event stream.
    pub generation_ids: Vec<GenerationId>,
}

/// Start an image generation.
#[tracing::instrument(name = "generate_image", skip(state, request))]
pub async fn generate_image(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(project_id): Path<String>,
    Json(request): Json<GenerationRequest>,
) -> Result<(StatusCode, Json<GenerationStarted>), ApiError> {
    authorize_or_new(&state, &project_id, &owner)?;
    let id = state
        .orchestrator
        .start_image(&project_id, &owner, request)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(GenerationStarted {
            generation_ids: vec![id],
        }),
    ))
}

/// Start a video generation.
#[tracing::instrument(name = "generate_video", skip(state, request))]
pub async fn generate_video(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(project_id): Path<String>,
    Json(request): Json<VideoGenerationRequest>,
) -> Result<(StatusCode, Json<GenerationStarted>), ApiError> {
    authorize_or_new(&state, &project_id, &owner)?;
    let id = state
        .orchestrator
        .start_video(&project_id, &owner, request)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(GenerationStarted {
            generation_ids: vec![id],
        }),
    ))
}

/// Start variations of a placed image.
#[tracing::instrument(name = "generate_variations", skip(state, request))]
pub async fn generate_variations(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(project_id): Path<String>,
    Json(request): Json<VariationRequest>,
) -> Result<(StatusCode, Json<GenerationStarted>), ApiError> {
    authorize(&state, &project_id, &owner)?;
    let generation_ids = state
        .orchestrator
        .start_variations(&project_id, &owner, request)?;
    Ok((StatusCode::ACCEPTED, Json(GenerationStarted { generation_ids })))
}

/// Generations for a project, oldest first.
#[tracing::instrument(name = "list_generations", skip(state))]
pub async fn list_generations(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(project_id): Path<String>,
) -> Result<Json<Vec<ActiveGeneration>>, ApiError> {
    authorize(&state, &project_id, &owner)?;
    Ok(Json(state.orchestrator.for_project(&project_id)))
}

/// A single generation.
#[tracing::instrument(name = "get_generation", skip(state))]
pub async fn get_generation(
    State(state): State<AppState>,
    Owner(owner): Owner,
    Path(generation_id): Path<String>,
) -> Result<Json<ActiveGeneration>, ApiError> {
    let id = GenerationId::parse(&generation_id)
        .map_err(|_| ApiError::BadRequest(format!("invalid generation id {generation_id}")))?;
    let generation = state
        .orchestrator
        .get(id)
        .ok_or_else(|| ApiError::NotFound(format!("generation {id}")))?;
    authorize(&state, &generation.project_id, &owner)?;
    Ok(Json(generation))
}

/// Image to describe.
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// Image URL.
    pub image_url: String,
}

/// Structured prompt for an image.
#[derive(Debug, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    /// Generated prompt.
    pub prompt: String,
}

/// Describe an image as a generation prompt.
#[tracing::instrument(name = "analyze", skip(state, request))]
pub async fn analyze(
    State(state): State<AppState>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let prompt = state.orchestrator.analyze(&request.image_url).await?;
    Ok(Json(AnalyzeResponse { prompt }))
}

/// Build the application router (health probes and `/api`).
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/projects", get(list_projects))
        .route(
            "/projects/{id}",
            get(get_project).put(save_project).delete(delete_project),
        )
        .route("/projects/{id}/undo", post(undo))
        .route("/projects/{id}/redo", post(redo))
        .route("/projects/{id}/visible", get(visible_elements))
        .route("/projects/{id}/assets/validate", get(validate_assets))
        .route("/projects/{id}/assets/reconcile", post(reconcile_assets))
        .route("/projects/{id}/generations", get(list_generations))
        .route("/projects/{id}/generations/image", post(generate_image))
        .route("/projects/{id}/generations/video", post(generate_video))
        .route(
            "/projects/{id}/generations/variations",
            post(generate_variations),
        )
        .route("/generations/{gid}", get(get_generation))
        .route("/assets", get(list_assets).post(register_asset))
        .route("/analyze", post(analyze))
        .route("/events", get(events::stream_handler));

    Router::new()
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .route("/health", get(health::readiness))
        .nest("/api", api)
        .with_state(state)
}
