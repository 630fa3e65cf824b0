//! Generation orchestrators.
//!
//! A request is validated, registered in the [`GenerationTracker`] and handed
//! to a tokio task; the caller gets the generation ID back immediately. The
//! task drives the provider queue:
//!
//! ```text
//! submit ──► poll status every interval ──► fetch result
//!                (bounded by timeout)            │
//!                                                ▼
//!            merge into canvas ◄── copy to storage (optional)
//! ```
//!
//! Every network call is wrapped in [`retry`]. Status changes are broadcast on
//! the [`EventBus`] and the project is queued for autosave once results land.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use kanvas_core::store::current_timestamp_ms;
use kanvas_core::variation::{placements_around, variation_prompts};
use kanvas_core::{
    ActiveGeneration, ElementId, GenerationId, GenerationStatus, GenerationTracker, MediaKind,
    PlacedImage, PlacedVideo, ProjectStore, Rect, StoreError, VariationKind,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::autosave::AutosaveQueue;
use crate::events::{EventBus, StudioEvent};
use crate::metrics;
use crate::provider::{
    parse_images, parse_text, parse_video, GeneratedMedia, GenerationProvider, ProviderError,
    QueueStatus,
};
use crate::retry::{retry, RetryConfig};
use crate::upload::{StorageClient, UploadError};
use crate::validation::{
    validate_count, validate_dimensions, validate_element_count, validate_prompt, validate_url,
    ValidationError,
};

/// Gap between placed results, in canvas units.
pub const RESULT_GAP: f64 = 24.0;
/// Longest side of a freshly placed image, in canvas units.
pub const IMAGE_DISPLAY_SIZE: f64 = 512.0;
/// Longest side of a freshly placed video, in canvas units.
pub const VIDEO_DISPLAY_SIZE: f64 = 640.0;

/// Prompt sent with images to the structured-prompt model.
const ANALYZE_INSTRUCTION: &str =
    "Describe this image as a detailed prompt for an image generation model.";

/// Polling cadence and time limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between status checks.
    pub interval: Duration,
    /// Time limit for image generations.
    pub image_timeout: Duration,
    /// Time limit for video generations.
    pub video_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1_000),
            image_timeout: Duration::from_secs(120),
            video_timeout: Duration::from_secs(600),
        }
    }
}

impl PollConfig {
    /// Time limit for a generation of `kind`.
    #[must_use]
    pub fn timeout_for(&self, kind: MediaKind) -> Duration {
        match kind {
            MediaKind::Image => self.image_timeout,
            MediaKind::Video => self.video_timeout,
        }
    }
}

/// Provider model identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    /// Text/image-to-image model.
    pub image: String,
    /// Text/image-to-video model.
    pub video: String,
    /// Structured-prompt (vision language) model.
    pub analyze: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            image: "fal-ai/flux/dev".to_string(),
            video: "fal-ai/ltx-video".to_string(),
            analyze: "fal-ai/llava-next".to_string(),
        }
    }
}

/// Everything the orchestrator needs besides its collaborators.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Retry policy for provider calls.
    pub retry: RetryConfig,
    /// Polling cadence and timeouts.
    pub poll: PollConfig,
    /// Model identifiers.
    pub models: ModelConfig,
}

fn default_count() -> usize {
    1
}

fn default_size() -> u32 {
    1024
}

fn default_variation_count() -> usize {
    4
}

fn default_video_duration() -> f64 {
    5.0
}

/// Request to generate one or more images.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Text prompt.
    pub prompt: String,
    /// Number of images.
    #[serde(default = "default_count")]
    pub count: usize,
    /// Output width in pixels.
    #[serde(default = "default_size")]
    pub width: u32,
    /// Output height in pixels.
    #[serde(default = "default_size")]
    pub height: u32,
    /// Source image for image-to-image.
    #[serde(default)]
    pub image_url: Option<String>,
    /// Canvas position for the first result; defaults to beside the content.
    #[serde(default)]
    pub x: Option<f64>,
    /// Canvas position for the first result.
    #[serde(default)]
    pub y: Option<f64>,
    /// Model override.
    #[serde(default)]
    pub model: Option<String>,
}

/// Request to generate a video clip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoGenerationRequest {
    /// Text prompt.
    pub prompt: String,
    /// First frame for image-to-video.
    #[serde(default)]
    pub image_url: Option<String>,
    /// Clip length in seconds.
    #[serde(default = "default_video_duration")]
    pub duration: f64,
    /// Canvas position; defaults to beside the content.
    #[serde(default)]
    pub x: Option<f64>,
    /// Canvas position.
    #[serde(default)]
    pub y: Option<f64>,
    /// Model override.
    #[serde(default)]
    pub model: Option<String>,
}

/// Request to generate variations of a placed image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariationRequest {
    /// Image to vary.
    pub source_id: ElementId,
    /// Which modifier list to draw from.
    pub kind: VariationKind,
    /// Number of variations.
    #[serde(default = "default_variation_count")]
    pub count: usize,
    /// Base prompt; defaults to the prompt that produced the source.
    #[serde(default)]
    pub prompt: Option<String>,
    /// Model override.
    #[serde(default)]
    pub model: Option<String>,
}

/// Errors from starting or running a generation.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Invalid request input.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// Project store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Provider failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),
    /// Storage failure.
    #[error(transparent)]
    Upload(#[from] UploadError),
    /// The variation source is not an image on the project canvas.
    #[error("source image not found: {0}")]
    SourceNotFound(ElementId),
}

impl OrchestratorError {
    /// Message suitable for showing to the user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider(e) => e.user_message(),
            Self::Upload(e) => e.user_message(),
            Self::Validation(e) => e.to_string(),
            Self::Store(e) => e.to_string(),
            Self::SourceNotFound(_) => "The source image no longer exists.".into(),
        }
    }
}

/// One queued provider job.
#[derive(Debug, Clone)]
struct Job {
    id: GenerationId,
    project_id: String,
    owner_id: String,
    kind: MediaKind,
    model: String,
    input: Value,
    /// Slot size for each result.
    slot: (f64, f64),
    placement: Rect,
    duration: f64,
}

struct Inner {
    provider: Arc<dyn GenerationProvider>,
    storage: Option<StorageClient>,
    store: ProjectStore,
    events: EventBus,
    autosave: AutosaveQueue,
    tracker: Mutex<GenerationTracker>,
    config: OrchestratorConfig,
}

/// Starts generations and tracks them to completion.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("storage", &self.inner.storage.is_some())
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Create an orchestrator. Without `storage`, results keep provider URLs.
    #[must_use]
    pub fn new(
        provider: Arc<dyn GenerationProvider>,
        storage: Option<StorageClient>,
        store: ProjectStore,
        events: EventBus,
        autosave: AutosaveQueue,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                storage,
                store,
                events,
                autosave,
                tracker: Mutex::new(GenerationTracker::new()),
                config,
            }),
        }
    }

    /// Start an image generation.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad input or a full project.
    pub fn start_image(
        &self,
        project_id: &str,
        owner_id: &str,
        request: GenerationRequest,
    ) -> Result<GenerationId, OrchestratorError> {
        validate_prompt(&request.prompt)?;
        validate_count(request.count)?;
        validate_dimensions(request.width, request.height)?;
        if let Some(url) = &request.image_url {
            validate_url(url)?;
        }
        self.check_capacity(project_id, owner_id, request.count)?;

        let slot = fit(IMAGE_DISPLAY_SIZE, request.width, request.height);
        let origin = self.origin(project_id, request.x, request.y)?;
        #[allow(clippy::cast_precision_loss)]
        let n = request.count as f64;
        let placement = Rect::new(
            origin.0,
            origin.1,
            n * slot.0 + (n - 1.0) * RESULT_GAP,
            slot.1,
        );

        let mut input = json!({
            "prompt": request.prompt,
            "num_images": request.count,
            "image_size": {"width": request.width, "height": request.height},
        });
        if let Some(url) = &request.image_url {
            input["image_url"] = json!(url);
        }

        let model = request
            .model
            .unwrap_or_else(|| self.inner.config.models.image.clone());
        Ok(self.launch(
            project_id,
            owner_id,
            MediaKind::Image,
            &request.prompt,
            model,
            input,
            slot,
            placement,
            0.0,
        ))
    }

    /// Start a video generation.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad input or a full project.
    pub fn start_video(
        &self,
        project_id: &str,
        owner_id: &str,
        request: VideoGenerationRequest,
    ) -> Result<GenerationId, OrchestratorError> {
        validate_prompt(&request.prompt)?;
        if let Some(url) = &request.image_url {
            validate_url(url)?;
        }
        self.check_capacity(project_id, owner_id, 1)?;

        let slot = fit(VIDEO_DISPLAY_SIZE, 16, 9);
        let origin = self.origin(project_id, request.x, request.y)?;
        let placement = Rect::new(origin.0, origin.1, slot.0, slot.1);
        let duration = request.duration.clamp(1.0, 60.0);

        let mut input = json!({
            "prompt": request.prompt,
            "duration": duration,
        });
        if let Some(url) = &request.image_url {
            input["image_url"] = json!(url);
        }

        let model = request
            .model
            .unwrap_or_else(|| self.inner.config.models.video.clone());
        Ok(self.launch(
            project_id,
            owner_id,
            MediaKind::Video,
            &request.prompt,
            model,
            input,
            slot,
            placement,
            duration,
        ))
    }

    /// Start one image generation per variation of a placed image.
    ///
    /// Modifiers never repeat within one request; asking for more variations
    /// than the modifier list holds yields one per modifier.
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::SourceNotFound`] if the source image is
    /// not on the canvas, or a validation error.
    pub fn start_variations(
        &self,
        project_id: &str,
        owner_id: &str,
        request: VariationRequest,
    ) -> Result<Vec<GenerationId>, OrchestratorError> {
        validate_count(request.count)?;
        let canvas = self
            .inner
            .store
            .get(project_id)
            .ok_or_else(|| StoreError::ProjectNotFound(project_id.to_string()))?;
        let source = canvas
            .image(request.source_id)
            .cloned()
            .ok_or(OrchestratorError::SourceNotFound(request.source_id))?;

        let base_prompt = match request.prompt {
            Some(prompt) => prompt,
            None => source
                .parent_generation_id
                .and_then(|gid| self.get(gid))
                .map(|g| g.prompt)
                .ok_or(ValidationError::PromptEmpty)?,
        };
        validate_prompt(&base_prompt)?;

        let prompts =
            variation_prompts(request.kind, &base_prompt, request.count, &mut rand::rng());
        self.check_capacity(project_id, owner_id, prompts.len())?;
        let placements = placements_around(source.bounds(), prompts.len(), RESULT_GAP);
        let model = request
            .model
            .unwrap_or_else(|| self.inner.config.models.image.clone());

        let ids = prompts
            .into_iter()
            .zip(placements)
            .map(|(prompt, placement)| {
                let input = json!({
                    "prompt": prompt,
                    "num_images": 1,
                    "image_url": source.src,
                });
                self.launch(
                    project_id,
                    owner_id,
                    MediaKind::Image,
                    &prompt,
                    model.clone(),
                    input,
                    (placement.width, placement.height),
                    placement,
                    0.0,
                )
            })
            .collect();
        Ok(ids)
    }

    /// Ask the structured-prompt model to describe an image.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a bad URL or the provider error.
    pub async fn analyze(&self, image_url: &str) -> Result<String, OrchestratorError> {
        validate_url(image_url)?;
        let model = self.inner.config.models.analyze.as_str();
        let input = json!({"image_url": image_url, "prompt": ANALYZE_INSTRUCTION});
        let provider = &self.inner.provider;
        let input = &input;
        let output = retry(&self.inner.config.retry, "provider.run", move || {
            provider.run(model, input)
        })
        .await?;
        Ok(parse_text(&output)?)
    }

    /// Look up a generation.
    #[must_use]
    pub fn get(&self, id: GenerationId) -> Option<ActiveGeneration> {
        self.inner.tracker().get(id).cloned()
    }

    /// Generations for a project, oldest first.
    #[must_use]
    pub fn for_project(&self, project_id: &str) -> Vec<ActiveGeneration> {
        self.inner
            .tracker()
            .for_project(project_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Number of generations not yet finished.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.tracker().active_count()
    }

    /// Forget finished generations older than `max_age`.
    pub fn prune_finished(&self, max_age: Duration) -> usize {
        let max_age_ms = u64::try_from(max_age.as_millis()).unwrap_or(u64::MAX);
        let cutoff = current_timestamp_ms().saturating_sub(max_age_ms);
        self.inner.tracker().prune_finished(cutoff)
    }

    fn check_capacity(
        &self,
        project_id: &str,
        owner_id: &str,
        adding: usize,
    ) -> Result<(), OrchestratorError> {
        self.inner.store.ensure(project_id, owner_id);
        let current = self
            .inner
            .store
            .update(project_id, |canvas| canvas.element_count())?;
        validate_element_count(current + adding)?;
        Ok(())
    }

    /// Where new results go: the requested point, or right of the content.
    fn origin(
        &self,
        project_id: &str,
        x: Option<f64>,
        y: Option<f64>,
    ) -> Result<(f64, f64), OrchestratorError> {
        let bounds = self
            .inner
            .store
            .update(project_id, |canvas| canvas.content_bounds())?;
        let (default_x, default_y) =
            bounds.map_or((0.0, 0.0), |b| (b.right() + RESULT_GAP, b.y));
        Ok((x.unwrap_or(default_x), y.unwrap_or(default_y)))
    }

    #[allow(clippy::too_many_arguments)]
    fn launch(
        &self,
        project_id: &str,
        owner_id: &str,
        kind: MediaKind,
        prompt: &str,
        model: String,
        input: Value,
        slot: (f64, f64),
        placement: Rect,
        duration: f64,
    ) -> GenerationId {
        let id = self
            .inner
            .tracker()
            .start(project_id, kind, prompt, model.clone(), placement);
        metrics::record_generation_started(kind.as_str());
        self.inner.publish_generation(id);
        tracing::info!(generation_id = %id, project_id, %kind, %model, "Generation queued");

        let job = Job {
            id,
            project_id: project_id.to_string(),
            owner_id: owner_id.to_string(),
            kind,
            model,
            input,
            slot,
            placement,
            duration,
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.run(job).await });
        id
    }
}

impl Inner {
    fn tracker(&self) -> MutexGuard<'_, GenerationTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_generation(&self, id: GenerationId) {
        let (generation, active) = {
            let tracker = self.tracker();
            (tracker.get(id).cloned(), tracker.active_count())
        };
        metrics::set_active_generations(active);
        if let Some(generation) = generation {
            self.events.publish(StudioEvent::GenerationUpdated { generation });
        }
    }

    fn set_status(&self, id: GenerationId, status: GenerationStatus) {
        let changed = {
            let mut tracker = self.tracker();
            let before = tracker.get(id).map(|g| g.status.clone());
            match tracker.update_status(id, status.clone()) {
                Ok(applied) => applied && before.as_ref() != Some(&status),
                Err(_) => false,
            }
        };
        if changed {
            self.publish_generation(id);
        }
    }

    async fn run(&self, job: Job) {
        let limit = self.config.poll.timeout_for(job.kind);
        let outcome = match tokio::time::timeout(limit, self.execute(&job)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProviderError::Timeout(limit.as_secs()).into()),
        };

        match outcome {
            Ok(result_ids) => {
                let count = result_ids.len();
                if let Err(e) = self.tracker().complete(job.id, result_ids) {
                    tracing::warn!(generation_id = %job.id, error = %e, "Generation vanished");
                }
                metrics::record_generation_finished(job.kind.as_str(), "completed");
                tracing::info!(generation_id = %job.id, results = count, "Generation completed");
            }
            Err(e) => {
                let message = e.user_message();
                if self.tracker().fail(job.id, message).is_err() {
                    tracing::warn!(generation_id = %job.id, "Generation vanished");
                }
                metrics::record_generation_finished(job.kind.as_str(), "failed");
                tracing::warn!(generation_id = %job.id, error = %e, "Generation failed");
            }
        }
        self.publish_generation(job.id);
    }

    async fn execute(&self, job: &Job) -> Result<Vec<ElementId>, OrchestratorError> {
        let provider = &self.provider;
        let model = job.model.as_str();
        let input = &job.input;
        let retry_config = &self.config.retry;

        let request_id = retry(retry_config, "provider.submit", move || {
            provider.submit(model, input)
        })
        .await?;
        let request_id = request_id.as_str();

        loop {
            let status = retry(retry_config, "provider.status", move || {
                provider.status(model, request_id)
            })
            .await?;
            match status {
                QueueStatus::InQueue { queue_position } => self.set_status(
                    job.id,
                    GenerationStatus::Queued {
                        position: queue_position,
                    },
                ),
                QueueStatus::InProgress => self.set_status(job.id, GenerationStatus::Running),
                QueueStatus::Completed => break,
            }
            tokio::time::sleep(self.config.poll.interval).await;
        }

        let output = retry(retry_config, "provider.result", move || {
            provider.result(model, request_id)
        })
        .await?;
        let media = match job.kind {
            MediaKind::Image => parse_images(&output)?,
            MediaKind::Video => vec![parse_video(&output)?],
        };

        let mut sources = Vec::with_capacity(media.len());
        for item in &media {
            sources.push(self.store_media(job, item).await?);
        }
        self.place(job, &media, sources)
    }

    /// Copy one result into storage when configured; returns its src and asset.
    async fn store_media(
        &self,
        job: &Job,
        media: &GeneratedMedia,
    ) -> Result<(String, Option<kanvas_core::AssetId>), OrchestratorError> {
        let Some(storage) = &self.storage else {
            return Ok((media.url.clone(), None));
        };
        let asset = storage
            .persist_media(media, job.kind, &job.owner_id)
            .await?;
        let placed = (asset.url.clone(), Some(asset.id.clone()));
        self.store.register_asset(asset);
        Ok(placed)
    }

    fn place(
        &self,
        job: &Job,
        media: &[GeneratedMedia],
        sources: Vec<(String, Option<kanvas_core::AssetId>)>,
    ) -> Result<Vec<ElementId>, OrchestratorError> {
        let (slot_w, slot_h) = job.slot;
        let rects: Vec<Rect> = media
            .iter()
            .enumerate()
            .map(|(i, m)| {
                #[allow(clippy::cast_precision_loss)]
                let x = job.placement.x + i as f64 * (slot_w + RESULT_GAP);
                let (w, h) = match (m.width, m.height) {
                    (Some(w), Some(h)) if w > 0 && h > 0 => fit(slot_w.max(slot_h), w, h),
                    _ => (slot_w, slot_h),
                };
                Rect::new(x, job.placement.y, w, h)
            })
            .collect();

        let ids = match job.kind {
            MediaKind::Image => {
                let images = sources
                    .into_iter()
                    .zip(&rects)
                    .map(|((src, asset_id), r)| {
                        let image = PlacedImage::new(src, r.x, r.y, r.width, r.height)
                            .generated_by(job.id);
                        match asset_id {
                            Some(asset_id) => image.with_asset(asset_id),
                            None => image,
                        }
                    })
                    .collect::<Vec<_>>();
                // Other generations may have filled the project since start
                self.store.update(&job.project_id, |canvas| {
                    validate_element_count(canvas.element_count() + images.len())?;
                    Ok::<_, ValidationError>(canvas.add_images(images))
                })??
            }
            MediaKind::Video => {
                let videos = sources
                    .into_iter()
                    .zip(media)
                    .zip(&rects)
                    .map(|(((src, asset_id), m), r)| {
                        let duration = m.duration.unwrap_or(job.duration);
                        let video = PlacedVideo::new(src, r.x, r.y, r.width, r.height, duration)
                            .generated_by(job.id);
                        match asset_id {
                            Some(asset_id) => video.with_asset(asset_id),
                            None => video,
                        }
                    })
                    .collect::<Vec<_>>();
                self.store.update(&job.project_id, |canvas| {
                    validate_element_count(canvas.element_count() + videos.len())?;
                    Ok::<_, ValidationError>(canvas.add_videos(videos))
                })??
            }
        };

        self.autosave.touch(&job.project_id);
        let (element_count, last_modified) = self.store.update(&job.project_id, |canvas| {
            (canvas.element_count(), canvas.last_modified())
        })?;
        self.events.publish(StudioEvent::ProjectUpdated {
            project_id: job.project_id.clone(),
            element_count,
            last_modified,
        });
        Ok(ids)
    }
}

/// Scale `width` x `height` so the longest side equals `longest`.
fn fit(longest: f64, width: u32, height: u32) -> (f64, f64) {
    let (w, h) = (f64::from(width.max(1)), f64::from(height.max(1)));
    let scale = longest / w.max(h);
    (w * scale, h * scale)
}
