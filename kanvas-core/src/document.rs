//! Canonical serialized representation of a project, used for saving,
//! loading and exchanging canvas state with clients.

use serde::{Deserialize, Serialize};

use crate::canvas::Canvas;
use crate::element::{AssetId, ElementId, MediaKind, PlacedImage, PlacedVideo, VideoPlayback};
use crate::generation::GenerationId;
use crate::viewport::Viewport;

/// Synchronization state of a project document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    /// Local and remote agree.
    #[default]
    Synced,
    /// Local changes not yet saved.
    Pending,
    /// A save is in flight.
    Syncing,
    /// The last save lost against a newer remote version.
    Conflict,
    /// The last save failed.
    Failed,
}

/// Position, size and rotation of a persisted element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElementTransform {
    /// X position.
    pub x: f64,
    /// Y position.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
    /// Rotation in degrees.
    #[serde(default)]
    pub rotation: f64,
}

/// Persisted image element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageElement {
    /// Element identifier.
    pub id: ElementId,
    /// Geometry.
    pub transform: ElementTransform,
    /// Source URL.
    pub src: String,
    /// Backing asset.
    #[serde(default)]
    pub asset_id: Option<AssetId>,
    /// Draw order across the whole canvas.
    #[serde(default)]
    pub z_index: u32,
    /// Produced by a generation.
    #[serde(default)]
    pub is_generated: bool,
    /// Producing generation.
    #[serde(default)]
    pub parent_generation_id: Option<GenerationId>,
}

/// Persisted video element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoElement {
    /// Element identifier.
    pub id: ElementId,
    /// Geometry.
    pub transform: ElementTransform,
    /// Source URL.
    pub src: String,
    /// Backing asset.
    #[serde(default)]
    pub asset_id: Option<AssetId>,
    /// Draw order across the whole canvas.
    #[serde(default)]
    pub z_index: u32,
    /// Playback settings.
    #[serde(default)]
    pub playback: VideoPlayback,
    /// Produced by a generation.
    #[serde(default)]
    pub is_generated: bool,
    /// Producing generation.
    #[serde(default)]
    pub parent_generation_id: Option<GenerationId>,
}

/// A persisted canvas element, image or video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CanvasElement {
    /// An image.
    Image(ImageElement),
    /// A video.
    Video(VideoElement),
}

impl CanvasElement {
    /// Element identifier.
    #[must_use]
    pub fn id(&self) -> ElementId {
        match self {
            Self::Image(e) => e.id,
            Self::Video(e) => e.id,
        }
    }

    /// Image or video.
    #[must_use]
    pub fn kind(&self) -> MediaKind {
        match self {
            Self::Image(_) => MediaKind::Image,
            Self::Video(_) => MediaKind::Video,
        }
    }

    /// Source URL.
    #[must_use]
    pub fn src(&self) -> &str {
        match self {
            Self::Image(e) => &e.src,
            Self::Video(e) => &e.src,
        }
    }

    /// Replace the source URL.
    pub fn set_src(&mut self, src: String) {
        match self {
            Self::Image(e) => e.src = src,
            Self::Video(e) => e.src = src,
        }
    }

    /// Backing asset, if any.
    #[must_use]
    pub fn asset_id(&self) -> Option<&AssetId> {
        match self {
            Self::Image(e) => e.asset_id.as_ref(),
            Self::Video(e) => e.asset_id.as_ref(),
        }
    }

    /// Replace or clear the asset reference.
    pub fn set_asset_id(&mut self, asset_id: Option<AssetId>) {
        match self {
            Self::Image(e) => e.asset_id = asset_id,
            Self::Video(e) => e.asset_id = asset_id,
        }
    }

    /// Draw order.
    #[must_use]
    pub fn z_index(&self) -> u32 {
        match self {
            Self::Image(e) => e.z_index,
            Self::Video(e) => e.z_index,
        }
    }

    fn from_image(image: &PlacedImage, z_index: u32) -> Self {
        Self::Image(ImageElement {
            id: image.id,
            transform: ElementTransform {
                x: image.x,
                y: image.y,
                width: image.width,
                height: image.height,
                rotation: image.rotation,
            },
            src: image.src.clone(),
            asset_id: image.asset_id.clone(),
            z_index,
            is_generated: image.is_generated,
            parent_generation_id: image.parent_generation_id,
        })
    }

    fn from_video(video: &PlacedVideo, z_index: u32) -> Self {
        Self::Video(VideoElement {
            id: video.id,
            transform: ElementTransform {
                x: video.x,
                y: video.y,
                width: video.width,
                height: video.height,
                rotation: video.rotation,
            },
            src: video.src.clone(),
            asset_id: video.asset_id.clone(),
            z_index,
            playback: VideoPlayback {
                is_playing: false,
                ..video.playback
            },
            is_generated: video.is_generated,
            parent_generation_id: video.parent_generation_id,
        })
    }
}

impl From<ImageElement> for PlacedImage {
    fn from(e: ImageElement) -> Self {
        Self {
            id: e.id,
            x: e.transform.x,
            y: e.transform.y,
            width: e.transform.width,
            height: e.transform.height,
            rotation: e.transform.rotation,
            src: e.src,
            asset_id: e.asset_id,
            is_generated: e.is_generated,
            parent_generation_id: e.parent_generation_id,
        }
    }
}

impl From<VideoElement> for PlacedVideo {
    fn from(e: VideoElement) -> Self {
        Self {
            id: e.id,
            x: e.transform.x,
            y: e.transform.y,
            width: e.transform.width,
            height: e.transform.height,
            rotation: e.transform.rotation,
            src: e.src,
            asset_id: e.asset_id,
            playback: e.playback,
            is_loading: false,
            is_generated: e.is_generated,
            parent_generation_id: e.parent_generation_id,
        }
    }
}

/// Canonical project document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDocument {
    /// Project identifier.
    pub project_id: String,
    /// Owning user.
    pub owner_id: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Viewport state.
    #[serde(default)]
    pub viewport: Viewport,
    /// Elements in z-order.
    #[serde(default)]
    pub elements: Vec<CanvasElement>,
    /// Last modification (ms since epoch), used for conflict resolution.
    pub last_modified: u64,
    /// Sync status as last reported.
    #[serde(default)]
    pub sync_status: SyncStatus,
}

impl ProjectDocument {
    /// Create an empty document.
    #[must_use]
    pub fn empty(project_id: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            owner_id: owner_id.into(),
            name: String::new(),
            viewport: Viewport::default(),
            elements: Vec::new(),
            last_modified: 0,
            sync_status: SyncStatus::Synced,
        }
    }

    /// Build a document from a live canvas. Images are stacked below videos.
    #[must_use]
    pub fn from_canvas(
        project_id: impl Into<String>,
        owner_id: impl Into<String>,
        name: impl Into<String>,
        canvas: &Canvas,
    ) -> Self {
        let mut z = 0_u32;
        let mut elements = Vec::with_capacity(canvas.element_count());
        for image in canvas.images() {
            elements.push(CanvasElement::from_image(image, z));
            z += 1;
        }
        for video in canvas.videos() {
            elements.push(CanvasElement::from_video(video, z));
            z += 1;
        }

        Self {
            project_id: project_id.into(),
            owner_id: owner_id.into(),
            name: name.into(),
            viewport: *canvas.viewport(),
            elements,
            last_modified: canvas.last_modified(),
            sync_status: if canvas.is_dirty() {
                SyncStatus::Pending
            } else {
                SyncStatus::Synced
            },
        }
    }

    /// Materialize a live canvas with a fresh history.
    #[must_use]
    pub fn into_canvas(self) -> Canvas {
        let mut elements = self.elements;
        elements.sort_by_key(CanvasElement::z_index);

        let mut images = Vec::new();
        let mut videos = Vec::new();
        for element in elements {
            match element {
                CanvasElement::Image(e) => images.push(PlacedImage::from(e)),
                CanvasElement::Video(e) => videos.push(PlacedVideo::from(e)),
            }
        }
        Canvas::from_parts(images, videos, self.viewport, self.last_modified)
    }

    /// Find an element by ID.
    #[must_use]
    pub fn element(&self, id: ElementId) -> Option<&CanvasElement> {
        self.elements.iter().find(|e| e.id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_canvas_orders_images_below_videos() {
        let mut canvas = Canvas::new();
        canvas.add_video(PlacedVideo::new("v.mp4", 0.0, 0.0, 10.0, 10.0, 2.0));
        canvas.add_image(PlacedImage::new("a.png", 0.0, 0.0, 10.0, 10.0));

        let doc = ProjectDocument::from_canvas("p1", "alice", "Demo", &canvas);
        assert_eq!(doc.elements.len(), 2);
        assert_eq!(doc.elements[0].kind(), MediaKind::Image);
        assert_eq!(doc.elements[1].kind(), MediaKind::Video);
        assert_eq!(doc.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn test_into_canvas_restores_content_and_fresh_history() {
        let mut canvas = Canvas::new();
        let img = canvas.add_image(
            PlacedImage::new("a.png", 3.0, 4.0, 10.0, 10.0).with_asset(AssetId::new("as_1")),
        );
        canvas.viewport_mut().set_scale(2.0);

        let doc = ProjectDocument::from_canvas("p1", "alice", "", &canvas);
        let restored = doc.into_canvas();
        let image = restored.image(img).expect("image restored");
        assert!((image.x - 3.0).abs() < f64::EPSILON);
        assert_eq!(image.asset_id, Some(AssetId::new("as_1")));
        assert!((restored.viewport().scale - 2.0).abs() < f64::EPSILON);
        assert!(!restored.history().can_undo());
        assert!(!restored.is_dirty());
    }

    #[test]
    fn test_into_canvas_sorts_by_z_index() {
        let mut canvas = Canvas::new();
        let a = canvas.add_image(PlacedImage::new("a.png", 0.0, 0.0, 1.0, 1.0));
        let b = canvas.add_image(PlacedImage::new("b.png", 0.0, 0.0, 1.0, 1.0));
        let mut doc = ProjectDocument::from_canvas("p", "o", "", &canvas);
        doc.elements.reverse();

        let restored = doc.into_canvas();
        let order: Vec<_> = restored.images().iter().map(|i| i.id).collect();
        assert_eq!(order, vec![a, b]);
    }

    #[test]
    fn test_tagged_json_shape() {
        let mut canvas = Canvas::new();
        canvas.add_image(PlacedImage::new("a.png", 0.0, 0.0, 1.0, 1.0));
        let doc = ProjectDocument::from_canvas("p", "o", "", &canvas);
        let json = serde_json::to_value(&doc).expect("serialize");
        assert_eq!(json["elements"][0]["type"], "image");
        assert_eq!(json["sync_status"], "pending");
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "project_id": "p",
            "owner_id": "o",
            "last_modified": 5,
            "elements": [{
                "type": "video",
                "id": "6f1c1f0e-3c1e-4a55-8f6f-0a4c2b9d2e11",
                "transform": {"x": 1, "y": 2, "width": 3, "height": 4},
                "src": "v.mp4"
            }]
        }"#;
        let doc: ProjectDocument = serde_json::from_str(json).expect("parse");
        assert_eq!(doc.elements.len(), 1);
        assert_eq!(doc.elements[0].kind(), MediaKind::Video);
        assert!(doc.elements[0].asset_id().is_none());
        assert_eq!(doc.sync_status, SyncStatus::Synced);
    }
}
