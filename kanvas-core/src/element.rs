//! Placed media elements - the images and videos positioned on the canvas.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::generation::GenerationId;
use crate::{CanvasError, CanvasResult};

/// Unique identifier for a placed element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(Uuid);

impl ElementId {
    /// Create a new unique element ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from an existing UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Parse an element ID from its string form.
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

impl Default for ElementId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ElementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a server-side asset record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(String);

impl AssetId {
    /// Wrap an asset identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AssetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// The kind of media an element or asset holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// A still image.
    Image,
    /// A video clip.
    Video,
}

impl MediaKind {
    /// Lowercase name, as serialized.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned rectangle in canvas units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl Rect {
    /// Create a rectangle from its top-left corner and size.
    #[must_use]
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build the smallest rectangle containing both corner points.
    #[must_use]
    pub fn from_points(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        let (left, right) = if x0 <= x1 { (x0, x1) } else { (x1, x0) };
        let (top, bottom) = if y0 <= y1 { (y0, y1) } else { (y1, y0) };
        Self::new(left, top, right - left, bottom - top)
    }

    /// Right edge.
    #[must_use]
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Bottom edge.
    #[must_use]
    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    /// Center point.
    #[must_use]
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Grow the rectangle by `buffer` on every side.
    #[must_use]
    pub fn expand(&self, buffer: f64) -> Self {
        Self::new(
            self.x - buffer,
            self.y - buffer,
            self.width + buffer * 2.0,
            self.height + buffer * 2.0,
        )
    }

    /// Whether two rectangles overlap. Touching edges count as overlapping.
    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        self.x <= other.right()
            && self.right() >= other.x
            && self.y <= other.bottom()
            && self.bottom() >= other.y
    }

    /// Whether the point lies inside (edges inclusive).
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x <= self.right() && y >= self.y && y <= self.bottom()
    }

    /// Smallest rectangle enclosing both.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        Self::new(
            left,
            top,
            self.right().max(other.right()) - left,
            self.bottom().max(other.bottom()) - top,
        )
    }
}

/// Axis-aligned bounds of a rectangle rotated by `rotation` degrees around its top-left corner.
fn rotated_bounds(x: f64, y: f64, width: f64, height: f64, rotation: f64) -> Rect {
    if rotation.rem_euclid(360.0).abs() < f64::EPSILON {
        return Rect::new(x, y, width, height);
    }
    let (sin, cos) = rotation.to_radians().sin_cos();
    let corners = [
        (0.0, 0.0),
        (width * cos, width * sin),
        (-height * sin, height * cos),
        (width * cos - height * sin, width * sin + height * cos),
    ];
    let (mut min_x, mut min_y) = (f64::INFINITY, f64::INFINITY);
    let (mut max_x, mut max_y) = (f64::NEG_INFINITY, f64::NEG_INFINITY);
    for (cx, cy) in corners {
        min_x = min_x.min(cx);
        min_y = min_y.min(cy);
        max_x = max_x.max(cx);
        max_y = max_y.max(cy);
    }
    Rect::new(x + min_x, y + min_y, max_x - min_x, max_y - min_y)
}

/// An image placed on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedImage {
    /// Unique identifier.
    pub id: ElementId,
    /// X position (canvas units).
    pub x: f64,
    /// Y position (canvas units).
    pub y: f64,
    /// Displayed width.
    pub width: f64,
    /// Displayed height.
    pub height: f64,
    /// Rotation in degrees around the top-left corner.
    pub rotation: f64,
    /// Source URL (remote, data URI or blob reference).
    pub src: String,
    /// Backing asset record, `None` for local-only elements.
    #[serde(default)]
    pub asset_id: Option<AssetId>,
    /// Whether the image came out of a generation.
    #[serde(default)]
    pub is_generated: bool,
    /// Generation that produced this image.
    #[serde(default)]
    pub parent_generation_id: Option<GenerationId>,
}

impl PlacedImage {
    /// Create a new image element.
    #[must_use]
    pub fn new(src: impl Into<String>, x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            id: ElementId::new(),
            x,
            y,
            width,
            height,
            rotation: 0.0,
            src: src.into(),
            asset_id: None,
            is_generated: false,
            parent_generation_id: None,
        }
    }

    /// Attach an asset reference.
    #[must_use]
    pub fn with_asset(mut self, asset_id: AssetId) -> Self {
        self.asset_id = Some(asset_id);
        self
    }

    /// Mark the image as produced by a generation.
    #[must_use]
    pub fn generated_by(mut self, generation: GenerationId) -> Self {
        self.is_generated = true;
        self.parent_generation_id = Some(generation);
        self
    }

    /// Axis-aligned bounds including rotation.
    #[must_use]
    pub fn bounds(&self) -> Rect {
        rotated_bounds(self.x, self.y, self.width, self.height, self.rotation)
    }

    /// Check if a point (in canvas coordinates) is within this element.
    #[must_use]
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        self.bounds().contains(x, y)
    }
}

/// Playback state of a placed video.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoPlayback {
    /// Whether the video is playing.
    pub is_playing: bool,
    /// Current position in seconds.
    pub current_time: f64,
    /// Clip length in seconds.
    pub duration: f64,
    /// Volume between 0 and 1.
    pub volume: f64,
    /// Whether audio is muted.
    pub muted: bool,
    /// Whether playback restarts at the end.
    pub looping: bool,
}

impl Default for VideoPlayback {
    fn default() -> Self {
        Self {
            is_playing: false,
            current_time: 0.0,
            duration: 0.0,
            volume: 1.0,
            muted: false,
            looping: false,
        }
    }
}

impl VideoPlayback {
    /// Start playback.
    pub fn play(&mut self) {
        self.is_playing = true;
    }

    /// Pause playback.
    pub fn pause(&mut self) {
        self.is_playing = false;
    }

    /// Flip between playing and paused.
    pub fn toggle(&mut self) {
        self.is_playing = !self.is_playing;
    }

    /// Seek to `time` seconds, clamped to the clip.
    pub fn seek(&mut self, time: f64) {
        if time.is_finite() {
            self.current_time = time.clamp(0.0, self.duration.max(0.0));
        }
    }

    /// Set the volume, clamped to `[0, 1]`.
    pub fn set_volume(&mut self, volume: f64) {
        if volume.is_finite() {
            self.volume = volume.clamp(0.0, 1.0);
        }
    }

    /// Mute or unmute audio.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// Enable or disable looping.
    pub fn set_looping(&mut self, looping: bool) {
        self.looping = looping;
    }
}

/// A video placed on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedVideo {
    /// Unique identifier.
    pub id: ElementId,
    /// X position (canvas units).
    pub x: f64,
    /// Y position (canvas units).
    pub y: f64,
    /// Displayed width.
    pub width: f64,
    /// Displayed height.
    pub height: f64,
    /// Rotation in degrees around the top-left corner.
    pub rotation: f64,
    /// Source URL.
    pub src: String,
    /// Backing asset record, `None` for local-only elements.
    #[serde(default)]
    pub asset_id: Option<AssetId>,
    /// Playback state.
    #[serde(default)]
    pub playback: VideoPlayback,
    /// Whether the media is still loading.
    #[serde(default)]
    pub is_loading: bool,
    /// Whether the video came out of a generation.
    #[serde(default)]
    pub is_generated: bool,
    /// Generation that produced this video.
    #[serde(default)]
    pub parent_generation_id: Option<GenerationId>,
}

impl PlacedVideo {
    /// Create a new video element.
    #[must_use]
    pub fn new(
        src: impl Into<String>,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        duration: f64,
    ) -> Self {
        Self {
            id: ElementId::new(),
            x,
            y,
            width,
            height,
            rotation: 0.0,
            src: src.into(),
            asset_id: None,
            playback: VideoPlayback {
                duration: duration.max(0.0),
                ..VideoPlayback::default()
            },
            is_loading: false,
            is_generated: false,
            parent_generation_id: None,
        }
    }

    /// Attach an asset reference.
    #[must_use]
    pub fn with_asset(mut self, asset_id: AssetId) -> Self {
        self.asset_id = Some(asset_id);
        self
    }

    /// Mark the video as produced by a generation.
    #[must_use]
    pub fn generated_by(mut self, generation: GenerationId) -> Self {
        self.is_generated = true;
        self.parent_generation_id = Some(generation);
        self
    }

    /// Axis-aligned bounds including rotation.
    #[must_use]
    pub fn bounds(&self) -> Rect {
        rotated_bounds(self.x, self.y, self.width, self.height, self.rotation)
    }

    /// Check if a point (in canvas coordinates) is within this element.
    #[must_use]
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        self.bounds().contains(x, y)
    }
}

/// Anything with canvas bounds, used by culling and marquee selection.
pub trait Bounded {
    /// Axis-aligned bounds in canvas units.
    fn bounds(&self) -> Rect;
}

impl Bounded for PlacedImage {
    fn bounds(&self) -> Rect {
        PlacedImage::bounds(self)
    }
}

impl Bounded for PlacedVideo {
    fn bounds(&self) -> Rect {
        PlacedVideo::bounds(self)
    }
}

impl Bounded for Rect {
    fn bounds(&self) -> Rect {
        *self
    }
}
