//! Canvas state store: placed media, selection, viewport and history.
//!
//! Every content mutation records a history snapshot, marks the canvas dirty
//! and bumps `last_modified`. Selection, playback and viewport changes are
//! transient and do not create history entries.

use std::collections::HashSet;

use crate::element::{ElementId, PlacedImage, PlacedVideo, Rect, VideoPlayback};
use crate::history::{History, HistorySnapshot};
use crate::store::current_timestamp_ms;
use crate::viewport::{ScreenSize, Viewport, CULLING_BUFFER};
use crate::{CanvasError, CanvasResult};

/// Offset applied to duplicated elements (canvas units).
pub const DUPLICATE_OFFSET: f64 = 20.0;

/// The live state of one project canvas.
#[derive(Debug, Clone)]
pub struct Canvas {
    images: Vec<PlacedImage>,
    videos: Vec<PlacedVideo>,
    selected_ids: Vec<ElementId>,
    viewport: Viewport,
    history: History,
    last_modified: u64,
    dirty: bool,
    revision: u64,
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}

impl Canvas {
    /// Create an empty canvas.
    #[must_use]
    pub fn new() -> Self {
        Self {
            images: Vec::new(),
            videos: Vec::new(),
            selected_ids: Vec::new(),
            viewport: Viewport::default(),
            history: History::default(),
            last_modified: 0,
            dirty: false,
            revision: 0,
        }
    }

    /// Rebuild a canvas from persisted parts with a fresh history.
    #[must_use]
    pub fn from_parts(
        images: Vec<PlacedImage>,
        videos: Vec<PlacedVideo>,
        viewport: Viewport,
        last_modified: u64,
    ) -> Self {
        let history = History::new(HistorySnapshot {
            images: images.clone(),
            videos: videos.clone(),
            selected_ids: Vec::new(),
        });
        Self {
            images,
            videos,
            selected_ids: Vec::new(),
            viewport: viewport.sanitized(),
            history,
            last_modified,
            dirty: false,
            revision: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Images in draw order (last is on top).
    #[must_use]
    pub fn images(&self) -> &[PlacedImage] {
        &self.images
    }

    /// Videos in draw order (last is on top).
    #[must_use]
    pub fn videos(&self) -> &[PlacedVideo] {
        &self.videos
    }

    /// Currently selected element IDs.
    #[must_use]
    pub fn selected_ids(&self) -> &[ElementId] {
        &self.selected_ids
    }

    /// Look up an image.
    #[must_use]
    pub fn image(&self, id: ElementId) -> Option<&PlacedImage> {
        self.images.iter().find(|i| i.id == id)
    }

    /// Look up a video.
    #[must_use]
    pub fn video(&self, id: ElementId) -> Option<&PlacedVideo> {
        self.videos.iter().find(|v| v.id == id)
    }

    /// Whether an element with this ID exists.
    #[must_use]
    pub fn contains(&self, id: ElementId) -> bool {
        self.image(id).is_some() || self.video(id).is_some()
    }

    /// Bounds of an element, image or video.
    #[must_use]
    pub fn element_bounds(&self, id: ElementId) -> Option<Rect> {
        self.image(id)
            .map(PlacedImage::bounds)
            .or_else(|| self.video(id).map(PlacedVideo::bounds))
    }

    /// Total number of placed elements.
    #[must_use]
    pub fn element_count(&self) -> usize {
        self.images.len() + self.videos.len()
    }

    /// Check if the canvas holds no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.images.is_empty() && self.videos.is_empty()
    }

    /// Current viewport.
    #[must_use]
    pub fn viewport(&self) -> &Viewport {
        &self.viewport
    }

    /// Mutable viewport access; the viewport clamps its own values.
    pub fn viewport_mut(&mut self) -> &mut Viewport {
        &mut self.viewport
    }

    /// Replace the viewport, clamping it into range.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport.sanitized();
    }

    /// Undo history.
    #[must_use]
    pub fn history(&self) -> &History {
        &self.history
    }

    /// Last content modification (ms since epoch).
    #[must_use]
    pub fn last_modified(&self) -> u64 {
        self.last_modified
    }

    /// Whether there are unsaved changes.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag after a successful save.
    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    /// Counter bumped by every content change. Not persisted.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Bounding box of all content.
    #[must_use]
    pub fn content_bounds(&self) -> Option<Rect> {
        self.images
            .iter()
            .map(PlacedImage::bounds)
            .chain(self.videos.iter().map(PlacedVideo::bounds))
            .reduce(|acc, r| acc.union(&r))
    }

    /// Capture images, videos and selection together.
    #[must_use]
    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            images: self.images.clone(),
            videos: self.videos.clone(),
            selected_ids: self.selected_ids.clone(),
        }
    }

    // -----------------------------------------------------------------------
    // Content mutations
    // -----------------------------------------------------------------------

    /// Place an image on top of the other images.
    pub fn add_image(&mut self, image: PlacedImage) -> ElementId {
        let id = image.id;
        self.images.push(image);
        self.commit();
        id
    }

    /// Place several images with a single history entry.
    pub fn add_images(&mut self, images: Vec<PlacedImage>) -> Vec<ElementId> {
        if images.is_empty() {
            return Vec::new();
        }
        let ids = images.iter().map(|i| i.id).collect();
        self.images.extend(images);
        self.commit();
        ids
    }

    /// Place a video on top of the other videos.
    pub fn add_video(&mut self, video: PlacedVideo) -> ElementId {
        let id = video.id;
        self.videos.push(video);
        self.commit();
        id
    }

    /// Place several videos with a single history entry.
    pub fn add_videos(&mut self, videos: Vec<PlacedVideo>) -> Vec<ElementId> {
        if videos.is_empty() {
            return Vec::new();
        }
        let ids = videos.iter().map(|v| v.id).collect();
        self.videos.extend(videos);
        self.commit();
        ids
    }

    /// Modify an image in place.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::ElementNotFound`] if no image has this ID.
    pub fn update_image<F>(&mut self, id: ElementId, f: F) -> CanvasResult<()>
    where
        F: FnOnce(&mut PlacedImage),
    {
        let image = self
            .images
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| CanvasError::ElementNotFound(id.to_string()))?;
        f(image);
        image.id = id;
        self.commit();
        Ok(())
    }

    /// Modify a video in place.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::ElementNotFound`] if no video has this ID.
    pub fn update_video<F>(&mut self, id: ElementId, f: F) -> CanvasResult<()>
    where
        F: FnOnce(&mut PlacedVideo),
    {
        let video = self
            .videos
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| CanvasError::ElementNotFound(id.to_string()))?;
        f(video);
        video.id = id;
        self.commit();
        Ok(())
    }

    /// Translate the selection. Returns the number of moved elements.
    pub fn move_selected(&mut self, dx: f64, dy: f64) -> usize {
        if !dx.is_finite() || !dy.is_finite() {
            return 0;
        }
        let moved = self.for_each_selected(|x, y, _| {
            *x += dx;
            *y += dy;
        });
        if moved > 0 {
            self.commit();
        }
        moved
    }

    /// Rotate the selection by `degrees`. Returns the number of rotated elements.
    pub fn rotate_selected(&mut self, degrees: f64) -> usize {
        if !degrees.is_finite() {
            return 0;
        }
        let rotated = self.for_each_selected(|_, _, rotation| {
            *rotation = (*rotation + degrees).rem_euclid(360.0);
        });
        if rotated > 0 {
            self.commit();
        }
        rotated
    }

    fn for_each_selected<F>(&mut self, mut f: F) -> usize
    where
        F: FnMut(&mut f64, &mut f64, &mut f64),
    {
        let selected: HashSet<ElementId> = self.selected_ids.iter().copied().collect();
        let mut count = 0;
        for image in self.images.iter_mut().filter(|i| selected.contains(&i.id)) {
            f(&mut image.x, &mut image.y, &mut image.rotation);
            count += 1;
        }
        for video in self.videos.iter_mut().filter(|v| selected.contains(&v.id)) {
            f(&mut video.x, &mut video.y, &mut video.rotation);
            count += 1;
        }
        count
    }

    /// Remove elements by ID. Returns the number removed.
    pub fn remove(&mut self, ids: &[ElementId]) -> usize {
        let targets: HashSet<ElementId> = ids.iter().copied().collect();
        let before = self.element_count();
        self.images.retain(|i| !targets.contains(&i.id));
        self.videos.retain(|v| !targets.contains(&v.id));
        self.selected_ids.retain(|id| !targets.contains(id));
        let removed = before - self.element_count();
        if removed > 0 {
            self.commit();
        }
        removed
    }

    /// Remove everything that is selected.
    pub fn remove_selected(&mut self) -> usize {
        let ids = self.selected_ids.clone();
        self.remove(&ids)
    }

    /// Copy the selection with an offset; the copies become the selection.
    pub fn duplicate_selected(&mut self) -> Vec<ElementId> {
        let selected: HashSet<ElementId> = self.selected_ids.iter().copied().collect();
        let mut new_ids = Vec::new();

        let image_copies: Vec<PlacedImage> = self
            .images
            .iter()
            .filter(|i| selected.contains(&i.id))
            .map(|i| PlacedImage {
                id: ElementId::new(),
                x: i.x + DUPLICATE_OFFSET,
                y: i.y + DUPLICATE_OFFSET,
                ..i.clone()
            })
            .collect();
        let video_copies: Vec<PlacedVideo> = self
            .videos
            .iter()
            .filter(|v| selected.contains(&v.id))
            .map(|v| PlacedVideo {
                id: ElementId::new(),
                x: v.x + DUPLICATE_OFFSET,
                y: v.y + DUPLICATE_OFFSET,
                playback: VideoPlayback {
                    is_playing: false,
                    current_time: 0.0,
                    ..v.playback
                },
                ..v.clone()
            })
            .collect();

        if image_copies.is_empty() && video_copies.is_empty() {
            return new_ids;
        }

        new_ids.extend(image_copies.iter().map(|i| i.id));
        new_ids.extend(video_copies.iter().map(|v| v.id));
        self.images.extend(image_copies);
        self.videos.extend(video_copies);
        self.selected_ids.clone_from(&new_ids);
        self.commit();
        new_ids
    }

    // -----------------------------------------------------------------------
    // Z-order
    // -----------------------------------------------------------------------

    /// Move an element above all others of its kind.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::ElementNotFound`] if the element does not exist.
    pub fn bring_to_front(&mut self, id: ElementId) -> CanvasResult<()> {
        self.reorder(id, |len, _| len - 1)
    }

    /// Move an element below all others of its kind.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::ElementNotFound`] if the element does not exist.
    pub fn send_to_back(&mut self, id: ElementId) -> CanvasResult<()> {
        self.reorder(id, |_, _| 0)
    }

    /// Move an element one step up.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::ElementNotFound`] if the element does not exist.
    pub fn bring_forward(&mut self, id: ElementId) -> CanvasResult<()> {
        self.reorder(id, |len, idx| (idx + 1).min(len - 1))
    }

    /// Move an element one step down.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::ElementNotFound`] if the element does not exist.
    pub fn send_backward(&mut self, id: ElementId) -> CanvasResult<()> {
        self.reorder(id, |_, idx| idx.saturating_sub(1))
    }

    fn reorder<F>(&mut self, id: ElementId, target: F) -> CanvasResult<()>
    where
        F: Fn(usize, usize) -> usize,
    {
        let moved = if let Some(idx) = self.images.iter().position(|i| i.id == id) {
            let to = target(self.images.len(), idx);
            move_within(&mut self.images, idx, to)
        } else if let Some(idx) = self.videos.iter().position(|v| v.id == id) {
            let to = target(self.videos.len(), idx);
            move_within(&mut self.videos, idx, to)
        } else {
            return Err(CanvasError::ElementNotFound(id.to_string()));
        };
        if moved {
            self.commit();
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Select an element, optionally keeping the existing selection.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::ElementNotFound`] if the element does not exist.
    pub fn select(&mut self, id: ElementId, additive: bool) -> CanvasResult<()> {
        if !self.contains(id) {
            return Err(CanvasError::ElementNotFound(id.to_string()));
        }
        if !additive {
            self.selected_ids.clear();
        }
        if !self.selected_ids.contains(&id) {
            self.selected_ids.push(id);
        }
        Ok(())
    }

    /// Remove one element from the selection.
    pub fn deselect(&mut self, id: ElementId) {
        self.selected_ids.retain(|s| *s != id);
    }

    /// Select every element.
    pub fn select_all(&mut self) {
        self.selected_ids = self
            .images
            .iter()
            .map(|i| i.id)
            .chain(self.videos.iter().map(|v| v.id))
            .collect();
    }

    /// Deselect all elements.
    pub fn clear_selection(&mut self) {
        self.selected_ids.clear();
    }

    /// Marquee selection of every element intersecting `rect` (canvas units).
    pub fn select_in_rect(&mut self, rect: Rect, additive: bool) -> usize {
        if !additive {
            self.selected_ids.clear();
        }
        let hits: Vec<ElementId> = self
            .images
            .iter()
            .filter(|i| rect.intersects(&i.bounds()))
            .map(|i| i.id)
            .chain(
                self.videos
                    .iter()
                    .filter(|v| rect.intersects(&v.bounds()))
                    .map(|v| v.id),
            )
            .collect();
        for id in &hits {
            if !self.selected_ids.contains(id) {
                self.selected_ids.push(*id);
            }
        }
        hits.len()
    }

    /// Topmost element under a screen point. Videos draw above images.
    #[must_use]
    pub fn element_at(&self, sx: f64, sy: f64) -> Option<ElementId> {
        let (cx, cy) = self.viewport.screen_to_canvas(sx, sy);
        self.videos
            .iter()
            .rev()
            .find(|v| v.contains_point(cx, cy))
            .map(|v| v.id)
            .or_else(|| {
                self.images
                    .iter()
                    .rev()
                    .find(|i| i.contains_point(cx, cy))
                    .map(|i| i.id)
            })
    }

    // -----------------------------------------------------------------------
    // Video playback
    // -----------------------------------------------------------------------

    /// Change playback state of a video without touching history.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::ElementNotFound`] if no video has this ID.
    pub fn with_playback<F>(&mut self, id: ElementId, f: F) -> CanvasResult<()>
    where
        F: FnOnce(&mut VideoPlayback),
    {
        let video = self
            .videos
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| CanvasError::ElementNotFound(id.to_string()))?;
        f(&mut video.playback);
        Ok(())
    }

    /// Toggle play/pause.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::ElementNotFound`] if no video has this ID.
    pub fn toggle_play(&mut self, id: ElementId) -> CanvasResult<()> {
        self.with_playback(id, VideoPlayback::toggle)
    }

    /// Seek a video.
    ///
    /// # Errors
    ///
    /// Returns [`CanvasError::ElementNotFound`] if no video has this ID.
    pub fn seek(&mut self, id: ElementId, time: f64) -> CanvasResult<()> {
        self.with_playback(id, |p| p.seek(time))
    }

    // -----------------------------------------------------------------------
    // History
    // -----------------------------------------------------------------------

    /// Restore the previous snapshot. Returns false if there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        match self.history.undo() {
            Some(snapshot) => {
                self.restore(snapshot);
                true
            }
            None => false,
        }
    }

    /// Re-apply the next snapshot. Returns false if there is nothing to redo.
    pub fn redo(&mut self) -> bool {
        match self.history.redo() {
            Some(snapshot) => {
                self.restore(snapshot);
                true
            }
            None => false,
        }
    }

    /// Replace all content with one history entry, e.g. when a saved document
    /// wins a conflict. `last_modified` never moves backwards.
    pub fn replace_content(
        &mut self,
        images: Vec<PlacedImage>,
        videos: Vec<PlacedVideo>,
        last_modified: u64,
    ) {
        let previous = self.last_modified;
        let selected = std::mem::take(&mut self.selected_ids);
        self.restore(HistorySnapshot {
            images,
            videos,
            selected_ids: selected,
        });
        self.history.record(self.snapshot());
        self.last_modified = previous.max(last_modified);
    }

    fn restore(&mut self, snapshot: HistorySnapshot) {
        self.images = snapshot.images;
        self.videos = snapshot.videos;
        let live: HashSet<ElementId> = self
            .images
            .iter()
            .map(|i| i.id)
            .chain(self.videos.iter().map(|v| v.id))
            .collect();
        self.selected_ids = snapshot
            .selected_ids
            .into_iter()
            .filter(|id| live.contains(id))
            .collect();
        self.touch();
    }

    fn commit(&mut self) {
        self.history.record(self.snapshot());
        self.touch();
    }

    fn touch(&mut self) {
        self.dirty = true;
        self.revision += 1;
        self.last_modified = current_timestamp_ms().max(self.last_modified + 1);
    }

    // -----------------------------------------------------------------------
    // Culling
    // -----------------------------------------------------------------------

    /// Images that intersect the visible area plus the culling buffer.
    #[must_use]
    pub fn visible_images(&self, screen: ScreenSize) -> Vec<&PlacedImage> {
        self.viewport.cull(&self.images, screen, CULLING_BUFFER)
    }

    /// Videos that intersect the visible area plus the culling buffer.
    #[must_use]
    pub fn visible_videos(&self, screen: ScreenSize) -> Vec<&PlacedVideo> {
        self.viewport.cull(&self.videos, screen, CULLING_BUFFER)
    }
}

fn move_within<T>(items: &mut Vec<T>, from: usize, to: usize) -> bool {
    if from == to {
        return false;
    }
    let item = items.remove(from);
    items.insert(to, item);
    true
}
