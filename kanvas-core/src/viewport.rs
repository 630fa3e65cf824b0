//! Viewport pan/zoom transform and visibility culling.
//!
//! Screen coordinates map to canvas coordinates through
//! `screen = canvas * scale + offset`.

use serde::{Deserialize, Serialize};

use crate::element::{Bounded, Rect};

/// Smallest allowed zoom.
pub const MIN_SCALE: f64 = 0.1;
/// Largest allowed zoom.
pub const MAX_SCALE: f64 = 5.0;
/// Largest absolute pan offset in screen pixels.
pub const MAX_OFFSET: f64 = 1.0e7;
/// Default margin around the visible area kept during culling (canvas units).
pub const CULLING_BUFFER: f64 = 100.0;

/// Size of the screen area the canvas is drawn into.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenSize {
    /// Width in pixels.
    pub width: f64,
    /// Height in pixels.
    pub height: f64,
}

impl ScreenSize {
    /// Create a screen size.
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }
}

impl Default for ScreenSize {
    fn default() -> Self {
        Self::new(1280.0, 800.0)
    }
}

/// Current pan offset and zoom scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    /// Horizontal offset in screen pixels.
    pub x: f64,
    /// Vertical offset in screen pixels.
    pub y: f64,
    /// Zoom factor (1.0 = 100%).
    pub scale: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            scale: 1.0,
        }
    }
}

impl Viewport {
    /// Create a viewport, clamping the values into range.
    #[must_use]
    pub fn new(x: f64, y: f64, scale: f64) -> Self {
        let mut viewport = Self::default();
        viewport.set_offset(x, y);
        viewport.set_scale(scale);
        viewport
    }

    /// Return a copy with every field inside its numeric bounds.
    ///
    /// Non-finite values fall back to the defaults.
    #[must_use]
    pub fn sanitized(self) -> Self {
        Self {
            x: clamp_offset(self.x).unwrap_or(0.0),
            y: clamp_offset(self.y).unwrap_or(0.0),
            scale: clamp_scale(self.scale).unwrap_or(1.0),
        }
    }

    /// Set the zoom directly. Non-finite values are ignored.
    pub fn set_scale(&mut self, scale: f64) {
        if let Some(scale) = clamp_scale(scale) {
            self.scale = scale;
        }
    }

    /// Set the pan offset directly. Non-finite components are ignored.
    pub fn set_offset(&mut self, x: f64, y: f64) {
        if let Some(x) = clamp_offset(x) {
            self.x = x;
        }
        if let Some(y) = clamp_offset(y) {
            self.y = y;
        }
    }

    /// Convert a screen point to canvas coordinates.
    #[must_use]
    pub fn screen_to_canvas(&self, sx: f64, sy: f64) -> (f64, f64) {
        ((sx - self.x) / self.scale, (sy - self.y) / self.scale)
    }

    /// Convert a canvas point to screen coordinates.
    #[must_use]
    pub fn canvas_to_screen(&self, cx: f64, cy: f64) -> (f64, f64) {
        (cx * self.scale + self.x, cy * self.scale + self.y)
    }

    /// Pan by a delta in screen pixels.
    pub fn pan(&mut self, dx: f64, dy: f64) {
        self.set_offset(self.x + dx, self.y + dy);
    }

    /// Zoom by `factor`, keeping the given screen point fixed.
    pub fn zoom_at(&mut self, sx: f64, sy: f64, factor: f64) {
        if !factor.is_finite() || factor <= 0.0 || !sx.is_finite() || !sy.is_finite() {
            return;
        }
        let Some(new_scale) = clamp_scale(self.scale * factor) else {
            return;
        };
        if (new_scale - self.scale).abs() < f64::EPSILON {
            return;
        }

        let (cx, cy) = self.screen_to_canvas(sx, sy);
        self.scale = new_scale;
        self.set_offset(sx - cx * new_scale, sy - cy * new_scale);
    }

    /// Reset to the origin at 100%.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Fit the viewport so `bounds` is centered with `padding` pixels around it.
    pub fn fit_to_bounds(&mut self, bounds: Rect, screen: ScreenSize, padding: f64) {
        if bounds.width <= 0.0 || bounds.height <= 0.0 {
            self.reset();
            return;
        }

        let avail_w = (screen.width - padding * 2.0).max(1.0);
        let avail_h = (screen.height - padding * 2.0).max(1.0);
        self.set_scale((avail_w / bounds.width).min(avail_h / bounds.height));

        let (bx, by) = bounds.center();
        self.set_offset(
            screen.width / 2.0 - bx * self.scale,
            screen.height / 2.0 - by * self.scale,
        );
    }

    /// The canvas rectangle currently shown on screen.
    #[must_use]
    pub fn visible_bounds(&self, screen: ScreenSize) -> Rect {
        let (left, top) = self.screen_to_canvas(0.0, 0.0);
        Rect::new(
            left,
            top,
            screen.width / self.scale,
            screen.height / self.scale,
        )
    }

    /// Whether an element with `bounds` should be drawn.
    ///
    /// Elements entirely outside the visible area grown by `buffer` are culled.
    #[must_use]
    pub fn is_visible(&self, bounds: &Rect, screen: ScreenSize, buffer: f64) -> bool {
        self.visible_bounds(screen).expand(buffer).intersects(bounds)
    }

    /// Keep only the items that survive culling.
    pub fn cull<'a, T, I>(&self, items: I, screen: ScreenSize, buffer: f64) -> Vec<&'a T>
    where
        T: Bounded + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let area = self.visible_bounds(screen).expand(buffer);
        items
            .into_iter()
            .filter(|item| area.intersects(&item.bounds()))
            .collect()
    }
}

fn clamp_scale(scale: f64) -> Option<f64> {
    scale
        .is_finite()
        .then(|| scale.clamp(MIN_SCALE, MAX_SCALE))
}

fn clamp_offset(offset: f64) -> Option<f64> {
    offset
        .is_finite()
        .then(|| offset.clamp(-MAX_OFFSET, MAX_OFFSET))
}
