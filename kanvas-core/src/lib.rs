//! # Kanvas Core
//!
//! State engine for an infinite canvas of AI-generated images and videos.
//! Pure and synchronous; the server crate drives it from async tasks.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │                 kanvas-core                 │
//! ├─────────────────────────────────────────────┤
//! │  Canvas          │  Viewport                │
//! │  - Images/videos │  - Pan / zoom at cursor  │
//! │  - Selection     │  - Screen <-> canvas     │
//! │  - Undo history  │  - Culling               │
//! ├─────────────────────────────────────────────┤
//! │  Project store   │  Assets                  │
//! │  - Documents     │  - Index by owner        │
//! │  - Last write    │  - Reconciliation        │
//! │    wins          │                          │
//! ├─────────────────────────────────────────────┤
//! │  Generations     │  Variations / Autosave   │
//! └─────────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod asset;
pub mod autosave;
pub mod canvas;
pub mod conflict;
pub mod document;
pub mod element;
pub mod error;
pub mod generation;
pub mod history;
pub mod reconcile;
pub mod store;
pub mod variation;
pub mod viewport;

pub use asset::{Asset, AssetIndex};
pub use autosave::{AutosaveConfig, Debouncer};
pub use canvas::Canvas;
pub use conflict::{ConflictResolution, ConflictStrategy, ElementConflict, ElementConflictKind};
pub use document::{CanvasElement, ImageElement, ProjectDocument, SyncStatus, VideoElement};
pub use element::{
    AssetId, Bounded, ElementId, MediaKind, PlacedImage, PlacedVideo, Rect, VideoPlayback,
};
pub use error::{CanvasError, CanvasResult};
pub use generation::{ActiveGeneration, GenerationId, GenerationStatus, GenerationTracker};
pub use history::{History, HistorySnapshot};
pub use reconcile::{AssetIssue, AssetReport};
pub use store::{Persisted, ProjectStore, SaveOutcome, StoreError};
pub use variation::VariationKind;
pub use viewport::{ScreenSize, Viewport};

/// Kanvas core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
