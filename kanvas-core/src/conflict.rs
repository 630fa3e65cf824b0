//! # Conflict Resolution
//!
//! Decides which of two versions of a project survives when a local save
//! races a remote one.
//!
//! ```text
//! 1. Local save arrives with its last_modified timestamp
//! 2. Stored (remote) version has its own timestamp
//! 3. Strategy picks a winner; element-level differences are reported
//! ```

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::document::{CanvasElement, ProjectDocument};
use crate::element::ElementId;

/// Conflict resolution strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Last write wins - newer timestamp takes precedence.
    #[default]
    LastWriteWins,
    /// Local wins - local version always takes precedence.
    LocalWins,
    /// Remote wins - remote version always takes precedence.
    RemoteWins,
}

/// Result of conflict resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Keep the local version.
    KeepLocal,
    /// Keep the remote version.
    KeepRemote,
}

/// Pick the surviving version. Under last-write-wins, ties keep local.
#[must_use]
pub fn resolve(
    local: &ProjectDocument,
    remote: &ProjectDocument,
    strategy: ConflictStrategy,
) -> ConflictResolution {
    match strategy {
        ConflictStrategy::LastWriteWins => {
            if local.last_modified >= remote.last_modified {
                ConflictResolution::KeepLocal
            } else {
                ConflictResolution::KeepRemote
            }
        }
        ConflictStrategy::LocalWins => ConflictResolution::KeepLocal,
        ConflictStrategy::RemoteWins => ConflictResolution::KeepRemote,
    }
}

/// How an element differs between two versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementConflictKind {
    /// Present on both sides with different content.
    Modified,
    /// Present only locally.
    LocalOnly,
    /// Present only remotely.
    RemoteOnly,
}

/// A per-element difference between local and remote versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementConflict {
    /// Element concerned.
    pub element_id: ElementId,
    /// Kind of difference.
    pub kind: ElementConflictKind,
}

/// List the elements that differ between `local` and `remote`.
///
/// Output is sorted by element ID so it is stable across runs.
#[must_use]
pub fn detect_element_conflicts(
    local: &ProjectDocument,
    remote: &ProjectDocument,
) -> Vec<ElementConflict> {
    let remote_by_id: HashMap<ElementId, &CanvasElement> =
        remote.elements.iter().map(|e| (e.id(), e)).collect();
    let mut seen = HashSet::with_capacity(local.elements.len());
    let mut conflicts = Vec::new();

    for element in &local.elements {
        let id = element.id();
        seen.insert(id);
        match remote_by_id.get(&id) {
            Some(other) if !same_content(element, other) => conflicts.push(ElementConflict {
                element_id: id,
                kind: ElementConflictKind::Modified,
            }),
            Some(_) => {}
            None => conflicts.push(ElementConflict {
                element_id: id,
                kind: ElementConflictKind::LocalOnly,
            }),
        }
    }

    for id in remote_by_id.keys() {
        if !seen.contains(id) {
            conflicts.push(ElementConflict {
                element_id: *id,
                kind: ElementConflictKind::RemoteOnly,
            });
        }
    }

    conflicts.sort_by_key(|c| c.element_id);
    conflicts
}

/// Compare ignoring z-order and transient playback position.
fn same_content(a: &CanvasElement, b: &CanvasElement) -> bool {
    match (a, b) {
        (CanvasElement::Image(a), CanvasElement::Image(b)) => {
            a.transform == b.transform && a.src == b.src && a.asset_id == b.asset_id
        }
        (CanvasElement::Video(a), CanvasElement::Video(b)) => {
            a.transform == b.transform
                && a.src == b.src
                && a.asset_id == b.asset_id
                && a.playback.volume.to_bits() == b.playback.volume.to_bits()
                && a.playback.muted == b.playback.muted
                && a.playback.looping == b.playback.looping
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Canvas;
    use crate::element::PlacedImage;

    fn doc_at(last_modified: u64) -> ProjectDocument {
        let mut doc = ProjectDocument::empty("p", "alice");
        doc.last_modified = last_modified;
        doc
    }

    #[test]
    fn test_last_write_wins_local() {
        let res = resolve(&doc_at(200), &doc_at(100), ConflictStrategy::LastWriteWins);
        assert_eq!(res, ConflictResolution::KeepLocal);
    }

    #[test]
    fn test_last_write_wins_remote() {
        let res = resolve(&doc_at(100), &doc_at(200), ConflictStrategy::LastWriteWins);
        assert_eq!(res, ConflictResolution::KeepRemote);
    }

    #[test]
    fn test_tie_keeps_local() {
        let res = resolve(&doc_at(100), &doc_at(100), ConflictStrategy::LastWriteWins);
        assert_eq!(res, ConflictResolution::KeepLocal);
    }

    #[test]
    fn test_fixed_strategies() {
        assert_eq!(
            resolve(&doc_at(1), &doc_at(2), ConflictStrategy::LocalWins),
            ConflictResolution::KeepLocal
        );
        assert_eq!(
            resolve(&doc_at(2), &doc_at(1), ConflictStrategy::RemoteWins),
            ConflictResolution::KeepRemote
        );
    }

    #[test]
    fn test_default_strategy() {
        assert_eq!(ConflictStrategy::default(), ConflictStrategy::LastWriteWins);
    }

    #[test]
    fn test_detect_element_conflicts() {
        let mut canvas = Canvas::new();
        let shared = canvas.add_image(PlacedImage::new("a.png", 0.0, 0.0, 10.0, 10.0));
        let untouched = canvas.add_image(PlacedImage::new("b.png", 0.0, 0.0, 10.0, 10.0));
        let remote = ProjectDocument::from_canvas("p", "alice", "", &canvas);

        canvas
            .update_image(shared, |i| i.x = 50.0)
            .expect("update");
        let local_only = canvas.add_image(PlacedImage::new("c.png", 0.0, 0.0, 10.0, 10.0));
        canvas.remove(&[untouched]);
        let local = ProjectDocument::from_canvas("p", "alice", "", &canvas);

        let conflicts = detect_element_conflicts(&local, &remote);
        assert_eq!(conflicts.len(), 3);
        let kind_of = |id| {
            conflicts
                .iter()
                .find(|c| c.element_id == id)
                .map(|c| c.kind)
        };
        assert_eq!(kind_of(shared), Some(ElementConflictKind::Modified));
        assert_eq!(kind_of(local_only), Some(ElementConflictKind::LocalOnly));
        assert_eq!(kind_of(untouched), Some(ElementConflictKind::RemoteOnly));
    }

    #[test]
    fn test_identical_documents_have_no_conflicts() {
        let mut canvas = Canvas::new();
        canvas.add_image(PlacedImage::new("a.png", 0.0, 0.0, 10.0, 10.0));
        let doc = ProjectDocument::from_canvas("p", "alice", "", &canvas);
        assert!(detect_element_conflicts(&doc, &doc.clone()).is_empty());
    }

    #[test]
    fn test_large_disjoint_documents() {
        let mut local_canvas = Canvas::new();
        let mut remote_canvas = Canvas::new();
        let image = || PlacedImage::new("a.png", 0.0, 0.0, 10.0, 10.0);
        local_canvas.add_images((0..5_000).map(|_| image()).collect());
        remote_canvas.add_images((0..5_000).map(|_| image()).collect());
        let local = ProjectDocument::from_canvas("p", "alice", "", &local_canvas);
        let remote = ProjectDocument::from_canvas("p", "alice", "", &remote_canvas);

        let conflicts = detect_element_conflicts(&local, &remote);
        assert_eq!(conflicts.len(), 10_000);
        let remote_only = conflicts
            .iter()
            .filter(|c| c.kind == ElementConflictKind::RemoteOnly)
            .count();
        assert_eq!(remote_only, 5_000);
    }
}
