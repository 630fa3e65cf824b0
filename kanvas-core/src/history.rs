//! Undo/redo history of canvas snapshots.
//!
//! The history is a list of snapshots with a cursor. The snapshot under the
//! cursor always equals the live canvas state, so undo moves the cursor back
//! and returns the previous snapshot to restore.

use serde::{Deserialize, Serialize};

use crate::element::{ElementId, PlacedImage, PlacedVideo};

/// Maximum number of snapshots kept.
pub const MAX_HISTORY: usize = 50;

/// A snapshot of everything undo/redo restores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    /// Images in draw order.
    pub images: Vec<PlacedImage>,
    /// Videos in draw order.
    pub videos: Vec<PlacedVideo>,
    /// Selected element IDs.
    pub selected_ids: Vec<ElementId>,
}

/// Linear undo/redo history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct History {
    entries: Vec<HistorySnapshot>,
    cursor: usize,
    limit: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::new(HistorySnapshot::default())
    }
}

impl History {
    /// Start a history whose only entry is `initial`.
    #[must_use]
    pub fn new(initial: HistorySnapshot) -> Self {
        Self::with_limit(initial, MAX_HISTORY)
    }

    /// Start a history with a custom entry limit (at least 1).
    #[must_use]
    pub fn with_limit(initial: HistorySnapshot, limit: usize) -> Self {
        Self {
            entries: vec![initial],
            cursor: 0,
            limit: limit.max(1),
        }
    }

    /// Record a new current state.
    ///
    /// Any redo branch past the cursor is discarded and the oldest entries are
    /// dropped once the limit is exceeded.
    pub fn record(&mut self, snapshot: HistorySnapshot) {
        self.entries.truncate(self.cursor + 1);
        self.entries.push(snapshot);

        let overflow = self.entries.len().saturating_sub(self.limit);
        if overflow > 0 {
            self.entries.drain(..overflow);
        }
        self.cursor = self.entries.len() - 1;
    }

    /// Step back. Returns the snapshot to restore, if any.
    pub fn undo(&mut self) -> Option<HistorySnapshot> {
        if self.cursor == 0 {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor).cloned()
    }

    /// Step forward. Returns the snapshot to restore, if any.
    pub fn redo(&mut self) -> Option<HistorySnapshot> {
        if self.cursor + 1 >= self.entries.len() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor).cloned()
    }

    /// Check if undo is available.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    /// Check if redo is available.
    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    /// Number of stored snapshots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Always false; a history holds at least the current state.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Position of the current state.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Snapshot matching the live state.
    #[must_use]
    pub fn current(&self) -> Option<&HistorySnapshot> {
        self.entries.get(self.cursor)
    }

    /// Drop everything and start over from `snapshot`.
    pub fn clear(&mut self, snapshot: HistorySnapshot) {
        self.entries.clear();
        self.entries.push(snapshot);
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot_with(n: usize) -> HistorySnapshot {
        HistorySnapshot {
            images: (0..n)
                .map(|i| PlacedImage::new(format!("{i}.png"), 0.0, 0.0, 10.0, 10.0))
                .collect(),
            ..HistorySnapshot::default()
        }
    }

    #[test]
    fn test_new_history_cannot_undo() {
        let history = History::default();
        assert!(!history.can_undo());
        assert!(!history.can_redo());
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_undo_redo_walks_entries() {
        let mut history = History::default();
        history.record(snapshot_with(1));
        history.record(snapshot_with(2));

        let prev = history.undo().expect("undo available");
        assert_eq!(prev.images.len(), 1);
        let prev = history.undo().expect("undo available");
        assert!(prev.images.is_empty());
        assert!(history.undo().is_none());

        let next = history.redo().expect("redo available");
        assert_eq!(next.images.len(), 1);
        let next = history.redo().expect("redo available");
        assert_eq!(next.images.len(), 2);
        assert!(history.redo().is_none());
    }

    #[test]
    fn test_record_discards_redo_branch() {
        let mut history = History::default();
        history.record(snapshot_with(1));
        history.record(snapshot_with(2));
        history.undo();
        history.record(snapshot_with(5));

        assert!(!history.can_redo());
        assert_eq!(history.len(), 3);
        assert_eq!(history.current().map(|s| s.images.len()), Some(5));
    }

    #[test]
    fn test_limit_drops_oldest() {
        let mut history = History::with_limit(HistorySnapshot::default(), 3);
        for n in 1..=5 {
            history.record(snapshot_with(n));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.cursor(), 2);

        history.undo();
        let oldest = history.undo().expect("undo");
        assert_eq!(oldest.images.len(), 3);
        assert!(!history.can_undo());
    }

    #[test]
    fn test_clear_resets() {
        let mut history = History::default();
        history.record(snapshot_with(1));
        history.clear(snapshot_with(4));
        assert_eq!(history.len(), 1);
        assert!(!history.can_undo());
    }
}
