//! Server-side asset records that placed elements reference by `asset_id`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::element::{AssetId, MediaKind};

/// A stored media file owned by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Asset identifier.
    pub id: AssetId,
    /// Owning user.
    pub owner_id: String,
    /// Image or video.
    pub kind: MediaKind,
    /// Public URL of the stored file.
    pub url: String,
    /// Storage backend identifier.
    pub storage_id: String,
    /// Natural width in pixels.
    pub width: u32,
    /// Natural height in pixels.
    pub height: u32,
    /// MIME type.
    #[serde(default)]
    pub mime_type: Option<String>,
    /// File size in bytes.
    #[serde(default)]
    pub size_bytes: Option<u64>,
    /// Clip duration in seconds (videos).
    #[serde(default)]
    pub duration: Option<f64>,
    /// Creation time (ms since epoch).
    pub created_at: u64,
}

/// In-memory index of assets by ID.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetIndex {
    assets: HashMap<AssetId, Asset>,
}

impl AssetIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an asset, returning the previous record.
    pub fn insert(&mut self, asset: Asset) -> Option<Asset> {
        self.assets.insert(asset.id.clone(), asset)
    }

    /// Remove an asset.
    pub fn remove(&mut self, id: &AssetId) -> Option<Asset> {
        self.assets.remove(id)
    }

    /// Look up an asset.
    #[must_use]
    pub fn get(&self, id: &AssetId) -> Option<&Asset> {
        self.assets.get(id)
    }

    /// All assets owned by `owner_id`, sorted by creation time.
    #[must_use]
    pub fn owned_by(&self, owner_id: &str) -> Vec<&Asset> {
        let mut owned: Vec<_> = self
            .assets
            .values()
            .filter(|a| a.owner_id == owner_id)
            .collect();
        owned.sort_by_key(|a| a.created_at);
        owned
    }

    /// Iterate over all assets in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    /// Number of assets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    /// Check if the index is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

impl FromIterator<Asset> for AssetIndex {
    fn from_iter<I: IntoIterator<Item = Asset>>(iter: I) -> Self {
        let mut index = Self::new();
        for asset in iter {
            index.insert(asset);
        }
        index
    }
}

#[cfg(test)]
pub(crate) fn sample_asset(id: &str, owner: &str, kind: MediaKind) -> Asset {
    Asset {
        id: AssetId::new(id),
        owner_id: owner.to_string(),
        kind,
        url: format!("https://storage.example/{id}"),
        storage_id: format!("st_{id}"),
        width: 1024,
        height: 768,
        mime_type: None,
        size_bytes: None,
        duration: None,
        created_at: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_by_filters_and_sorts() {
        let mut late = sample_asset("b", "alice", MediaKind::Image);
        late.created_at = 10;
        let index: AssetIndex = vec![
            late,
            sample_asset("a", "alice", MediaKind::Video),
            sample_asset("c", "bob", MediaKind::Image),
        ]
        .into_iter()
        .collect();

        let owned: Vec<_> = index.owned_by("alice").iter().map(|a| a.id.as_str()).collect();
        assert_eq!(owned, vec!["a", "b"]);
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn test_insert_replaces() {
        let mut index = AssetIndex::new();
        assert!(index.insert(sample_asset("a", "alice", MediaKind::Image)).is_none());
        assert!(index.insert(sample_asset("a", "alice", MediaKind::Image)).is_some());
        assert_eq!(index.len(), 1);
    }
}
