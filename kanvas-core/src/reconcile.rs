//! Asset synchronization: checks canvas elements against the asset store.
//!
//! An element either has no asset reference (local-only) or references an
//! existing asset owned by the project owner with a matching media kind.
//! [`validate`] reports every violation; [`reconcile`] repairs them.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::asset::AssetIndex;
use crate::document::ProjectDocument;
use crate::element::{AssetId, ElementId, MediaKind};

/// A single inconsistency between the canvas and the asset store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum AssetIssue {
    /// The element references an asset that does not exist.
    MissingAsset {
        /// Offending element.
        element_id: ElementId,
        /// Dangling reference.
        asset_id: AssetId,
    },
    /// The referenced asset belongs to another user.
    ForeignAsset {
        /// Offending element.
        element_id: ElementId,
        /// Referenced asset.
        asset_id: AssetId,
        /// Actual owner.
        owner_id: String,
    },
    /// An image references a video asset or the other way round.
    KindMismatch {
        /// Offending element.
        element_id: ElementId,
        /// Referenced asset.
        asset_id: AssetId,
        /// Element kind.
        element_kind: MediaKind,
        /// Asset kind.
        asset_kind: MediaKind,
    },
    /// The element source no longer matches the asset URL.
    StaleSource {
        /// Offending element.
        element_id: ElementId,
        /// Referenced asset.
        asset_id: AssetId,
        /// URL on the element.
        element_src: String,
        /// URL on the asset.
        asset_url: String,
    },
    /// An owned asset no element uses. Informational only.
    UnreferencedAsset {
        /// Unused asset.
        asset_id: AssetId,
    },
}

impl AssetIssue {
    /// Element the issue is about, if any.
    #[must_use]
    pub fn element_id(&self) -> Option<ElementId> {
        match self {
            Self::MissingAsset { element_id, .. }
            | Self::ForeignAsset { element_id, .. }
            | Self::KindMismatch { element_id, .. }
            | Self::StaleSource { element_id, .. } => Some(*element_id),
            Self::UnreferencedAsset { .. } => None,
        }
    }

    /// Short label used in logs and metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::MissingAsset { .. } => "missing_asset",
            Self::ForeignAsset { .. } => "foreign_asset",
            Self::KindMismatch { .. } => "kind_mismatch",
            Self::StaleSource { .. } => "stale_source",
            Self::UnreferencedAsset { .. } => "unreferenced_asset",
        }
    }

    /// Whether reconciliation changes the element for this issue.
    #[must_use]
    pub fn is_fixable(&self) -> bool {
        !matches!(self, Self::UnreferencedAsset { .. })
    }
}

/// Result of validating or reconciling a project.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetReport {
    /// Every issue found.
    pub issues: Vec<AssetIssue>,
    /// Elements checked.
    pub checked_elements: usize,
    /// Elements modified by reconciliation.
    pub repaired_elements: usize,
}

impl AssetReport {
    /// True when no fixable issue was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        !self.issues.iter().any(AssetIssue::is_fixable)
    }

    /// Issues about one element.
    #[must_use]
    pub fn issues_for(&self, element_id: ElementId) -> Vec<&AssetIssue> {
        self.issues
            .iter()
            .filter(|i| i.element_id() == Some(element_id))
            .collect()
    }

    /// Number of issues with the given label.
    #[must_use]
    pub fn count(&self, label: &str) -> usize {
        self.issues.iter().filter(|i| i.label() == label).count()
    }

    /// Issue counts keyed by label.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for issue in &self.issues {
            *counts.entry(issue.label()).or_default() += 1;
        }
        counts
    }
}

/// Check every element reference in `document` against `assets`.
#[must_use]
pub fn validate(document: &ProjectDocument, assets: &AssetIndex, owner_id: &str) -> AssetReport {
    let mut report = AssetReport {
        checked_elements: document.elements.len(),
        ..AssetReport::default()
    };
    let mut referenced = HashSet::new();

    for element in &document.elements {
        let Some(asset_id) = element.asset_id() else {
            continue;
        };
        referenced.insert(asset_id.clone());
        let element_id = element.id();

        let Some(asset) = assets.get(asset_id) else {
            report.issues.push(AssetIssue::MissingAsset {
                element_id,
                asset_id: asset_id.clone(),
            });
            continue;
        };

        if asset.owner_id != owner_id {
            report.issues.push(AssetIssue::ForeignAsset {
                element_id,
                asset_id: asset_id.clone(),
                owner_id: asset.owner_id.clone(),
            });
            continue;
        }

        if asset.kind != element.kind() {
            report.issues.push(AssetIssue::KindMismatch {
                element_id,
                asset_id: asset_id.clone(),
                element_kind: element.kind(),
                asset_kind: asset.kind,
            });
            continue;
        }

        if element.src() != asset.url {
            report.issues.push(AssetIssue::StaleSource {
                element_id,
                asset_id: asset_id.clone(),
                element_src: element.src().to_string(),
                asset_url: asset.url.clone(),
            });
        }
    }

    for asset in assets.owned_by(owner_id) {
        if !referenced.contains(&asset.id) {
            report.issues.push(AssetIssue::UnreferencedAsset {
                asset_id: asset.id.clone(),
            });
        }
    }

    report
}

/// Repair `document` in place and report what was found.
///
/// Dangling, foreign and mismatched references are detached so the element
/// becomes local-only and keeps its source. Stale sources are refreshed from
/// the asset. Running it twice changes nothing the second time.
pub fn reconcile(
    document: &mut ProjectDocument,
    assets: &AssetIndex,
    owner_id: &str,
) -> AssetReport {
    let mut report = validate(document, assets, owner_id);
    let mut repaired = HashSet::new();

    for issue in &report.issues {
        let Some(element_id) = issue.element_id() else {
            continue;
        };
        let Some(element) = document.elements.iter_mut().find(|e| e.id() == element_id) else {
            continue;
        };
        match issue {
            AssetIssue::MissingAsset { .. }
            | AssetIssue::ForeignAsset { .. }
            | AssetIssue::KindMismatch { .. } => {
                element.set_asset_id(None);
            }
            AssetIssue::StaleSource { asset_url, .. } => {
                element.set_src(asset_url.clone());
            }
            AssetIssue::UnreferencedAsset { .. } => continue,
        }
        tracing::debug!(
            element_id = %element_id,
            issue = issue.label(),
            "Reconciled asset reference"
        );
        repaired.insert(element_id);
    }

    report.repaired_elements = repaired.len();
    report
}
