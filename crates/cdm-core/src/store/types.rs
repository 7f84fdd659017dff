//! Row types for the ledger and the catalog.

use std::path::PathBuf;

use crate::model::{GroupId, ItemId, TransferState};

/// Last-known transfer state of one item, as persisted in the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRecord {
    pub item_id: ItemId,
    pub state: TransferState,
    /// Fraction in `[0.0, 1.0]`.
    pub progress: f64,
    /// Permanent location of the materialized file; set only for `Completed`.
    pub final_location: Option<PathBuf>,
    /// Unix seconds of the last write.
    pub updated_at: i64,
}

impl TransferRecord {
    pub fn new(item_id: ItemId, state: TransferState, progress: f64) -> Self {
        Self {
            item_id,
            state,
            progress,
            final_location: None,
            updated_at: super::db::unix_timestamp(),
        }
    }

    pub fn completed(item_id: ItemId, final_location: PathBuf) -> Self {
        Self {
            final_location: Some(final_location),
            ..Self::new(item_id, TransferState::Completed, 1.0)
        }
    }
}

/// Fields supplied when registering an item in the catalog.
#[derive(Debug, Clone)]
pub struct NewCatalogItem {
    pub id: ItemId,
    pub group_id: Option<GroupId>,
    pub title: String,
    pub source_url: String,
    /// File extension without the dot; empty when unknown.
    pub extension: String,
}

/// A catalog item together with its cached download state.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub id: ItemId,
    pub group_id: Option<GroupId>,
    pub title: String,
    pub source_url: String,
    pub extension: String,
    pub cached_state: TransferState,
    pub cached_progress: f64,
    pub local_path: Option<PathBuf>,
    pub updated_at: i64,
}

impl CatalogItem {
    /// Whether the cached copy already says exactly what `record` says
    /// (or `NotStarted` with nothing, when there is no record).
    pub fn cache_matches(&self, record: Option<&TransferRecord>) -> bool {
        match record {
            Some(r) => {
                self.cached_state == r.state
                    && (self.cached_progress - r.progress).abs() < f64::EPSILON
                    && self.local_path == r.final_location
            }
            None => {
                self.cached_state == TransferState::NotStarted
                    && self.cached_progress == 0.0
                    && self.local_path.is_none()
            }
        }
    }
}
