//! Startup repair of ledger and catalog drift.
//!
//! Run before scheduling anything (and whenever a caller asks): live states
//! cannot survive a restart, completed records must point at a file that
//! exists, and the catalog's cached copy must say what the ledger says.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Result, TransferError};
use crate::model::{ItemId, TransferState};
use crate::storage::StorageGateway;
use crate::store::{CatalogItem, Store, TransferRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub repaired: usize,
    pub failed: usize,
}

/// Tells the reconciler which items it must leave alone.
#[async_trait]
pub trait LiveItems: Send + Sync {
    /// Held while one item is repaired.
    type Guard: Send;

    /// `None` when `item_id` has a live transfer. Otherwise a guard that keeps
    /// one from starting until the repair is done.
    async fn settle(&self, item_id: ItemId) -> Option<Self::Guard>;
}

/// A fixed set of live ids, for callers with nothing running concurrently.
#[async_trait]
impl LiveItems for HashSet<ItemId> {
    type Guard = ();

    async fn settle(&self, item_id: ItemId) -> Option<()> {
        (!self.contains(&item_id)).then_some(())
    }
}

pub struct Reconciler {
    store: Store,
    storage: Arc<dyn StorageGateway>,
}

/// What one item needed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Clean,
    Repaired,
}

impl Reconciler {
    pub fn new(store: Store, storage: Arc<dyn StorageGateway>) -> Self {
        Self { store, storage }
    }

    /// Check every catalogued or recorded item except those `live` reports as
    /// transferring. Per-item errors are logged and counted; they never abort the run.
    pub async fn run<L: LiveItems + ?Sized>(&self, live: &L) -> Result<ReconcileReport> {
        let items: HashMap<ItemId, CatalogItem> = self
            .store
            .list_items()
            .await
            .map_err(TransferError::persistence)?
            .into_iter()
            .map(|i| (i.id, i))
            .collect();
        let records = self
            .store
            .list_records()
            .await
            .map_err(TransferError::persistence)?;

        let ids: BTreeSet<ItemId> = items
            .keys()
            .copied()
            .chain(records.iter().map(|r| r.item_id))
            .collect();

        let mut report = ReconcileReport::default();
        for id in ids {
            let Some(_guard) = live.settle(id).await else {
                continue;
            };
            report.examined += 1;
            match self.reconcile_item(id, items.get(&id)).await {
                Ok(Outcome::Clean) => {}
                Ok(Outcome::Repaired) => report.repaired += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(item_id = %id, "reconcile failed: {}", e);
                }
            }
        }

        tracing::info!(
            examined = report.examined,
            repaired = report.repaired,
            failed = report.failed,
            "reconciliation finished"
        );
        Ok(report)
    }

    async fn reconcile_item(&self, id: ItemId, cached: Option<&CatalogItem>) -> Result<Outcome> {
        // Re-read: the scan above may be stale by now.
        let record = self
            .store
            .get_record(id)
            .await
            .map_err(TransferError::persistence)?;

        if let Some(r) = &record {
            if let Some(reason) = self.invalid_reason(r).await {
                tracing::info!(item_id = %id, state = %r.state, reason, "resetting to not_started");
                self.store
                    .clear_record(id)
                    .await
                    .map_err(TransferError::persistence)?;
                return Ok(Outcome::Repaired);
            }
        }

        let Some(cached) = cached else {
            return Ok(Outcome::Clean);
        };
        if cached.cache_matches(record.as_ref()) {
            return Ok(Outcome::Clean);
        }

        let (state, progress, location) = match &record {
            Some(r) => (r.state, r.progress, r.final_location.as_deref()),
            None => (TransferState::NotStarted, 0.0, None),
        };
        tracing::info!(item_id = %id, cached = %cached.cached_state, actual = %state, "refreshing cached state");
        self.store
            .set_cached_state(id, state, progress, location)
            .await
            .map_err(TransferError::persistence)?;
        Ok(Outcome::Repaired)
    }

    /// Why `record` cannot stand, if it cannot.
    async fn invalid_reason(&self, record: &TransferRecord) -> Option<&'static str> {
        match record.state {
            TransferState::InProgress | TransferState::Paused => Some("no live transfer"),
            TransferState::Completed => match &record.final_location {
                None => Some("completed without a location"),
                Some(path) if !self.storage.exists(path).await => Some("completed file is missing"),
                Some(_) => None,
            },
            TransferState::NotStarted | TransferState::Failed => None,
        }
    }
}
