//! Item- and group-level download service over the catalog, the coordinator,
//! the aggregator and the reconciler.
//!
//! Observers get `watch` receivers that always hold the latest value; a
//! single pump task copies coordinator and aggregator broadcasts into them.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use url::Url;

use crate::aggregator::{ProgressAggregator, ProgressEvent};
use crate::coordinator::{Coordinator, TransferEvent};
use crate::error::{Result, TransferError};
use crate::model::{GroupId, ItemId, TransferState};
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::storage::split_extension;
use crate::store::{CatalogItem, Store};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Watchers {
    states: Mutex<HashMap<ItemId, watch::Sender<TransferState>>>,
    items: Mutex<HashMap<ItemId, watch::Sender<f64>>>,
    groups: Mutex<HashMap<GroupId, watch::Sender<f64>>>,
}

impl Watchers {
    fn set_state(&self, item_id: ItemId, state: TransferState) {
        if let Some(tx) = lock(&self.states).get(&item_id) {
            tx.send_replace(state);
        }
        match state {
            TransferState::NotStarted => self.set_item(item_id, 0.0),
            TransferState::Completed => self.set_item(item_id, 1.0),
            _ => {}
        }
    }

    fn set_item(&self, item_id: ItemId, progress: f64) {
        if let Some(tx) = lock(&self.items).get(&item_id) {
            tx.send_replace(progress);
        }
    }

    fn set_group(&self, group_id: GroupId, progress: f64) {
        if let Some(tx) = lock(&self.groups).get(&group_id) {
            tx.send_replace(progress);
        }
    }
}

/// Where watchers are re-read from after the pump missed events.
struct Sources {
    store: Store,
    coordinator: Arc<Coordinator>,
    aggregator: Arc<ProgressAggregator>,
}

/// Highest accepted progress for active items, the ledger's otherwise.
async fn progress_now(coordinator: &Coordinator, store: &Store, id: ItemId) -> Result<f64> {
    if let Some(p) = coordinator.progress_of(id) {
        return Ok(p);
    }
    let record = store
        .get_record(id)
        .await
        .map_err(TransferError::persistence)?;
    Ok(record.map(|r| r.progress).unwrap_or(0.0))
}

/// Reset every registered watcher from current state.
async fn resync(watchers: &Watchers, sources: &Sources) {
    let states: Vec<ItemId> = lock(&watchers.states).keys().copied().collect();
    for id in states {
        match sources.coordinator.state_of(id).await {
            Ok(state) => watchers.set_state(id, state),
            Err(e) => tracing::warn!(item_id = %id, "could not refresh state watcher: {}", e),
        }
    }
    let items: Vec<ItemId> = lock(&watchers.items).keys().copied().collect();
    for id in items {
        match progress_now(&sources.coordinator, &sources.store, id).await {
            Ok(p) => watchers.set_item(id, p),
            Err(e) => tracing::warn!(item_id = %id, "could not refresh progress watcher: {}", e),
        }
    }
    let groups: Vec<GroupId> = lock(&watchers.groups).keys().copied().collect();
    for group in groups {
        if let Some(p) = sources.aggregator.group_progress(group) {
            watchers.set_group(group, p);
        }
    }
}

async fn pump(
    watchers: Arc<Watchers>,
    sources: Sources,
    mut transfers: broadcast::Receiver<TransferEvent>,
    mut progress: broadcast::Receiver<ProgressEvent>,
) {
    loop {
        tokio::select! {
            ev = transfers.recv() => match ev {
                Ok(TransferEvent::StateChanged { item_id, state }) => watchers.set_state(item_id, state),
                Ok(TransferEvent::Progress { item_id, progress }) => watchers.set_item(item_id, progress),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "state watchers fell behind, resyncing");
                    resync(&watchers, &sources).await;
                }
                Err(RecvError::Closed) => break,
            },
            ev = progress.recv() => match ev {
                Ok(ProgressEvent::Item { item_id, progress }) => watchers.set_item(item_id, progress),
                Ok(ProgressEvent::Group { group_id, progress }) => watchers.set_group(group_id, progress),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "progress watchers fell behind, resyncing");
                    resync(&watchers, &sources).await;
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    tracing::debug!("watch pump stopped");
}

pub struct DownloadService {
    store: Store,
    coordinator: Arc<Coordinator>,
    aggregator: Arc<ProgressAggregator>,
    reconciler: Reconciler,
    default_extension: String,
    watchers: Arc<Watchers>,
    pump: OnceLock<JoinHandle<()>>,
}

impl Drop for DownloadService {
    fn drop(&mut self) {
        if let Some(task) = self.pump.get() {
            task.abort();
        }
    }
}

impl DownloadService {
    pub fn new(
        store: Store,
        coordinator: Arc<Coordinator>,
        aggregator: Arc<ProgressAggregator>,
        reconciler: Reconciler,
        default_extension: impl Into<String>,
    ) -> Self {
        Self {
            store,
            coordinator,
            aggregator,
            reconciler,
            default_extension: default_extension.into(),
            watchers: Arc::default(),
            pump: OnceLock::new(),
        }
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    async fn catalog_item(&self, id: ItemId) -> Result<CatalogItem> {
        self.store
            .get_item(id)
            .await
            .map_err(TransferError::persistence)?
            .ok_or_else(|| TransferError::Unknown(format!("item {id} is not in the catalog")))
    }

    async fn group_items(&self, group: GroupId) -> Result<Vec<CatalogItem>> {
        self.store
            .list_group(group)
            .await
            .map_err(TransferError::persistence)
    }

    /// Item extension, else the one in the URL path, else the configured default.
    fn extension_for(&self, item: &CatalogItem) -> String {
        let own = item.extension.trim().trim_start_matches('.');
        if !own.is_empty() {
            return own.to_string();
        }
        let from_url = Url::parse(&item.source_url).ok().and_then(|url| {
            let last = url.path_segments()?.last()?.to_string();
            split_extension(&last).1.map(str::to_string)
        });
        from_url.unwrap_or_else(|| self.default_extension.clone())
    }

    pub async fn download_item(&self, id: ItemId) -> Result<()> {
        let item = self.catalog_item(id).await?;
        let extension = self.extension_for(&item);
        if !self.coordinator.is_active(id) {
            self.aggregator.begin_tracking(id, item.group_id);
        }
        self.coordinator
            .start(id, &item.source_url, &item.title, &extension)
            .await
    }

    /// Start every item of the group that is not already completed. Every
    /// item is attempted; the error only says how many could not start.
    pub async fn download_group(&self, group: GroupId) -> Result<()> {
        let items = self.group_items(group).await?;
        tracing::info!(group_id = %group, items = items.len(), "starting group download");
        let mut failed = 0usize;
        for item in items {
            if item.cached_state == TransferState::Completed {
                // Still counts toward the group mean.
                self.aggregator.begin_tracking(item.id, item.group_id);
                self.aggregator.update(item.id, 1.0);
                continue;
            }
            if let Err(e) = self.download_item(item.id).await {
                tracing::error!(item_id = %item.id, "could not start: {}", e);
                failed += 1;
            }
        }
        if failed > 0 {
            return Err(TransferError::Unknown(format!(
                "failed to start {failed} items"
            )));
        }
        Ok(())
    }

    pub async fn pause_group(&self, group: GroupId) -> Result<()> {
        for item in self.group_items(group).await? {
            if !self.coordinator.is_active(item.id) {
                continue;
            }
            if let Err(e) = self.coordinator.pause(item.id).await {
                tracing::warn!(item_id = %item.id, "pause failed: {}", e);
            }
        }
        Ok(())
    }

    pub async fn resume_group(&self, group: GroupId) -> Result<()> {
        for item in self.group_items(group).await? {
            if self.coordinator.state_of(item.id).await? != TransferState::Paused {
                continue;
            }
            if let Err(e) = self.coordinator.resume(item.id).await {
                tracing::warn!(item_id = %item.id, "resume failed: {}", e);
            }
        }
        Ok(())
    }

    pub async fn cancel_group(&self, group: GroupId) -> Result<()> {
        for item in self.group_items(group).await? {
            if !self.coordinator.is_active(item.id) {
                continue;
            }
            if let Err(e) = self.coordinator.cancel(item.id).await {
                tracing::warn!(item_id = %item.id, "cancel failed: {}", e);
            }
        }
        Ok(())
    }

    pub async fn pause_item(&self, id: ItemId) -> Result<()> {
        self.coordinator.pause(id).await
    }

    pub async fn resume_item(&self, id: ItemId) -> Result<()> {
        self.coordinator.resume(id).await
    }

    pub async fn cancel_item(&self, id: ItemId) -> Result<()> {
        self.coordinator.cancel(id).await
    }

    /// Delete the item's files and drop it from its group's progress mean.
    pub async fn delete_item(&self, id: ItemId) -> Result<()> {
        self.coordinator.delete(id).await?;
        self.aggregator.stop_tracking(id);
        Ok(())
    }

    fn ensure_pump(&self) {
        self.pump.get_or_init(|| {
            let sources = Sources {
                store: self.store.clone(),
                coordinator: Arc::clone(&self.coordinator),
                aggregator: Arc::clone(&self.aggregator),
            };
            tokio::spawn(pump(
                Arc::clone(&self.watchers),
                sources,
                self.coordinator.subscribe(),
                self.aggregator.subscribe(),
            ))
        });
    }

    /// Live state of one item, seeded from the coordinator or the ledger.
    pub async fn item_state(&self, id: ItemId) -> Result<watch::Receiver<TransferState>> {
        self.ensure_pump();
        if let Some(tx) = lock(&self.watchers.states).get(&id) {
            return Ok(tx.subscribe());
        }
        let seed = self.coordinator.state_of(id).await?;
        let mut states = lock(&self.watchers.states);
        Ok(states
            .entry(id)
            .or_insert_with(|| watch::channel(seed).0)
            .subscribe())
    }

    /// Live progress of one item.
    pub async fn item_progress(&self, id: ItemId) -> Result<watch::Receiver<f64>> {
        self.ensure_pump();
        if let Some(tx) = lock(&self.watchers.items).get(&id) {
            return Ok(tx.subscribe());
        }
        let seed = self.current_progress(id).await?;
        let mut items = lock(&self.watchers.items);
        Ok(items
            .entry(id)
            .or_insert_with(|| watch::channel(seed).0)
            .subscribe())
    }

    /// Live mean progress of a group.
    pub async fn group_progress(&self, group: GroupId) -> Result<watch::Receiver<f64>> {
        self.ensure_pump();
        if let Some(tx) = lock(&self.watchers.groups).get(&group) {
            return Ok(tx.subscribe());
        }
        let items = self.group_items(group).await?;
        let mut sum = 0.0;
        for item in &items {
            sum += self.current_progress(item.id).await?;
        }
        let seed = if items.is_empty() {
            0.0
        } else {
            sum / items.len() as f64
        };
        let mut groups = lock(&self.watchers.groups);
        Ok(groups
            .entry(group)
            .or_insert_with(|| watch::channel(seed).0)
            .subscribe())
    }

    async fn current_progress(&self, id: ItemId) -> Result<f64> {
        progress_now(&self.coordinator, &self.store, id).await
    }

    /// Repair drift for every item that is not transferring right now.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        self.reconciler.run(self.coordinator.as_ref()).await
    }
}

#[cfg(test)]
mod tests;
