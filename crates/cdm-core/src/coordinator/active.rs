//! In-memory table of live transfers.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::task::JoinHandle;

use crate::backend::TransferHandle;
use crate::model::{ItemId, TransferState};

pub(super) struct ActiveTransfer {
    pub handle: Box<dyn TransferHandle>,
    pub display_name: String,
    pub extension: String,
    /// Highest progress accepted for this attempt.
    pub last_progress: f64,
    /// Progress last written to the ledger.
    pub persisted_progress: f64,
    pub paused: bool,
    pub attempt: u64,
    pub probe_scheduled: bool,
    /// File of an earlier completed download, replaced once this attempt lands.
    pub replaces: Option<PathBuf>,
    /// Task copying the handle's progress signal into the event queue.
    pub forwarder: JoinHandle<()>,
}

impl Drop for ActiveTransfer {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}

/// Copy of the fields handlers need after releasing the table lock.
#[derive(Debug, Clone)]
pub(super) struct Snapshot {
    pub display_name: String,
    pub extension: String,
    pub last_progress: f64,
    pub paused: bool,
    pub attempt: u64,
    pub replaces: Option<PathBuf>,
}

impl Snapshot {
    pub fn state(&self) -> TransferState {
        if self.paused {
            TransferState::Paused
        } else {
            TransferState::InProgress
        }
    }
}

#[derive(Default)]
pub(super) struct ActiveTable(Mutex<HashMap<ItemId, ActiveTransfer>>);

impl ActiveTable {
    fn map(&self) -> MutexGuard<'_, HashMap<ItemId, ActiveTransfer>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, item_id: ItemId, entry: ActiveTransfer) {
        if self.map().insert(item_id, entry).is_some() {
            tracing::warn!(item_id = %item_id, "replaced an existing active transfer");
        }
    }

    pub fn remove(&self, item_id: ItemId) -> Option<ActiveTransfer> {
        self.map().remove(&item_id)
    }

    /// Remove the entry only if it belongs to `attempt`.
    pub fn remove_attempt(&self, item_id: ItemId, attempt: u64) -> Option<ActiveTransfer> {
        let mut map = self.map();
        match map.get(&item_id) {
            Some(e) if e.attempt == attempt => map.remove(&item_id),
            _ => None,
        }
    }

    pub fn contains(&self, item_id: ItemId) -> bool {
        self.map().contains_key(&item_id)
    }

    pub fn ids(&self) -> HashSet<ItemId> {
        self.map().keys().copied().collect()
    }

    pub fn snapshot(&self, item_id: ItemId) -> Option<Snapshot> {
        self.map().get(&item_id).map(|e| Snapshot {
            display_name: e.display_name.clone(),
            extension: e.extension.clone(),
            last_progress: e.last_progress,
            paused: e.paused,
            attempt: e.attempt,
            replaces: e.replaces.clone(),
        })
    }

    /// Snapshot of the entry, only if it belongs to `attempt`.
    pub fn snapshot_attempt(&self, item_id: ItemId, attempt: u64) -> Option<Snapshot> {
        self.snapshot(item_id).filter(|s| s.attempt == attempt)
    }

    /// Run `f` on the entry under the table lock. `f` must not block.
    pub fn with_entry<R>(
        &self,
        item_id: ItemId,
        f: impl FnOnce(&mut ActiveTransfer) -> R,
    ) -> Option<R> {
        self.map().get_mut(&item_id).map(f)
    }
}
