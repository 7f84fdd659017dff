//! Per-item async guards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::model::ItemId;

#[derive(Default)]
pub(super) struct ItemLocks(Mutex<HashMap<ItemId, Arc<AsyncMutex<()>>>>);

impl ItemLocks {
    /// Wait for exclusive access to `item_id`. Guards for other items are independent.
    pub async fn lock(&self, item_id: ItemId) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            // Drop slots nobody holds or waits on.
            map.retain(|id, m| *id == item_id || Arc::strong_count(m) > 1);
            Arc::clone(map.entry(item_id).or_default())
        };
        slot.lock_owned().await
    }
}
