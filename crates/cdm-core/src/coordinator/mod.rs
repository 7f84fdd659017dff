//! Transfer coordinator: owns every live transfer, drives its state machine,
//! persists each transition, and publishes state and progress events.
//!
//! Public operations (`start`, `pause`, `resume`, `cancel`, `delete`) and the
//! handlers behind [`Coordinator::run_events`] serialize per item through
//! [`ItemLocks`]; different items proceed in parallel. The active table is a
//! plain mutex that is never held across an await.

mod active;
mod completion;
mod control;
mod events;
mod locks;
mod progress;
mod queue;


use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, OwnedMutexGuard};

use crate::aggregator::ProgressAggregator;
use crate::backend::TransferBackend;
use crate::config::CdmConfig;
use crate::error::{Result, TransferError};
use crate::model::{ItemId, TransferState};
use crate::reconcile::LiveItems;
use crate::storage::StorageGateway;
use crate::store::{Store, TransferRecord};

use self::active::ActiveTable;
use self::locks::ItemLocks;
use self::queue::QueuedEvent;

pub use self::events::TransferEvent;
pub use self::queue::{event_channel, BackendEvent, EventReceiver, EventSender};

pub struct Coordinator {
    store: Store,
    storage: Arc<dyn StorageGateway>,
    backend: Arc<dyn TransferBackend>,
    aggregator: Arc<ProgressAggregator>,
    queue: EventSender,
    events: broadcast::Sender<TransferEvent>,
    active: ActiveTable,
    locks: ItemLocks,
    attempts: AtomicU64,
    persist_step: f64,
    completion_grace: Duration,
}

impl Coordinator {
    /// `queue` must be the sender half of the receiver later passed to
    /// [`Coordinator::run_events`]; backends get clones of the same sender.
    pub fn new(
        store: Store,
        storage: Arc<dyn StorageGateway>,
        backend: Arc<dyn TransferBackend>,
        aggregator: Arc<ProgressAggregator>,
        queue: EventSender,
        cfg: &CdmConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(cfg.event_buffer.max(1));
        Self {
            store,
            storage,
            backend,
            aggregator,
            queue,
            events,
            active: ActiveTable::default(),
            locks: ItemLocks::default(),
            attempts: AtomicU64::new(0),
            persist_step: cfg.progress_persist_step.max(0.0),
            completion_grace: cfg.completion_grace(),
        }
    }

    /// State and progress changes, in per-item order. A subscriber that falls
    /// more than `event_buffer` events behind loses the oldest ones.
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.events.subscribe()
    }

    pub fn is_active(&self, item_id: ItemId) -> bool {
        self.active.contains(item_id)
    }

    pub fn list_active(&self) -> HashSet<ItemId> {
        self.active.ids()
    }

    /// Highest progress accepted so far, for active items only.
    pub fn progress_of(&self, item_id: ItemId) -> Option<f64> {
        self.active.snapshot(item_id).map(|s| s.last_progress)
    }

    /// Current state: the live one for active items, else the ledger's.
    pub async fn state_of(&self, item_id: ItemId) -> Result<TransferState> {
        if let Some(snapshot) = self.active.snapshot(item_id) {
            return Ok(snapshot.state());
        }
        let record = self
            .store
            .get_record(item_id)
            .await
            .map_err(TransferError::persistence)?;
        Ok(record.map(|r| r.state).unwrap_or_default())
    }

    /// Drain the event queue until every sender is gone.
    pub async fn run_events(&self, mut rx: EventReceiver) {
        while self.process_next(&mut rx).await {}
        tracing::debug!("coordinator event queue closed");
    }

    /// Handle one queued event. Returns false once the queue is closed.
    pub async fn process_next(&self, rx: &mut EventReceiver) -> bool {
        match rx.recv().await {
            Some(event) => {
                self.dispatch(event).await;
                true
            }
            None => false,
        }
    }

    async fn dispatch(&self, event: QueuedEvent) {
        match event {
            QueuedEvent::Backend(ev) => self.on_backend_event(ev).await,
            QueuedEvent::Progress {
                item_id,
                attempt,
                fraction,
            } => self.on_progress(item_id, attempt, fraction).await,
            QueuedEvent::ProbeDue { item_id, attempt } => self.on_probe(item_id, attempt).await,
        }
    }

    fn next_attempt(&self) -> u64 {
        self.attempts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn publish(&self, event: TransferEvent) {
        // Err only means nobody is subscribed.
        let _ = self.events.send(event);
    }

    pub(crate) fn publish_state(&self, item_id: ItemId, state: TransferState) {
        tracing::debug!(item_id = %item_id, state = %state, "state changed");
        self.publish(TransferEvent::StateChanged { item_id, state });
    }

    /// Forward a value to the aggregator when the item is being tracked there.
    fn track(&self, item_id: ItemId, progress: f64) {
        if self.aggregator.is_tracking(item_id) {
            self.aggregator.update(item_id, progress);
        }
    }

    async fn commit(&self, record: &TransferRecord) -> Result<()> {
        self.store
            .commit_record(record)
            .await
            .map_err(TransferError::persistence)
    }

    /// Commit from an event handler: there is no caller to return to, so a
    /// failed write is logged and the event is still published.
    async fn commit_logged(&self, record: &TransferRecord) {
        if let Err(e) = self.commit(record).await {
            tracing::error!(item_id = %record.item_id, state = %record.state, "ledger write failed: {}", e);
        }
    }

    async fn clear_logged(&self, item_id: ItemId) {
        if let Err(e) = self.store.clear_record(item_id).await {
            tracing::error!(item_id = %item_id, "ledger clear failed: {:#}", e);
        }
    }
}

/// Repairs run under the item's operation lock, so a transfer cannot start
/// between the liveness check and the ledger write.
#[async_trait]
impl LiveItems for Coordinator {
    type Guard = OwnedMutexGuard<()>;

    async fn settle(&self, item_id: ItemId) -> Option<Self::Guard> {
        let guard = self.locks.lock(item_id).await;
        (!self.active.contains(item_id)).then_some(guard)
    }
}
