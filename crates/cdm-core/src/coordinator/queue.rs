//! Event queue drained by the coordinator.
//!
//! Backends push completion/failure events; the coordinator itself pushes
//! progress samples (forwarded from each handle's watch signal) and delayed
//! probe requests. One queue keeps per-item event order intact.

use std::path::PathBuf;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::error::BackendError;
use crate::model::ItemId;

/// Terminal outcome reported by a transfer backend for one handle.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Bytes are at `location`, valid only until the event has been handled.
    Finished { tag: String, location: PathBuf },
    /// `None` when the backend could not say what went wrong.
    Failed {
        tag: String,
        error: Option<BackendError>,
    },
}

#[derive(Debug)]
pub(crate) enum QueuedEvent {
    Backend(BackendEvent),
    Progress {
        item_id: ItemId,
        attempt: u64,
        fraction: f64,
    },
    ProbeDue {
        item_id: ItemId,
        attempt: u64,
    },
}

/// Producer side of the coordinator's event queue. Never blocks.
#[derive(Debug, Clone)]
pub struct EventSender(mpsc::UnboundedSender<QueuedEvent>);

/// Consumer side; hand it to [`crate::coordinator::Coordinator::run_events`].
#[derive(Debug)]
pub struct EventReceiver(pub(crate) mpsc::UnboundedReceiver<QueuedEvent>);

pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender(tx), EventReceiver(rx))
}

impl EventSender {
    /// Push a backend event. Returns false if the coordinator is gone.
    pub fn send(&self, event: BackendEvent) -> bool {
        self.0.send(QueuedEvent::Backend(event)).is_ok()
    }

    pub(crate) fn push(&self, event: QueuedEvent) -> bool {
        self.0.send(event).is_ok()
    }
}

impl EventReceiver {
    pub(crate) async fn recv(&mut self) -> Option<QueuedEvent> {
        self.0.recv().await
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<QueuedEvent> {
        self.0.try_recv().ok()
    }
}

/// Completion tag handed to the backend: `<item_id>:<attempt>`.
pub(crate) fn completion_tag(item_id: ItemId, attempt: u64) -> String {
    format!("{item_id}:{attempt}")
}

pub(crate) fn parse_completion_tag(tag: &str) -> Option<(ItemId, u64)> {
    let (id, attempt) = tag.split_once(':')?;
    Some((id.parse().ok()?, attempt.parse().ok()?))
}

/// Forward every change of a handle's progress signal into the queue until the
/// signal closes or the coordinator stops listening.
pub(crate) async fn forward_progress(
    mut progress: watch::Receiver<f64>,
    queue: EventSender,
    item_id: ItemId,
    attempt: u64,
) {
    while progress.changed().await.is_ok() {
        let fraction = *progress.borrow_and_update();
        if !queue.push(QueuedEvent::Progress {
            item_id,
            attempt,
            fraction,
        }) {
            break;
        }
    }
}

/// Ask for a single probe of `item_id` after `delay`.
pub(crate) async fn schedule_probe(
    queue: EventSender,
    item_id: ItemId,
    attempt: u64,
    delay: Duration,
) {
    tokio::time::sleep(delay).await;
    queue.push(QueuedEvent::ProbeDue { item_id, attempt });
}
