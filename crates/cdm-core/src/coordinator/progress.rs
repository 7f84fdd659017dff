//! Progress samples and the completion probe.

use super::queue::{completion_tag, schedule_probe};
use super::{Coordinator, TransferEvent};
use crate::backend::ProbeOutcome;
use crate::model::{clamp_progress, ItemId, TransferState};
use crate::store::TransferRecord;

struct Accepted {
    persist: bool,
    schedule_probe: bool,
    state: TransferState,
}

impl Coordinator {
    pub(super) async fn on_progress(&self, item_id: ItemId, attempt: u64, fraction: f64) {
        let _guard = self.locks.lock(item_id).await;
        let value = clamp_progress(fraction);
        let persist_step = self.persist_step;

        let accepted = self
            .active
            .with_entry(item_id, |e| {
                if e.attempt != attempt || value <= e.last_progress {
                    return None;
                }
                e.last_progress = value;
                let persist = value >= 1.0 || value - e.persisted_progress >= persist_step;
                if persist {
                    e.persisted_progress = value;
                }
                let schedule_probe = value >= 1.0 && !e.probe_scheduled;
                if schedule_probe {
                    e.probe_scheduled = true;
                }
                let state = if e.paused {
                    TransferState::Paused
                } else {
                    TransferState::InProgress
                };
                Some(Accepted {
                    persist,
                    schedule_probe,
                    state,
                })
            })
            .flatten();
        let Some(accepted) = accepted else {
            tracing::trace!(item_id = %item_id, attempt, value, "progress sample dropped");
            return;
        };

        if accepted.persist {
            self.commit_logged(&TransferRecord::new(item_id, accepted.state, value))
                .await;
        }
        self.track(item_id, value);
        self.publish(TransferEvent::Progress {
            item_id,
            progress: value,
        });

        if accepted.schedule_probe {
            self.spawn_probe(item_id, attempt);
        }
    }

    fn spawn_probe(&self, item_id: ItemId, attempt: u64) {
        tracing::debug!(item_id = %item_id, attempt, grace = ?self.completion_grace, "reached 100%, scheduling completion probe");
        tokio::spawn(schedule_probe(
            self.queue.clone(),
            item_id,
            attempt,
            self.completion_grace,
        ));
    }

    /// Schedule the probe again for a resumed transfer that was paused at 100%.
    pub(super) fn rearm_probe(&self, item_id: ItemId) {
        let due = self
            .active
            .with_entry(item_id, |e| {
                let due = e.last_progress >= 1.0 && !e.probe_scheduled;
                if due {
                    e.probe_scheduled = true;
                }
                due.then_some(e.attempt)
            })
            .flatten();
        if let Some(attempt) = due {
            self.spawn_probe(item_id, attempt);
        }
    }

    /// Single check for a transfer that reached 100% without reporting completion.
    pub(super) async fn on_probe(&self, item_id: ItemId, attempt: u64) {
        let _guard = self.locks.lock(item_id).await;
        let Some(snapshot) = self.active.snapshot_attempt(item_id, attempt) else {
            tracing::trace!(item_id = %item_id, attempt, "probe skipped: attempt already settled");
            return;
        };
        if snapshot.paused {
            // A suspended transfer cannot report; resume schedules the probe again.
            self.active.with_entry(item_id, |e| e.probe_scheduled = false);
            tracing::debug!(item_id = %item_id, attempt, "probe deferred: transfer is paused");
            return;
        }

        let tag = completion_tag(item_id, attempt);
        let outcome = match self.backend.probe_completed(&tag).await {
            ProbeOutcome::Finished(path) if self.storage.exists(&path).await => {
                ProbeOutcome::Finished(path)
            }
            ProbeOutcome::Finished(_) => ProbeOutcome::Stopped,
            other => other,
        };
        match outcome {
            ProbeOutcome::Finished(path) => {
                tracing::info!(item_id = %item_id, path = %path.display(), "probe found an unreported completion");
                self.complete_locked(item_id, attempt, &path).await;
            }
            ProbeOutcome::Running => {
                tracing::info!(item_id = %item_id, attempt, "transfer at 100% is still running, waiting for it to report");
            }
            ProbeOutcome::Stopped => {
                tracing::warn!(item_id = %item_id, attempt, "transfer stuck at 100% without completion, marking failed");
                if let Some(entry) = self.active.remove_attempt(item_id, attempt) {
                    entry.handle.cancel();
                }
                self.mark_failed(item_id, 1.0).await;
            }
        }
    }
}
