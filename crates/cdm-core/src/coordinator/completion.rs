//! Terminal backend events: materialize finished transfers, record failures.

use std::path::{Path, PathBuf};

use super::queue::parse_completion_tag;
use super::{BackendEvent, Coordinator, TransferEvent};
use crate::error::{BackendError, Result, TransferError};
use crate::model::{ItemId, TransferState};
use crate::storage::destination_file_name;
use crate::store::TransferRecord;

impl Coordinator {
    pub(super) async fn on_backend_event(&self, event: BackendEvent) {
        match event {
            BackendEvent::Finished { tag, location } => match parse_completion_tag(&tag) {
                Some((item_id, attempt)) => {
                    let _guard = self.locks.lock(item_id).await;
                    self.complete_locked(item_id, attempt, &location).await;
                }
                None => {
                    tracing::warn!(tag = %tag, "completion with unrecognized tag");
                    self.discard_transient(&location).await;
                }
            },
            BackendEvent::Failed { tag, error } => match parse_completion_tag(&tag) {
                Some((item_id, attempt)) => {
                    let _guard = self.locks.lock(item_id).await;
                    self.fail_locked(item_id, attempt, error).await;
                }
                None => tracing::warn!(tag = %tag, error = ?error, "failure with unrecognized tag"),
            },
        }
    }

    /// Move the transient file to its permanent place and mark the item completed.
    pub(super) async fn complete_locked(&self, item_id: ItemId, attempt: u64, transient: &Path) {
        let Some(snapshot) = self.active.snapshot_attempt(item_id, attempt) else {
            tracing::warn!(item_id = %item_id, attempt, "completion for an item with no active transfer");
            self.discard_transient(transient).await;
            return;
        };

        match self
            .materialize(item_id, &snapshot.display_name, &snapshot.extension, transient)
            .await
        {
            Ok(final_location) => {
                self.commit_logged(&TransferRecord::completed(item_id, final_location.clone()))
                    .await;
                self.track(item_id, 1.0);
                self.publish(TransferEvent::Progress {
                    item_id,
                    progress: 1.0,
                });
                self.publish_state(item_id, TransferState::Completed);
                self.active.remove_attempt(item_id, attempt);
                tracing::info!(item_id = %item_id, path = %final_location.display(), "transfer completed");
                if let Some(old) = snapshot.replaces.filter(|p| *p != final_location) {
                    self.remove_replaced(item_id, &old).await;
                }
            }
            Err(e) => {
                tracing::error!(item_id = %item_id, "could not materialize download: {}", e);
                self.active.remove_attempt(item_id, attempt);
                self.mark_failed(item_id, snapshot.last_progress).await;
                self.discard_transient(transient).await;
            }
        }
    }

    /// `<root>/<item_id>/<sanitized name>.<ext>`, numbered on collision.
    async fn materialize(
        &self,
        item_id: ItemId,
        display_name: &str,
        extension: &str,
        transient: &Path,
    ) -> Result<PathBuf> {
        let dir = self.storage.downloads_root().join(item_id.to_string());
        self.storage
            .create_directory(&dir, true)
            .await
            .map_err(|e| TransferError::file_op("create directory", &dir, e))?;

        let base_name = destination_file_name(display_name, extension);
        let name = self.storage.unique_name(&base_name, &dir).await;
        let destination = dir.join(name);
        self.storage
            .move_item(transient, &destination)
            .await
            .map_err(|e| TransferError::file_op("move", transient, e))?;
        Ok(destination)
    }

    async fn fail_locked(&self, item_id: ItemId, attempt: u64, error: Option<BackendError>) {
        match error {
            Some(BackendError::Cancelled) => {
                tracing::debug!(item_id = %item_id, attempt, "backend reported cancellation");
                // Still registered only if the backend cancelled on its own.
                if self.active.remove_attempt(item_id, attempt).is_some() {
                    self.clear_logged(item_id).await;
                    self.track(item_id, 0.0);
                    self.publish_state(item_id, TransferState::NotStarted);
                }
            }
            other => {
                let Some(entry) = self.active.remove_attempt(item_id, attempt) else {
                    tracing::debug!(item_id = %item_id, attempt, "failure for a stale attempt ignored");
                    return;
                };
                let progress = entry.last_progress;
                drop(entry);
                match other {
                    Some(e) => tracing::warn!(item_id = %item_id, "transfer failed: {}", e),
                    None => tracing::warn!(item_id = %item_id, "transfer failed without a reason"),
                }
                self.mark_failed(item_id, progress).await;
            }
        }
    }

    pub(super) async fn mark_failed(&self, item_id: ItemId, progress: f64) {
        self.commit_logged(&TransferRecord::new(
            item_id,
            TransferState::Failed,
            progress,
        ))
        .await;
        self.publish_state(item_id, TransferState::Failed);
    }

    /// Drop the file of the download this attempt superseded.
    async fn remove_replaced(&self, item_id: ItemId, old: &Path) {
        if !self.storage.exists(old).await {
            return;
        }
        match self.storage.remove(old).await {
            Ok(()) => tracing::debug!(item_id = %item_id, path = %old.display(), "removed superseded download"),
            Err(e) => {
                tracing::warn!(item_id = %item_id, path = %old.display(), "could not remove superseded download: {}", e)
            }
        }
    }

    async fn discard_transient(&self, location: &Path) {
        if !self.storage.exists(location).await {
            return;
        }
        if let Err(e) = self.storage.remove(location).await {
            tracing::warn!(path = %location.display(), "could not remove transient file: {}", e);
        }
    }
}
