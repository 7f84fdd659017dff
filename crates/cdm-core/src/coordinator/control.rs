//! Caller-facing operations: start, pause, resume, cancel, delete.

use std::path::PathBuf;

use url::Url;

use super::active::ActiveTransfer;
use super::queue::{completion_tag, forward_progress};
use super::Coordinator;
use crate::error::{BackendError, Result, TransferError};
use crate::model::{ItemId, TransferState};
use crate::store::TransferRecord;

impl Coordinator {
    /// Start downloading `source_url` for `item_id`.
    ///
    /// A paused transfer is resumed instead; a running one is left alone.
    pub async fn start(
        &self,
        item_id: ItemId,
        source_url: &str,
        display_name: &str,
        extension: &str,
    ) -> Result<()> {
        let _guard = self.locks.lock(item_id).await;

        if let Some(snapshot) = self.active.snapshot(item_id) {
            if snapshot.paused {
                return self.resume_locked(item_id).await;
            }
            tracing::debug!(item_id = %item_id, "start ignored: transfer already running");
            return Ok(());
        }

        let url = Url::parse(source_url)
            .map_err(|e| BackendError::InvalidUrl(format!("{source_url}: {e}")))?;
        let replaces = self
            .store
            .get_record(item_id)
            .await
            .map_err(TransferError::persistence)?
            .filter(|r| r.state == TransferState::Completed)
            .and_then(|r| r.final_location);
        let (mut handle, signal) = self.backend.create_transfer(&url).await?;
        let attempt = self.next_attempt();
        handle.set_completion_tag(completion_tag(item_id, attempt));

        // Persist before the bytes start moving: a failed write leaves nothing running.
        let record = TransferRecord::new(item_id, TransferState::InProgress, 0.0);
        if let Err(e) = self.commit(&record).await {
            handle.cancel();
            return Err(e);
        }

        let forwarder = tokio::spawn(forward_progress(
            signal,
            self.queue.clone(),
            item_id,
            attempt,
        ));
        handle.start();
        self.active.insert(
            item_id,
            ActiveTransfer {
                handle,
                display_name: display_name.to_string(),
                extension: extension.to_string(),
                last_progress: 0.0,
                persisted_progress: 0.0,
                paused: false,
                attempt,
                probe_scheduled: false,
                replaces,
                forwarder,
            },
        );
        self.track(item_id, 0.0);
        tracing::info!(item_id = %item_id, attempt, url = %url, "transfer started");
        self.publish_state(item_id, TransferState::InProgress);
        Ok(())
    }

    pub async fn pause(&self, item_id: ItemId) -> Result<()> {
        let _guard = self.locks.lock(item_id).await;
        let snapshot = self
            .active
            .snapshot(item_id)
            .ok_or(TransferError::NotFound(item_id))?;
        if snapshot.paused {
            return Ok(());
        }

        let record = TransferRecord::new(item_id, TransferState::Paused, snapshot.last_progress);
        self.commit(&record).await?;
        self.active.with_entry(item_id, |e| {
            e.handle.suspend();
            e.paused = true;
            e.persisted_progress = e.last_progress;
        });
        tracing::info!(item_id = %item_id, progress = snapshot.last_progress, "transfer paused");
        self.publish_state(item_id, TransferState::Paused);
        Ok(())
    }

    pub async fn resume(&self, item_id: ItemId) -> Result<()> {
        let _guard = self.locks.lock(item_id).await;
        self.resume_locked(item_id).await
    }

    async fn resume_locked(&self, item_id: ItemId) -> Result<()> {
        let snapshot = self
            .active
            .snapshot(item_id)
            .ok_or(TransferError::NotFound(item_id))?;
        if !snapshot.paused {
            return Ok(());
        }

        let record =
            TransferRecord::new(item_id, TransferState::InProgress, snapshot.last_progress);
        self.commit(&record).await?;
        self.active.with_entry(item_id, |e| {
            e.handle.resume();
            e.paused = false;
        });
        self.rearm_probe(item_id);
        tracing::info!(item_id = %item_id, "transfer resumed");
        self.publish_state(item_id, TransferState::InProgress);
        Ok(())
    }

    /// Stop a transfer and forget it. Not an error when nothing is running.
    pub async fn cancel(&self, item_id: ItemId) -> Result<()> {
        let _guard = self.locks.lock(item_id).await;
        self.cancel_locked(item_id).await.map(|_| ())
    }

    /// Returns whether `NotStarted` was published.
    async fn cancel_locked(&self, item_id: ItemId) -> Result<bool> {
        if let Some(entry) = self.active.remove(item_id) {
            entry.handle.cancel();
            drop(entry);
            self.store
                .clear_record(item_id)
                .await
                .map_err(TransferError::persistence)?;
            self.track(item_id, 0.0);
            tracing::info!(item_id = %item_id, "transfer cancelled");
            self.publish_state(item_id, TransferState::NotStarted);
            return Ok(true);
        }

        let record = self
            .store
            .get_record(item_id)
            .await
            .map_err(TransferError::persistence)?;
        match record {
            Some(r) if r.state.is_live() => {
                self.store
                    .clear_record(item_id)
                    .await
                    .map_err(TransferError::persistence)?;
                tracing::info!(item_id = %item_id, stale = %r.state, "cleared stale record on cancel");
                self.publish_state(item_id, TransferState::NotStarted);
                Ok(true)
            }
            _ => {
                tracing::debug!(item_id = %item_id, "cancel: no active transfer");
                Ok(false)
            }
        }
    }

    /// Cancel if running, remove the item's files, and revert it to `NotStarted`.
    ///
    /// When a file cannot be removed the ledger record is kept so the item
    /// still points at what is left on disk.
    pub async fn delete(&self, item_id: ItemId) -> Result<()> {
        let _guard = self.locks.lock(item_id).await;
        let already_published = self.cancel_locked(item_id).await?;

        let item_dir = self.storage.downloads_root().join(item_id.to_string());
        let record = self
            .store
            .get_record(item_id)
            .await
            .map_err(TransferError::persistence)?;
        let mut targets: Vec<PathBuf> = vec![item_dir];
        if let Some(location) = record.and_then(|r| r.final_location) {
            if !location.starts_with(&targets[0]) {
                targets.push(location);
            }
        }

        for path in &targets {
            if !self.storage.exists(path).await {
                continue;
            }
            self.storage
                .remove(path)
                .await
                .map_err(|e| TransferError::file_op("remove", path, e))?;
            tracing::debug!(item_id = %item_id, path = %path.display(), "removed");
        }

        self.store
            .clear_record(item_id)
            .await
            .map_err(TransferError::persistence)?;
        self.track(item_id, 0.0);
        tracing::info!(item_id = %item_id, "item deleted");
        if !already_published {
            self.publish_state(item_id, TransferState::NotStarted);
        }
        Ok(())
    }
}
