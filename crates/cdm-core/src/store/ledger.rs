//! Ledger operations: get, upsert, delete, scan, and state commits that also
//! refresh the catalog's cached copy.

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use std::path::PathBuf;

use super::db::{parse_item_id, unix_timestamp, Store};
use super::types::TransferRecord;
use crate::model::{ItemId, TransferState};

fn record_from_row(row: &SqliteRow) -> Result<TransferRecord> {
    let item_id: String = row.get("item_id");
    let state: String = row.get("state");
    let final_location: Option<String> = row.get("final_location");
    Ok(TransferRecord {
        item_id: parse_item_id(&item_id)?,
        state: TransferState::from_str(&state),
        progress: row.get("progress"),
        final_location: final_location
            .filter(|s| !s.is_empty())
            .map(PathBuf::from),
        updated_at: row.get("updated_at"),
    })
}

fn location_text(record: &TransferRecord) -> Option<String> {
    record
        .final_location
        .as_ref()
        .map(|p| p.to_string_lossy().into_owned())
}

async fn upsert_in(tx: &mut Transaction<'_, Sqlite>, record: &TransferRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO transfer_records (item_id, state, progress, final_location, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        ON CONFLICT (item_id) DO UPDATE
        SET state = excluded.state,
            progress = excluded.progress,
            final_location = excluded.final_location,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(record.item_id.to_string())
    .bind(record.state.as_str())
    .bind(record.progress)
    .bind(location_text(record))
    .bind(record.updated_at)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn delete_in(tx: &mut Transaction<'_, Sqlite>, id: ItemId) -> Result<bool> {
    let r = sqlx::query(
        r#"
        DELETE FROM transfer_records
        WHERE item_id = ?1
        "#,
    )
    .bind(id.to_string())
    .execute(&mut **tx)
    .await?;
    Ok(r.rows_affected() > 0)
}

/// Mirror a state into the catalog row, if the item is catalogued.
pub(super) async fn mirror_in(
    tx: &mut Transaction<'_, Sqlite>,
    id: ItemId,
    state: TransferState,
    progress: f64,
    local_path: Option<String>,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE catalog_items
        SET cached_state = ?1,
            cached_progress = ?2,
            local_path = ?3,
            updated_at = ?4
        WHERE id = ?5
        "#,
    )
    .bind(state.as_str())
    .bind(progress)
    .bind(local_path)
    .bind(unix_timestamp())
    .bind(id.to_string())
    .execute(&mut **tx)
    .await?;
    Ok(())
}

impl Store {
    /// Fetch the ledger record for one item.
    pub async fn get_record(&self, id: ItemId) -> Result<Option<TransferRecord>> {
        let row = sqlx::query(
            r#"
            SELECT item_id, state, progress, final_location, updated_at
            FROM transfer_records
            WHERE item_id = ?1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Full scan of the ledger, oldest write first.
    pub async fn list_records(&self) -> Result<Vec<TransferRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT item_id, state, progress, final_location, updated_at
            FROM transfer_records
            ORDER BY updated_at ASC, item_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Insert or replace the ledger record only (the catalog cache is left alone).
    pub async fn upsert_record(&self, record: &TransferRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_in(&mut tx, record).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Delete the ledger record only. Returns whether a row existed.
    pub async fn delete_record(&self, id: ItemId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let existed = delete_in(&mut tx, id).await?;
        tx.commit().await?;
        Ok(existed)
    }

    /// Persist a state transition: upsert the record and refresh the catalog cache
    /// in one transaction, so after a crash either both landed or neither did.
    pub async fn commit_record(&self, record: &TransferRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        upsert_in(&mut tx, record)
            .await
            .with_context(|| format!("upsert record for {}", record.item_id))?;
        mirror_in(
            &mut tx,
            record.item_id,
            record.state,
            record.progress,
            location_text(record),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Revert an item to `NotStarted`: delete its record and reset the catalog cache.
    /// Returns whether a ledger row existed.
    pub async fn clear_record(&self, id: ItemId) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let existed = delete_in(&mut tx, id)
            .await
            .with_context(|| format!("delete record for {id}"))?;
        mirror_in(&mut tx, id, TransferState::NotStarted, 0.0, None).await?;
        tx.commit().await?;
        Ok(existed)
    }
}
