//! Catalog operations: register items, list them (all or per group), and
//! overwrite the cached download state.

use anyhow::Result;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::path::{Path, PathBuf};

use super::db::{parse_group_id, parse_item_id, unix_timestamp, Store};
use super::ledger::mirror_in;
use super::types::{CatalogItem, NewCatalogItem};
use crate::model::{GroupId, ItemId, TransferState};

const SELECT_ITEMS: &str = r#"
    SELECT id, group_id, title, source_url, extension,
           cached_state, cached_progress, local_path, updated_at
    FROM catalog_items
"#;

fn item_from_row(row: &SqliteRow) -> Result<CatalogItem> {
    let id: String = row.get("id");
    let group_id: Option<String> = row.get("group_id");
    let cached_state: String = row.get("cached_state");
    let local_path: Option<String> = row.get("local_path");
    Ok(CatalogItem {
        id: parse_item_id(&id)?,
        group_id: group_id.as_deref().map(parse_group_id).transpose()?,
        title: row.get("title"),
        source_url: row.get("source_url"),
        extension: row.get("extension"),
        cached_state: TransferState::from_str(&cached_state),
        cached_progress: row.get("cached_progress"),
        local_path: local_path.filter(|s| !s.is_empty()).map(PathBuf::from),
        updated_at: row.get("updated_at"),
    })
}

impl Store {
    /// Register an item in `NotStarted`. Re-adding an existing id updates its
    /// descriptive fields and keeps the cached state.
    pub async fn add_item(&self, item: &NewCatalogItem) -> Result<()> {
        let now = unix_timestamp();
        sqlx::query(
            r#"
            INSERT INTO catalog_items (
                id, group_id, title, source_url, extension,
                cached_state, cached_progress, local_path, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 'not_started', 0.0, NULL, ?6, ?6)
            ON CONFLICT (id) DO UPDATE
            SET group_id = excluded.group_id,
                title = excluded.title,
                source_url = excluded.source_url,
                extension = excluded.extension,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(item.id.to_string())
        .bind(item.group_id.map(|g| g.to_string()))
        .bind(&item.title)
        .bind(&item.source_url)
        .bind(&item.extension)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_item(&self, id: ItemId) -> Result<Option<CatalogItem>> {
        let row = sqlx::query(&format!("{SELECT_ITEMS} WHERE id = ?1"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    /// All catalogued items, oldest first.
    pub async fn list_items(&self) -> Result<Vec<CatalogItem>> {
        let rows = sqlx::query(&format!("{SELECT_ITEMS} ORDER BY created_at ASC, id ASC"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(item_from_row).collect()
    }

    /// Items belonging to one group, oldest first.
    pub async fn list_group(&self, group: GroupId) -> Result<Vec<CatalogItem>> {
        let rows = sqlx::query(&format!(
            "{SELECT_ITEMS} WHERE group_id = ?1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(group.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(item_from_row).collect()
    }

    /// Overwrite the cached state of one item without touching the ledger.
    pub async fn set_cached_state(
        &self,
        id: ItemId,
        state: TransferState,
        progress: f64,
        local_path: Option<&Path>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        mirror_in(
            &mut tx,
            id,
            state,
            progress,
            local_path.map(|p| p.to_string_lossy().into_owned()),
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }
}
