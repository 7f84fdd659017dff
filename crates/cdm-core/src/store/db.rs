//! SQLite-backed store: connection, migrations, and row helpers.
//! Ledger and catalog CRUD live in `ledger` and `catalog`.

use anyhow::{Context, Result};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::model::{GroupId, ItemId};

/// Percent-encode a path for use in a sqlite:// URI so spaces and special chars don't break parsing.
fn path_to_sqlite_uri(path: &Path) -> String {
    let s = path.to_string_lossy();
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '%' => out.push_str("%25"),
            ' ' => out.push_str("%20"),
            '#' => out.push_str("%23"),
            '?' => out.push_str("%3F"),
            '&' => out.push_str("%26"),
            c => out.push(c),
        }
    }
    format!("sqlite://{}", out)
}

/// Handle to the SQLite database holding the transfer ledger and the catalog.
///
/// The database file is stored under the XDG state directory:
/// `~/.local/state/cdm/cdm.db` on Debian.
#[derive(Clone)]
pub struct Store {
    pub(crate) pool: Pool<Sqlite>,
}

impl Store {
    /// Open (or create) the default database and run migrations.
    pub async fn open_default() -> Result<Self> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("cdm")?;
        let state_dir = xdg_dirs.get_state_home().join("cdm");
        Self::open_at(state_dir.join("cdm.db")).await
    }

    /// Open (or create) the database at a specific path. Creates parent dirs if needed.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create state dir {}", parent.display()))?;
        }
        let uri = path_to_sqlite_uri(path) + "?mode=rwc";
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(&uri)
            .await
            .with_context(|| format!("open database {}", path.display()))?;
        let store = Store { pool };
        store.migrate().await?;
        tracing::debug!(path = %path.display(), "store opened");
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        // WAL keeps a committed transaction intact across a crash mid-write.
        sqlx::query("PRAGMA journal_mode = WAL;")
            .execute(&self.pool)
            .await?;

        // - `transfer_records` is the ledger: one row per item that left not_started.
        // - `catalog_items.cached_*` mirror the ledger for readers that only see the catalog.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transfer_records (
                item_id TEXT PRIMARY KEY NOT NULL,
                state TEXT NOT NULL,
                progress REAL NOT NULL DEFAULT 0.0,
                final_location TEXT,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS catalog_items (
                id TEXT PRIMARY KEY NOT NULL,
                group_id TEXT,
                title TEXT NOT NULL,
                source_url TEXT NOT NULL,
                extension TEXT NOT NULL DEFAULT '',
                cached_state TEXT NOT NULL DEFAULT 'not_started',
                cached_progress REAL NOT NULL DEFAULT 0.0,
                local_path TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS catalog_items_group
            ON catalog_items (group_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Current time as Unix seconds (for DB timestamps).
pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

pub(super) fn parse_item_id(s: &str) -> Result<ItemId> {
    s.parse()
        .with_context(|| format!("malformed item id in database: {s:?}"))
}

pub(super) fn parse_group_id(s: &str) -> Result<GroupId> {
    s.parse()
        .with_context(|| format!("malformed group id in database: {s:?}"))
}

#[cfg(test)]
/// Open an in-memory database for tests (no disk I/O).
pub(crate) async fn open_memory() -> Result<Store> {
    // Single connection so the pool never hands back a different empty DB.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    let store = Store { pool };
    store.migrate().await?;
    Ok(store)
}
