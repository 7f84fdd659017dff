//! `cdm status` – show every catalogued item and its download state.

use anyhow::Result;
use serde::Serialize;
use std::path::PathBuf;

use cdm_core::{GroupId, ItemId, TransferState};

use crate::cli::engine::Engine;

#[derive(Debug, Serialize)]
struct StatusRow {
    id: ItemId,
    group_id: Option<GroupId>,
    title: String,
    state: TransferState,
    progress: f64,
    local_path: Option<PathBuf>,
    source_url: String,
}

pub async fn run_status(engine: &Engine, json: bool) -> Result<()> {
    let items = engine.store.list_items().await?;
    let rows: Vec<StatusRow> = items
        .into_iter()
        .map(|i| StatusRow {
            id: i.id,
            group_id: i.group_id,
            title: i.title,
            state: i.cached_state,
            progress: i.cached_progress,
            local_path: i.local_path,
            source_url: i.source_url,
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("No items in catalog.");
        return Ok(());
    }
    println!("{:<36}  {:<11}  {:>6}  {}", "ID", "STATE", "DONE", "TITLE");
    for r in rows {
        println!(
            "{:<36}  {:<11}  {:>5.1}%  {}",
            r.id.to_string(),
            r.state.as_str(),
            r.progress * 100.0,
            r.title
        );
        if let Some(path) = r.local_path {
            println!("{:<36}  -> {}", "", path.display());
        }
    }
    Ok(())
}
