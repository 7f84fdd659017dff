//! `cdm delete <item>` – remove downloaded files and reset the item.

use anyhow::Result;
use cdm_core::ItemId;

use crate::cli::engine::Engine;

pub async fn run_delete(engine: &Engine, item: ItemId) -> Result<()> {
    engine.service.delete_item(item).await?;
    println!("Deleted downloads for {item}");
    Ok(())
}
