//! `cdm add <url> --title <t>` – register an item in the catalog.

use anyhow::{Context, Result};
use cdm_core::store::NewCatalogItem;
use cdm_core::{GroupId, ItemId};

use crate::cli::engine::Engine;

pub async fn run_add(
    engine: &Engine,
    url: &str,
    title: &str,
    group: Option<GroupId>,
    ext: Option<&str>,
) -> Result<()> {
    url::Url::parse(url).with_context(|| format!("invalid URL {url:?}"))?;
    let item = NewCatalogItem {
        id: ItemId::new(),
        group_id: group,
        title: title.to_string(),
        source_url: url.to_string(),
        extension: ext.unwrap_or_default().trim_start_matches('.').to_string(),
    };
    engine.store.add_item(&item).await?;
    println!("Added item {} ({title})", item.id);
    Ok(())
}
