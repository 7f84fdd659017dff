//! CLI for the CDM course download manager.

mod commands;
mod engine;

use anyhow::Result;
use cdm_core::config;
use cdm_core::{GroupId, ItemId};
use clap::{Parser, Subcommand};
use clap_complete::Shell;

use commands::{
    run_add, run_completions, run_delete, run_fetch, run_man, run_reconcile, run_status,
};
use engine::Engine;

/// Top-level CLI for the CDM course download manager.
#[derive(Debug, Parser)]
#[command(name = "cdm", version)]
#[command(about = "CDM: resumable course download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Add an item to the catalog.
    Add {
        /// Direct HTTP/HTTPS URL of the asset.
        url: String,

        /// Display name; also the downloaded file's name.
        #[arg(long)]
        title: String,

        /// Group (course) the item belongs to.
        #[arg(long, value_name = "UUID")]
        group: Option<GroupId>,

        /// File extension, without the dot. Taken from the URL when omitted.
        #[arg(long)]
        ext: Option<String>,
    },

    /// Show every catalogued item with its download state.
    Status {
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Download items (or a whole group) and wait for them. Ctrl-C cancels.
    Fetch {
        /// Item identifiers.
        #[arg(required_unless_present = "group", conflicts_with = "group")]
        items: Vec<ItemId>,

        /// Download every item of this group instead.
        #[arg(long, value_name = "UUID")]
        group: Option<GroupId>,
    },

    /// Delete an item's downloaded files and reset it to not started.
    Delete {
        /// Item identifier.
        item: ItemId,
    },

    /// Repair ledger and catalog drift, then print what was done.
    Reconcile {
        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },

    /// Generate the man page.
    Man,
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        // These never touch config or the database.
        match &cli.command {
            CliCommand::Completions { shell } => return run_completions(*shell),
            CliCommand::Man => return run_man(),
            _ => {}
        }

        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);
        let engine = Engine::open(&cfg).await?;

        match cli.command {
            CliCommand::Add {
                url,
                title,
                group,
                ext,
            } => run_add(&engine, &url, &title, group, ext.as_deref()).await?,
            CliCommand::Status { json } => run_status(&engine, json).await?,
            CliCommand::Fetch { items, group } => run_fetch(&engine, items, group).await?,
            CliCommand::Delete { item } => run_delete(&engine, item).await?,
            CliCommand::Reconcile { json } => run_reconcile(&engine, json)?,
            CliCommand::Completions { .. } | CliCommand::Man => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
