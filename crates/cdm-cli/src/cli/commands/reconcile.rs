//! `cdm reconcile` – report the repair pass that runs when the database is opened.

use anyhow::Result;

use crate::cli::engine::Engine;

pub fn run_reconcile(engine: &Engine, json: bool) -> Result<()> {
    let report = engine.startup;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "Examined {} item(s): {} repaired, {} failed.",
            report.examined, report.repaired, report.failed
        );
    }
    Ok(())
}
