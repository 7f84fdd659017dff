//! `cdm fetch` – download items in this process and wait until they settle.

use anyhow::{bail, Result};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::RecvError;

use cdm_core::coordinator::{Coordinator, TransferEvent};
use cdm_core::{GroupId, ItemId, TransferState};

use crate::cli::engine::Engine;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

pub async fn run_fetch(engine: &Engine, items: Vec<ItemId>, group: Option<GroupId>) -> Result<()> {
    let service = &engine.service;
    let coordinator = engine.coordinator();
    let mut events = coordinator.subscribe();

    let targets: Vec<ItemId> = match group {
        Some(g) => {
            if let Err(e) = service.download_group(g).await {
                eprintln!("warning: {e}");
            }
            engine
                .store
                .list_group(g)
                .await?
                .into_iter()
                .map(|i| i.id)
                .collect()
        }
        None => {
            for id in &items {
                if let Err(e) = service.download_item(*id).await {
                    eprintln!("could not start {id}: {e}");
                }
            }
            items
        }
    };

    let mut pending: HashSet<ItemId> = targets
        .into_iter()
        .filter(|id| coordinator.is_active(*id))
        .collect();
    if pending.is_empty() {
        println!("Nothing to download.");
        return Ok(());
    }
    println!("Downloading {} item(s). Press Ctrl-C to cancel.", pending.len());

    let mut failed = 0usize;
    let mut last_print: Option<Instant> = None;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    while !pending.is_empty() {
        tokio::select! {
            _ = &mut ctrl_c => {
                println!("\nCancelling {} transfer(s)...", pending.len());
                for id in pending.drain() {
                    if let Err(e) = service.cancel_item(id).await {
                        tracing::warn!(item_id = %id, "cancel failed: {}", e);
                    }
                }
                bail!("interrupted");
            }
            ev = events.recv() => match ev {
                Ok(TransferEvent::Progress { item_id, progress }) if pending.contains(&item_id) => {
                    let due = last_print.map_or(true, |t| t.elapsed() >= PROGRESS_INTERVAL);
                    if due || progress >= 1.0 {
                        println!("  {item_id}  {:5.1}%", progress * 100.0);
                        last_print = Some(Instant::now());
                    }
                }
                Ok(TransferEvent::StateChanged { item_id, state }) if pending.contains(&item_id) => {
                    if settle(&mut pending, item_id, state) {
                        failed += 1;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "progress display fell behind, rechecking items");
                    failed += resync_pending(coordinator, &mut pending).await?;
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    if failed > 0 {
        bail!("{failed} item(s) failed; see `cdm status`");
    }
    Ok(())
}

/// Drop `item_id` from `pending` once `state` is terminal. True if it failed.
fn settle(pending: &mut HashSet<ItemId>, item_id: ItemId, state: TransferState) -> bool {
    match state {
        TransferState::Completed => println!("  {item_id}  done"),
        TransferState::Failed => println!("  {item_id}  failed"),
        TransferState::NotStarted => println!("  {item_id}  cancelled"),
        TransferState::InProgress | TransferState::Paused => return false,
    }
    pending.remove(&item_id);
    state == TransferState::Failed
}

/// Settle every pending item that is no longer transferring, from the ledger.
/// Used after missed events. Returns how many of them failed.
pub(crate) async fn resync_pending(
    coordinator: &Coordinator,
    pending: &mut HashSet<ItemId>,
) -> Result<usize> {
    let idle: Vec<ItemId> = pending
        .iter()
        .copied()
        .filter(|id| !coordinator.is_active(*id))
        .collect();
    let mut failed = 0;
    for id in idle {
        let state = match coordinator.state_of(id).await? {
            // Nothing runs it any more.
            s if s.is_live() => TransferState::NotStarted,
            s => s,
        };
        if settle(pending, id, state) {
            failed += 1;
        }
    }
    Ok(failed)
}
