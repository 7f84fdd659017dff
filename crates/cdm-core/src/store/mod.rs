//! Persistent transfer ledger and item catalog (SQLite via sqlx).
//!
//! The ledger keeps the last-known state, progress, and final location of every
//! item that has left `NotStarted`. The catalog lists the known items together
//! with a cached copy of that state, which the reconciler keeps honest.

mod catalog;
mod db;
mod ledger;
mod types;

pub use db::Store;
pub use types::{CatalogItem, NewCatalogItem, TransferRecord};

#[cfg(test)]
pub(crate) use db::open_memory;
