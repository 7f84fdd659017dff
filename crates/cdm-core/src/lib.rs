//! Core of the `cdm` course download manager.
//!
//! [`coordinator::Coordinator`] runs transfers through a [`backend::TransferBackend`],
//! records every state change in the SQLite [`store::Store`], and materializes
//! finished files through a [`storage::StorageGateway`]. [`reconcile::Reconciler`]
//! repairs drift on startup; [`service::DownloadService`] adds catalog lookups,
//! group operations and live watchers on top.

pub mod aggregator;
pub mod backend;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logging;
pub mod model;
pub mod reconcile;
pub mod service;
pub mod storage;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{BackendError, TransferError};
pub use model::{GroupId, ItemId, TransferState};
