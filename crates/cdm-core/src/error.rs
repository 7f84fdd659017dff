//! Error taxonomy returned by the coordinator and the services built on it.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::model::ItemId;

/// Failure reported by a transfer backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The transfer was cancelled on request. Expected outcome of `cancel`, not a failure.
    #[error("transfer cancelled")]
    Cancelled,
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("request failed with HTTP {status}")]
    RequestFailed { status: u32 },
    #[error("no data received")]
    NoData,
    /// Connection, timeout, TLS, or local write failure inside the transport.
    #[error("transport: {0}")]
    Transport(String),
}

impl BackendError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, BackendError::Cancelled)
    }
}

/// Error returned by coordinator operations. Always recoverable; callers decide
/// whether to retry or just report.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("no active transfer for item {0}")]
    NotFound(ItemId),

    #[error("{op} failed for {path:?}: {source}")]
    FileOperationFailed {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("persistence: {0}")]
    Persistence(String),

    #[error("{0}")]
    Unknown(String),
}

impl TransferError {
    pub fn file_op(op: &'static str, path: &Path, source: io::Error) -> Self {
        TransferError::FileOperationFailed {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Wrap a ledger/catalog failure (anyhow from the store layer).
    pub fn persistence(e: anyhow::Error) -> Self {
        TransferError::Persistence(format!("{e:#}"))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransferError::Backend(b) if b.is_cancelled())
    }
}

pub type Result<T, E = TransferError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_distinguishable() {
        assert!(BackendError::Cancelled.is_cancelled());
        assert!(!BackendError::NoData.is_cancelled());
        assert!(TransferError::from(BackendError::Cancelled).is_cancelled());
        assert!(!TransferError::Unknown("x".into()).is_cancelled());
    }

    #[test]
    fn file_op_message_names_path() {
        let e = TransferError::file_op(
            "move",
            Path::new("/tmp/a.bin"),
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        let msg = e.to_string();
        assert!(msg.starts_with("move failed for"));
        assert!(msg.contains("/tmp/a.bin"));
        assert!(msg.contains("gone"));
    }

    #[test]
    fn persistence_keeps_context_chain() {
        let inner = anyhow::anyhow!("disk I/O error").context("upsert record");
        let e = TransferError::persistence(inner);
        assert_eq!(e.to_string(), "persistence: upsert record: disk I/O error");
    }
}
