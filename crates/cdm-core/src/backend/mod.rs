//! Transfer backend contract and the bundled libcurl implementation.
//!
//! A backend turns a URL into a pausable, cancellable handle plus a live
//! progress signal. Terminal outcomes are not returned from the handle; they
//! are pushed as [`BackendEvent`]s into the coordinator's queue, tagged with
//! the completion tag the coordinator set on the handle.

mod http;

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::sync::watch;
use url::Url;

use crate::error::BackendError;

pub use self::http::CurlBackend;
pub use crate::coordinator::{BackendEvent, EventSender};

/// Owned handle to one transfer. Dropping it does not cancel the transfer.
pub trait TransferHandle: Send + Sync {
    /// Correlates backend events with the caller's item; set before `start`.
    fn set_completion_tag(&mut self, tag: String);
    fn completion_tag(&self) -> Option<&str>;
    fn start(&self);
    fn suspend(&self);
    fn resume(&self);
    /// Stop the transfer; the backend reports `BackendError::Cancelled`.
    fn cancel(&self);
}

pub type ProgressSignal = watch::Receiver<f64>;

/// What a backend knows about a transfer that reached 100% but has not reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The bytes are complete at this location; the completion event was lost.
    Finished(PathBuf),
    /// Still running (for example flushing to disk); it will report on its own.
    Running,
    /// Nothing is running and nothing finished.
    Stopped,
}

#[async_trait]
pub trait TransferBackend: Send + Sync {
    async fn create_transfer(
        &self,
        url: &Url,
    ) -> Result<(Box<dyn TransferHandle>, ProgressSignal), BackendError>;

    /// Status of the transfer tagged `tag` that reached 100% without a terminal
    /// event. Backends that cannot tell report `Stopped`.
    async fn probe_completed(&self, _tag: &str) -> ProbeOutcome {
        ProbeOutcome::Stopped
    }
}
