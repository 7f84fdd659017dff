//! In-process fake backend and a wired-up coordinator for unit tests.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use url::Url;

use crate::aggregator::ProgressAggregator;
use crate::backend::{ProbeOutcome, ProgressSignal, TransferBackend, TransferHandle};
use crate::config::CdmConfig;
use crate::coordinator::{event_channel, BackendEvent, Coordinator, EventReceiver, EventSender};
use crate::error::BackendError;
use crate::storage::FsStorage;
use crate::store::{open_memory, Store};

/// Everything a fake handle was asked to do, in order.
#[derive(Debug, Default)]
pub(crate) struct HandleLog {
    tag: Mutex<Option<String>>,
    calls: Mutex<Vec<&'static str>>,
}

impl HandleLog {
    pub fn tag(&self) -> String {
        self.tag.lock().unwrap().clone().expect("completion tag set")
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: &'static str) {
        self.calls.lock().unwrap().push(call);
    }
}

struct FakeHandle {
    tag: Option<String>,
    log: Arc<HandleLog>,
}

impl TransferHandle for FakeHandle {
    fn set_completion_tag(&mut self, tag: String) {
        *self.log.tag.lock().unwrap() = Some(tag.clone());
        self.tag = Some(tag);
    }

    fn completion_tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn start(&self) {
        self.log.record("start");
    }

    fn suspend(&self) {
        self.log.record("suspend");
    }

    fn resume(&self) {
        self.log.record("resume");
    }

    fn cancel(&self) {
        self.log.record("cancel");
    }
}

#[derive(Default)]
struct FakeState {
    handles: Vec<Arc<HandleLog>>,
    progress: Vec<watch::Sender<f64>>,
    fail_next: Option<BackendError>,
    probe_result: Option<ProbeOutcome>,
    probes: Vec<String>,
}

/// Scripted backend: transfers never move bytes on their own; tests push
/// progress and terminal events by hand.
#[derive(Default)]
pub(crate) struct FakeBackend {
    state: Mutex<FakeState>,
}

impl FakeBackend {
    pub fn created(&self) -> usize {
        self.state.lock().unwrap().handles.len()
    }

    pub fn handle(&self, index: usize) -> Arc<HandleLog> {
        Arc::clone(&self.state.lock().unwrap().handles[index])
    }

    pub fn last_handle(&self) -> Arc<HandleLog> {
        let state = self.state.lock().unwrap();
        Arc::clone(state.handles.last().expect("a transfer was created"))
    }

    /// Emit a progress value on the signal of handle `index`.
    pub fn send_progress(&self, index: usize, value: f64) {
        let state = self.state.lock().unwrap();
        state.progress[index].send_replace(value);
    }

    pub fn fail_next_create(&self, error: BackendError) {
        self.state.lock().unwrap().fail_next = Some(error);
    }

    /// Answer for the next probe; later probes report `Stopped`.
    pub fn set_probe_result(&self, outcome: ProbeOutcome) {
        self.state.lock().unwrap().probe_result = Some(outcome);
    }

    pub fn probes(&self) -> Vec<String> {
        self.state.lock().unwrap().probes.clone()
    }
}

#[async_trait]
impl TransferBackend for FakeBackend {
    async fn create_transfer(
        &self,
        _url: &Url,
    ) -> Result<(Box<dyn TransferHandle>, ProgressSignal), BackendError> {
        let mut state = self.state.lock().unwrap();
        if let Some(e) = state.fail_next.take() {
            return Err(e);
        }
        let log = Arc::new(HandleLog::default());
        let (tx, rx) = watch::channel(0.0);
        state.handles.push(Arc::clone(&log));
        state.progress.push(tx);
        Ok((Box::new(FakeHandle { tag: None, log }), rx))
    }

    async fn probe_completed(&self, tag: &str) -> ProbeOutcome {
        let mut state = self.state.lock().unwrap();
        state.probes.push(tag.to_string());
        state.probe_result.take().unwrap_or(ProbeOutcome::Stopped)
    }
}

/// Coordinator over an in-memory store, a temp downloads root and [`FakeBackend`].
/// Events are handled only when the test calls [`Harness::step`].
pub(crate) struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub backend: Arc<FakeBackend>,
    pub aggregator: Arc<ProgressAggregator>,
    pub store: Store,
    pub queue: EventSender,
    pub rx: EventReceiver,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(CdmConfig::default()).await
    }

    pub async fn with_config(cfg: CdmConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = open_memory().await.unwrap();
        let storage = Arc::new(FsStorage::new(dir.path().join("downloads")));
        let backend = Arc::new(FakeBackend::default());
        let aggregator = Arc::new(ProgressAggregator::new(cfg.event_buffer));
        let (queue, rx) = event_channel();
        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            storage,
            backend.clone(),
            aggregator.clone(),
            queue.clone(),
            &cfg,
        ));
        Self {
            coordinator,
            backend,
            aggregator,
            store,
            queue,
            rx,
            dir,
        }
    }

    pub fn downloads_root(&self) -> PathBuf {
        self.dir.path().join("downloads")
    }

    /// Write a transient file as a backend would before reporting completion.
    pub fn transient_file(&self, contents: &[u8]) -> PathBuf {
        let path = self
            .dir
            .path()
            .join(format!("{}.download", uuid::Uuid::new_v4()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    pub fn finish(&self, tag: String, location: PathBuf) {
        assert!(self.queue.send(BackendEvent::Finished { tag, location }));
    }

    pub fn fail(&self, tag: String, error: Option<BackendError>) {
        assert!(self.queue.send(BackendEvent::Failed { tag, error }));
    }

    /// Handle the next queued event, waiting briefly for forwarded progress.
    pub async fn step(&mut self) {
        let handled = tokio::time::timeout(
            Duration::from_secs(5),
            self.coordinator.process_next(&mut self.rx),
        )
        .await
        .expect("an event arrives");
        assert!(handled);
    }

    /// Nothing is waiting in the queue.
    pub async fn assert_idle(&mut self) {
        tokio::task::yield_now().await;
        assert!(self.rx.try_recv().is_none());
    }
}
