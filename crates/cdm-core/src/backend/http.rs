//! libcurl backend: one blocking `Easy` transfer per handle, each on its own OS thread.
//!
//! Bytes land in `<transient_dir>/<uuid>.download`. Suspending parks the
//! transfer inside the curl callbacks; cancelling makes the next callback
//! abort the transfer.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use url::Url;
use uuid::Uuid;

use super::{
    BackendEvent, EventSender, ProbeOutcome, ProgressSignal, TransferBackend, TransferHandle,
};
use crate::config::CdmConfig;
use crate::error::BackendError;

/// How often a suspended transfer re-checks its control flags.
const PAUSE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy)]
struct CurlOptions {
    connect_timeout: Duration,
    low_speed_limit: u32,
    low_speed_time: Duration,
}

#[derive(Debug, Clone)]
enum JobStatus {
    Running,
    Finished(PathBuf),
}

/// Per completion tag: running transfers and finished transient files.
#[derive(Debug, Clone, Default)]
struct JobTable(Arc<Mutex<HashMap<String, JobStatus>>>);

impl JobTable {
    fn set(&self, tag: &str, status: JobStatus) {
        let mut jobs = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        jobs.retain(|_, s| match s {
            JobStatus::Running => true,
            JobStatus::Finished(p) => p.exists(),
        });
        jobs.insert(tag.to_string(), status);
    }

    fn forget(&self, tag: &str) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tag);
    }

    fn probe(&self, tag: &str) -> ProbeOutcome {
        let mut jobs = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match jobs.get(tag) {
            Some(JobStatus::Running) => ProbeOutcome::Running,
            Some(JobStatus::Finished(_)) => match jobs.remove(tag) {
                Some(JobStatus::Finished(p)) if p.exists() => ProbeOutcome::Finished(p),
                _ => ProbeOutcome::Stopped,
            },
            None => ProbeOutcome::Stopped,
        }
    }
}

/// Transfer backend built on libcurl's easy interface.
pub struct CurlBackend {
    events: EventSender,
    transient_dir: PathBuf,
    opts: CurlOptions,
    jobs: JobTable,
}

impl CurlBackend {
    pub fn new(cfg: &CdmConfig, events: EventSender) -> Self {
        Self {
            events,
            transient_dir: cfg.transient_dir(),
            opts: CurlOptions {
                connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
                low_speed_limit: cfg.low_speed_limit_bytes,
                low_speed_time: Duration::from_secs(cfg.low_speed_time_secs),
            },
            jobs: JobTable::default(),
        }
    }
}

#[async_trait]
impl TransferBackend for CurlBackend {
    async fn create_transfer(
        &self,
        url: &Url,
    ) -> Result<(Box<dyn TransferHandle>, ProgressSignal), BackendError> {
        if !matches!(url.scheme(), "http" | "https" | "file") {
            return Err(BackendError::InvalidUrl(format!(
                "unsupported scheme {:?} in {url}",
                url.scheme()
            )));
        }
        let (progress, signal) = watch::channel(0.0);
        let handle = CurlHandle {
            url: url.clone(),
            tag: None,
            control: Arc::default(),
            progress: Arc::new(progress),
            events: self.events.clone(),
            transient_dir: self.transient_dir.clone(),
            opts: self.opts,
            jobs: self.jobs.clone(),
        };
        Ok((Box::new(handle), signal))
    }

    async fn probe_completed(&self, tag: &str) -> ProbeOutcome {
        self.jobs.probe(tag)
    }
}

#[derive(Debug, Default)]
struct Control {
    started: AtomicBool,
    paused: AtomicBool,
    cancelled: AtomicBool,
}

impl Control {
    /// Park while suspended. Returns false once the transfer is cancelled.
    fn wait_while_paused(&self) -> bool {
        while self.paused.load(Ordering::Acquire) {
            if self.cancelled.load(Ordering::Acquire) {
                return false;
            }
            std::thread::sleep(PAUSE_POLL);
        }
        !self.cancelled.load(Ordering::Acquire)
    }
}

struct CurlHandle {
    url: Url,
    tag: Option<String>,
    control: Arc<Control>,
    progress: Arc<watch::Sender<f64>>,
    events: EventSender,
    transient_dir: PathBuf,
    opts: CurlOptions,
    jobs: JobTable,
}

impl TransferHandle for CurlHandle {
    fn set_completion_tag(&mut self, tag: String) {
        self.tag = Some(tag);
    }

    fn completion_tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    fn start(&self) {
        if self.control.started.swap(true, Ordering::AcqRel) {
            return;
        }
        let tag = self.tag.clone().unwrap_or_else(|| {
            tracing::warn!(url = %self.url, "transfer started without a completion tag");
            String::new()
        });
        let job = TransferJob {
            url: self.url.clone(),
            tag: tag.clone(),
            control: Arc::clone(&self.control),
            progress: Arc::clone(&self.progress),
            events: self.events.clone(),
            transient_dir: self.transient_dir.clone(),
            opts: self.opts,
            jobs: self.jobs.clone(),
        };
        self.jobs.set(&tag, JobStatus::Running);
        let spawned = std::thread::Builder::new()
            .name("cdm-transfer".to_string())
            .spawn(move || job.run());
        if let Err(e) = spawned {
            self.jobs.forget(&tag);
            tracing::error!(tag = %tag, "could not spawn transfer thread: {}", e);
            self.events.send(BackendEvent::Failed {
                tag,
                error: Some(BackendError::Transport(format!("spawn transfer thread: {e}"))),
            });
        }
    }

    fn suspend(&self) {
        self.control.paused.store(true, Ordering::Release);
    }

    fn resume(&self) {
        self.control.paused.store(false, Ordering::Release);
    }

    fn cancel(&self) {
        self.control.cancelled.store(true, Ordering::Release);
    }
}

struct TransferJob {
    url: Url,
    tag: String,
    control: Arc<Control>,
    progress: Arc<watch::Sender<f64>>,
    events: EventSender,
    transient_dir: PathBuf,
    opts: CurlOptions,
    jobs: JobTable,
}

impl TransferJob {
    fn run(self) {
        let location = self
            .transient_dir
            .join(format!("{}.download", Uuid::new_v4()));
        let event = match self.fetch(&location) {
            Ok(bytes) => {
                tracing::debug!(tag = %self.tag, bytes, "transfer finished");
                self.progress.send_replace(1.0);
                self.jobs
                    .set(&self.tag, JobStatus::Finished(location.clone()));
                BackendEvent::Finished {
                    tag: self.tag.clone(),
                    location,
                }
            }
            Err(e) => {
                self.jobs.forget(&self.tag);
                let _ = std::fs::remove_file(&location);
                BackendEvent::Failed {
                    tag: self.tag.clone(),
                    error: Some(e),
                }
            }
        };
        if !self.events.send(event) {
            tracing::warn!(tag = %self.tag, "coordinator queue closed; outcome not delivered");
        }
    }

    fn fetch(&self, location: &Path) -> Result<u64, BackendError> {
        std::fs::create_dir_all(&self.transient_dir).map_err(|e| {
            BackendError::Transport(format!(
                "create transient dir {}: {e}",
                self.transient_dir.display()
            ))
        })?;
        let mut file = File::create(location).map_err(|e| {
            BackendError::Transport(format!("create {}: {e}", location.display()))
        })?;

        let mut easy = curl::easy::Easy::new();
        let mut written = 0u64;
        let mut write_err: Option<io::Error> = None;
        let performed = self.perform(&mut easy, &mut file, &mut written, &mut write_err);

        if self.control.cancelled.load(Ordering::Acquire) {
            return Err(BackendError::Cancelled);
        }
        if let Some(e) = write_err {
            return Err(BackendError::Transport(format!(
                "write {}: {e}",
                location.display()
            )));
        }
        performed.map_err(|e| BackendError::Transport(e.to_string()))?;

        let code = easy
            .response_code()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        // file:// transfers report 0.
        if code != 0 && !(200..300).contains(&code) {
            return Err(BackendError::RequestFailed { status: code });
        }
        if written == 0 {
            return Err(BackendError::NoData);
        }
        file.sync_all()
            .map_err(|e| BackendError::Transport(format!("sync {}: {e}", location.display())))?;
        Ok(written)
    }

    fn perform(
        &self,
        easy: &mut curl::easy::Easy,
        file: &mut File,
        written: &mut u64,
        write_err: &mut Option<io::Error>,
    ) -> Result<(), curl::Error> {
        easy.url(self.url.as_str())?;
        easy.follow_location(true)?;
        easy.max_redirections(10)?;
        easy.connect_timeout(self.opts.connect_timeout)?;
        easy.low_speed_limit(self.opts.low_speed_limit)?;
        easy.low_speed_time(self.opts.low_speed_time)?;
        easy.progress(true)?;

        let control = &self.control;
        let progress = &self.progress;
        let mut transfer = easy.transfer();
        transfer.write_function(|data| {
            if !control.wait_while_paused() {
                return Ok(0); // abort transfer
            }
            match file.write_all(data) {
                Ok(()) => {
                    *written += data.len() as u64;
                    Ok(data.len())
                }
                Err(e) => {
                    *write_err = Some(e);
                    Ok(0)
                }
            }
        })?;
        transfer.progress_function(|dltotal, dlnow, _, _| {
            if !control.wait_while_paused() {
                return false;
            }
            if dltotal > 0.0 {
                let next = (dlnow / dltotal).clamp(0.0, 1.0);
                progress.send_if_modified(|cur| {
                    if next > *cur {
                        *cur = next;
                        true
                    } else {
                        false
                    }
                });
            }
            true
        })?;
        transfer.perform()
    }
}
