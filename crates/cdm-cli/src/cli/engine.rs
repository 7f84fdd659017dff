//! Wires store, storage, backend, coordinator and service together for one CLI run.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;

use cdm_core::aggregator::ProgressAggregator;
use cdm_core::backend::CurlBackend;
use cdm_core::config::CdmConfig;
use cdm_core::coordinator::{event_channel, Coordinator};
use cdm_core::reconcile::{ReconcileReport, Reconciler};
use cdm_core::service::DownloadService;
use cdm_core::storage::FsStorage;
use cdm_core::store::Store;

pub struct Engine {
    pub store: Store,
    pub service: DownloadService,
    /// What the reconciliation pass at open repaired.
    pub startup: ReconcileReport,
    events: JoinHandle<()>,
}

impl Engine {
    /// Open the database, start the event loop, and reconcile before anything runs.
    pub async fn open(cfg: &CdmConfig) -> Result<Self> {
        let store = Store::open_default().await.context("open database")?;
        let storage = Arc::new(FsStorage::from_config(cfg)?);
        storage
            .ensure_root()
            .await
            .context("create downloads directory")?;

        let aggregator = Arc::new(ProgressAggregator::new(cfg.event_buffer));
        let (queue, rx) = event_channel();
        let backend = Arc::new(CurlBackend::new(cfg, queue.clone()));
        let coordinator = Arc::new(Coordinator::new(
            store.clone(),
            storage.clone(),
            backend,
            aggregator.clone(),
            queue,
            cfg,
        ));
        let runner = Arc::clone(&coordinator);
        let events = tokio::spawn(async move { runner.run_events(rx).await });

        let service = DownloadService::new(
            store.clone(),
            coordinator,
            aggregator,
            Reconciler::new(store.clone(), storage),
            cfg.default_extension.clone(),
        );
        let startup = service.reconcile().await.context("reconcile")?;
        if startup.repaired > 0 {
            tracing::info!(repaired = startup.repaired, "repaired state from a previous run");
        }

        Ok(Self {
            store,
            service,
            startup,
            events,
        })
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        self.service.coordinator()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.events.abort();
    }
}
