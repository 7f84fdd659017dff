use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use super::DownloadService;
use crate::config::CdmConfig;
use crate::coordinator::TransferEvent;
use crate::error::TransferError;
use crate::model::{GroupId, ItemId, TransferState};
use crate::reconcile::Reconciler;
use crate::storage::FsStorage;
use crate::store::{NewCatalogItem, TransferRecord};
use crate::testing::Harness;

fn service(h: &Harness) -> DownloadService {
    let storage = Arc::new(FsStorage::new(h.downloads_root()));
    DownloadService::new(
        h.store.clone(),
        Arc::clone(&h.coordinator),
        Arc::clone(&h.aggregator),
        Reconciler::new(h.store.clone(), storage),
        "mp4",
    )
}

async fn add(h: &Harness, group: Option<GroupId>, title: &str, url: &str, ext: &str) -> ItemId {
    let id = ItemId::new();
    h.store
        .add_item(&NewCatalogItem {
            id,
            group_id: group,
            title: title.to_string(),
            source_url: url.to_string(),
            extension: ext.to_string(),
        })
        .await
        .unwrap();
    id
}

async fn wait_for<T: Clone + PartialEq + std::fmt::Debug>(rx: &mut watch::Receiver<T>, want: T) {
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|v| *v == want))
        .await
        .expect("watcher reached the expected value")
        .unwrap();
}

#[tokio::test]
async fn download_item_uses_catalog_and_tracks_group() {
    let mut h = Harness::new().await;
    let svc = service(&h);
    let course = GroupId::new();
    let id = add(
        &h,
        Some(course),
        "Intro",
        "https://cdn.example.com/intro.webm",
        "",
    )
    .await;

    svc.download_item(id).await.unwrap();
    assert!(h.coordinator.is_active(id));
    assert!(h.aggregator.is_tracking(id));

    let transient = h.transient_file(b"x");
    h.finish(h.backend.last_handle().tag(), transient);
    h.step().await;

    // Extension came from the URL since the item has none.
    let expected = h.downloads_root().join(id.to_string()).join("Intro.webm");
    assert!(expected.exists());
    assert_eq!(h.aggregator.group_progress(course), Some(1.0));
}

#[tokio::test]
async fn default_extension_when_nothing_else_is_known() {
    let mut h = Harness::new().await;
    let svc = service(&h);
    let id = add(&h, None, "Stream", "https://cdn.example.com/play", "").await;

    svc.download_item(id).await.unwrap();
    let transient = h.transient_file(b"x");
    h.finish(h.backend.last_handle().tag(), transient);
    h.step().await;

    assert!(h
        .downloads_root()
        .join(id.to_string())
        .join("Stream.mp4")
        .exists());
}

#[tokio::test]
async fn unknown_item_is_an_error() {
    let h = Harness::new().await;
    let svc = service(&h);
    let err = svc.download_item(ItemId::new()).await.unwrap_err();
    assert!(matches!(err, TransferError::Unknown(_)));
}

#[tokio::test]
async fn group_download_reports_failures_but_starts_the_rest() {
    let h = Harness::new().await;
    let svc = service(&h);
    let course = GroupId::new();
    let good = add(&h, Some(course), "A", "https://cdn.example.com/a.mp4", "mp4").await;
    let bad = add(&h, Some(course), "B", "not a url", "mp4").await;

    let err = svc.download_group(course).await.unwrap_err();
    assert_eq!(err.to_string(), "failed to start 1 items");
    assert!(h.coordinator.is_active(good));
    assert!(!h.coordinator.is_active(bad));
}

#[tokio::test]
async fn group_pause_resume_cancel() {
    let h = Harness::new().await;
    let svc = service(&h);
    let course = GroupId::new();
    let a = add(&h, Some(course), "A", "https://cdn.example.com/a.mp4", "mp4").await;
    let b = add(&h, Some(course), "B", "https://cdn.example.com/b.mp4", "mp4").await;
    svc.download_group(course).await.unwrap();

    svc.pause_group(course).await.unwrap();
    for id in [a, b] {
        assert_eq!(
            h.coordinator.state_of(id).await.unwrap(),
            TransferState::Paused
        );
    }

    svc.resume_group(course).await.unwrap();
    for id in [a, b] {
        assert_eq!(
            h.coordinator.state_of(id).await.unwrap(),
            TransferState::InProgress
        );
    }

    svc.cancel_group(course).await.unwrap();
    assert!(h.coordinator.list_active().is_empty());
    assert!(h.store.list_records().await.unwrap().is_empty());
}

#[tokio::test]
async fn delete_item_leaves_the_group_mean() {
    let mut h = Harness::new().await;
    let svc = service(&h);
    let course = GroupId::new();
    let a = add(&h, Some(course), "A", "https://cdn.example.com/a.mp4", "mp4").await;
    let b = add(&h, Some(course), "B", "https://cdn.example.com/b.mp4", "mp4").await;
    svc.download_group(course).await.unwrap();

    let tag_a = (0..2)
        .map(|i| h.backend.handle(i).tag())
        .find(|t| t.starts_with(&a.to_string()))
        .unwrap();
    let transient = h.transient_file(b"lecture");
    h.finish(tag_a, transient);
    h.step().await;
    assert_eq!(h.aggregator.group_progress(course), Some(0.5));

    svc.delete_item(a).await.unwrap();
    assert!(!h.downloads_root().join(a.to_string()).exists());
    assert!(!h.aggregator.is_tracking(a));
    assert!(h.aggregator.is_tracking(b));
    assert_eq!(h.aggregator.group_progress(course), Some(0.0));
}

#[tokio::test]
async fn watchers_follow_state_and_progress() {
    let mut h = Harness::new().await;
    let svc = service(&h);
    let course = GroupId::new();
    let a = add(&h, Some(course), "A", "https://cdn.example.com/a.mp4", "mp4").await;
    let _b = add(&h, Some(course), "B", "https://cdn.example.com/b.mp4", "mp4").await;

    let mut state = svc.item_state(a).await.unwrap();
    let mut progress = svc.item_progress(a).await.unwrap();
    let mut group = svc.group_progress(course).await.unwrap();
    assert_eq!(*state.borrow(), TransferState::NotStarted);
    assert_eq!(*group.borrow(), 0.0);

    svc.download_group(course).await.unwrap();
    wait_for(&mut state, TransferState::InProgress).await;

    h.backend.send_progress(0, 0.5);
    h.step().await;
    wait_for(&mut progress, 0.5).await;
    wait_for(&mut group, 0.25).await;

    svc.pause_item(a).await.unwrap();
    wait_for(&mut state, TransferState::Paused).await;
}

#[tokio::test]
async fn watchers_are_seeded_from_the_ledger() {
    let h = Harness::new().await;
    let svc = service(&h);
    let id = add(&h, None, "A", "https://cdn.example.com/a.mp4", "mp4").await;
    h.store
        .commit_record(&TransferRecord::new(id, TransferState::Failed, 0.4))
        .await
        .unwrap();

    assert_eq!(
        *svc.item_state(id).await.unwrap().borrow(),
        TransferState::Failed
    );
    assert!((*svc.item_progress(id).await.unwrap().borrow() - 0.4).abs() < 1e-9);
}

#[tokio::test]
async fn reconcile_skips_active_items() {
    let h = Harness::new().await;
    let svc = service(&h);
    let running = add(&h, None, "A", "https://cdn.example.com/a.mp4", "mp4").await;
    let stale = add(&h, None, "B", "https://cdn.example.com/b.mp4", "mp4").await;
    svc.download_item(running).await.unwrap();
    h.store
        .commit_record(&TransferRecord::new(stale, TransferState::InProgress, 0.2))
        .await
        .unwrap();

    let report = svc.reconcile().await.unwrap();
    assert_eq!(report.examined, 1);
    assert_eq!(report.repaired, 1);
    assert_eq!(
        h.coordinator.state_of(running).await.unwrap(),
        TransferState::InProgress
    );
    assert!(h.store.get_record(stale).await.unwrap().is_none());
}

#[tokio::test]
async fn watchers_recover_from_a_lagged_broadcast() {
    let mut cfg = CdmConfig::default();
    cfg.event_buffer = 1;
    let h = Harness::with_config(cfg).await;
    let svc = service(&h);
    let done = add(&h, None, "A", "https://cdn.example.com/a.mp4", "mp4").await;
    let busy = ItemId::new();

    let mut state = svc.item_state(done).await.unwrap();
    let mut progress = svc.item_progress(done).await.unwrap();
    assert_eq!(*state.borrow(), TransferState::NotStarted);

    let file = h.downloads_root().join("A.mp4");
    h.store
        .commit_record(&TransferRecord::completed(done, file))
        .await
        .unwrap();
    // No await in between: the pump cannot run, so the completion is overwritten.
    h.coordinator.publish_state(done, TransferState::Completed);
    for i in 1..=8 {
        h.coordinator.publish(TransferEvent::Progress {
            item_id: busy,
            progress: f64::from(i) / 10.0,
        });
    }

    wait_for(&mut state, TransferState::Completed).await;
    wait_for(&mut progress, 1.0).await;
}
