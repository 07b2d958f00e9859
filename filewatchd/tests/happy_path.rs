//! End-to-end scenarios 1 and boundary behaviors from the upload lifecycle: a dropped file is
//! picked up by the watcher's cold-start scan, uploaded, and archived.

mod common;

use std::time::Duration;

use camino::Utf8PathBuf;
use filewatchd::processor::{self, ProcessorSettings};
use filewatchd::store::models::UploadState;
use filewatchd::watcher::{self, WatcherConfig};
use tokio_util::sync::CancellationToken;

fn settings() -> ProcessorSettings {
    ProcessorSettings {
        max_concurrent_uploads: 2,
        max_retries: 3,
        retry_delay: Duration::from_secs(1),
        max_retry_delay: Duration::from_secs(60),
        reclaim_after: Duration::from_secs(600),
        archive_on_success: true,
        delete_on_success: false,
    }
}

#[tokio::test]
async fn happy_path_uploads_and_archives() {
    let in_dir = camino_tempfile::tempdir().unwrap();
    let archive_dir = camino_tempfile::tempdir().unwrap();
    let blob_root = camino_tempfile::tempdir().unwrap();

    let (core, _clock) = common::test_core(blob_root.path(), common::epoch_start());
    common::add_source(
        &core,
        "S1",
        in_dir.path(),
        Some(archive_dir.path()),
        "*.txt",
    )
    .await;

    let file_path = in_dir.path().join("a.txt");
    tokio::fs::write(&file_path, b"hello world").await.unwrap();

    let cancel = CancellationToken::new();
    let handle = watcher::start(
        WatcherConfig {
            name: "S1".to_string(),
            folder_path: in_dir.path().to_owned(),
            file_pattern: "*.txt".to_string(),
            default_container: "uploads".to_string(),
            quiescence: Duration::from_millis(50),
            max_file_size_bytes: 10 * 1024 * 1024,
        },
        core.clone(),
        &cancel,
        std::sync::Arc::new(|e| panic!("unexpected watcher error: {e}")),
    )
    .expect("starting watcher");

    // The cold-start rescan enqueues pre-existing files immediately; give the spawned task a
    // chance to run before asserting.
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.stop().await;

    let jobs = all_jobs(&core).await;
    assert_eq!(jobs.len(), 1, "expected exactly one enqueued job, got {jobs:?}");
    assert_eq!(jobs[0].parsed_state(), UploadState::Pending);

    let terminal = processor::run_once(&core, &settings()).await.unwrap();
    assert_eq!(terminal, 1);

    let jobs = all_jobs(&core).await;
    assert_eq!(jobs[0].parsed_state(), UploadState::Succeeded);
    assert!(jobs[0].last_error.is_none());

    assert!(!file_path.exists(), "source file should have been archived away");
    let archived = archive_dir.path().join("a.txt");
    assert_eq!(tokio::fs::read(&archived).await.unwrap(), b"hello world");

    let uploaded = blob_root.path().join("uploads").join("a.txt");
    assert_eq!(tokio::fs::read(&uploaded).await.unwrap(), b"hello world");
}

#[tokio::test]
async fn zero_byte_file_is_enqueued_and_uploaded() {
    let in_dir = camino_tempfile::tempdir().unwrap();
    let blob_root = camino_tempfile::tempdir().unwrap();
    let (core, _clock) = common::test_core(blob_root.path(), common::epoch_start());
    common::add_source(&core, "S1", in_dir.path(), None, "*").await;

    let file_path = in_dir.path().join("empty.bin");
    tokio::fs::write(&file_path, b"").await.unwrap();

    let job_id = common::insert_pending_job(&core, "S1", &file_path, 0).await;
    let terminal = processor::run_once(&core, &settings()).await.unwrap();
    assert_eq!(terminal, 1);

    let job = common::load_job(&core, job_id).await;
    assert_eq!(job.state, UploadState::Succeeded);

    let uploaded = blob_root.path().join("default").join("empty.bin");
    assert_eq!(tokio::fs::read(&uploaded).await.unwrap(), b"");
}

#[tokio::test]
async fn oversized_file_is_not_enqueued_and_reports_one_error() {
    let in_dir = camino_tempfile::tempdir().unwrap();
    let blob_root = camino_tempfile::tempdir().unwrap();
    let (core, _clock) = common::test_core(blob_root.path(), common::epoch_start());
    common::add_source(&core, "S1", in_dir.path(), None, "*").await;

    let big_path = in_dir.path().join("big.bin");
    tokio::fs::write(&big_path, vec![0u8; 2048]).await.unwrap();

    let error_count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let error_count_cb = error_count.clone();

    let cancel = CancellationToken::new();
    let handle = watcher::start(
        WatcherConfig {
            name: "S1".to_string(),
            folder_path: in_dir.path().to_owned(),
            file_pattern: "*".to_string(),
            default_container: "uploads".to_string(),
            quiescence: Duration::from_millis(50),
            max_file_size_bytes: 1024,
        },
        core.clone(),
        &cancel,
        std::sync::Arc::new(move |_e| {
            error_count_cb.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }),
    )
    .expect("starting watcher");

    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.stop().await;

    assert_eq!(all_jobs(&core).await.len(), 0, "oversized file must not be enqueued");
    assert_eq!(error_count.load(std::sync::atomic::Ordering::SeqCst), 1);
}

async fn all_jobs(core: &filewatchd::core_services::CoreServices) -> Vec<filewatchd::store::models::UploadJobRow> {
    use diesel::prelude::*;
    use filewatchd::store::schema::upload_jobs::dsl as u;
    core.store
        .with_conn(|conn| {
            u::upload_jobs
                .order(u::id.asc())
                .load(conn)
                .map_err(filewatchd::error::StoreError::from)
        })
        .await
        .unwrap()
}
