//! End-to-end scenarios 2 and 4: exponential backoff on transient failures, and retry
//! exhaustion transitioning a job to `Failed`.

mod common;

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use blob_storage::{BlobUploader, ProbeResult, UploadOutcome};
use camino::Utf8Path;
use filewatchd::processor::{self, ProcessorSettings};
use filewatchd::store::models::UploadState;

/// Fails with a transient error the first `fail_count` times it is called, then succeeds.
struct FlakyUploader {
    remaining_failures: AtomicI32,
}

#[async_trait]
impl BlobUploader for FlakyUploader {
    async fn upload(&self, _local_path: &Utf8Path, _container: &str, _object_name: &str) -> Result<(), UploadOutcome> {
        let remaining = self.remaining_failures.fetch_sub(1, Ordering::SeqCst);
        if remaining > 0 {
            Err(UploadOutcome::Transient(anyhow::anyhow!("scripted transient failure")))
        } else {
            Ok(())
        }
    }

    async fn list_containers(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec![])
    }

    async fn probe(&self) -> ProbeResult {
        ProbeResult::Connected
    }
}

/// Always fails with a transient error.
struct AlwaysFlaky;

#[async_trait]
impl BlobUploader for AlwaysFlaky {
    async fn upload(&self, _local_path: &Utf8Path, _container: &str, _object_name: &str) -> Result<(), UploadOutcome> {
        Err(UploadOutcome::Transient(anyhow::anyhow!("always fails")))
    }

    async fn list_containers(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec![])
    }

    async fn probe(&self) -> ProbeResult {
        ProbeResult::Connected
    }
}

/// Always fails with a permanent error.
struct AlwaysPermanent;

#[async_trait]
impl BlobUploader for AlwaysPermanent {
    async fn upload(&self, _local_path: &Utf8Path, _container: &str, _object_name: &str) -> Result<(), UploadOutcome> {
        Err(UploadOutcome::Permanent(anyhow::anyhow!("bad credentials")))
    }

    async fn list_containers(&self) -> anyhow::Result<Vec<String>> {
        Ok(vec![])
    }

    async fn probe(&self) -> ProbeResult {
        ProbeResult::Connected
    }
}

fn settings(max_retries: i32) -> ProcessorSettings {
    ProcessorSettings {
        max_concurrent_uploads: 2,
        max_retries,
        retry_delay: Duration::from_secs(1),
        max_retry_delay: Duration::from_secs(60),
        reclaim_after: Duration::from_secs(600),
        archive_on_success: false,
        delete_on_success: false,
    }
}

#[tokio::test]
async fn transient_failures_retry_with_growing_backoff_then_succeed() {
    let in_dir = camino_tempfile::tempdir().unwrap();
    let blob_root = camino_tempfile::tempdir().unwrap();
    let (mut core, clock) = common::test_core(blob_root.path(), common::epoch_start());
    core.blob = Arc::new(FlakyUploader {
        remaining_failures: AtomicI32::new(2),
    });
    common::add_source(&core, "S1", in_dir.path(), None, "*").await;

    let file_path = in_dir.path().join("a.txt");
    tokio::fs::write(&file_path, b"payload").await.unwrap();
    let job_id = common::insert_pending_job(&core, "S1", &file_path, 7).await;

    let settings = settings(3);

    // Attempt 1: fails transiently, attempts=1, backoff = base * 2^0 = 1s.
    processor::run_once(&core, &settings).await.unwrap();
    let after_first = common::load_job(&core, job_id).await;
    assert_eq!(after_first.state, UploadState::Pending);
    assert_eq!(after_first.attempts, 1);
    let first_delta = after_first.next_attempt_at - after_first.updated_at;
    assert!(first_delta >= chrono::Duration::seconds(1));

    // Not yet eligible; advance the clock past the computed next_attempt_at before retrying.
    clock.set(after_first.next_attempt_at + chrono::Duration::seconds(1));

    // Attempt 2: fails transiently again, attempts=2, backoff = base * 2^1 = 2s.
    processor::run_once(&core, &settings).await.unwrap();
    let after_second = common::load_job(&core, job_id).await;
    assert_eq!(after_second.state, UploadState::Pending);
    assert_eq!(after_second.attempts, 2);
    let second_delta = after_second.next_attempt_at - after_second.updated_at;
    assert!(second_delta >= chrono::Duration::seconds(2));
    assert!(
        second_delta >= first_delta,
        "successive backoff deltas must be non-decreasing: {first_delta:?} then {second_delta:?}"
    );

    clock.set(after_second.next_attempt_at + chrono::Duration::seconds(1));

    // Attempt 3: succeeds.
    let terminal = processor::run_once(&core, &settings).await.unwrap();
    assert_eq!(terminal, 1);
    let final_job = common::load_job(&core, job_id).await;
    assert_eq!(final_job.state, UploadState::Succeeded);
    // `attempts` only counts failed tries; the final, successful try does not increment it.
    assert_eq!(final_job.attempts, 2);
}

#[tokio::test]
async fn retries_exhaust_after_exactly_max_retries_attempts() {
    let in_dir = camino_tempfile::tempdir().unwrap();
    let blob_root = camino_tempfile::tempdir().unwrap();
    let (mut core, clock) = common::test_core(blob_root.path(), common::epoch_start());
    core.blob = Arc::new(AlwaysFlaky);
    common::add_source(&core, "S1", in_dir.path(), None, "*").await;

    let file_path = in_dir.path().join("a.txt");
    tokio::fs::write(&file_path, b"payload").await.unwrap();
    let job_id = common::insert_pending_job(&core, "S1", &file_path, 7).await;

    let settings = settings(2);

    processor::run_once(&core, &settings).await.unwrap();
    let after_first = common::load_job(&core, job_id).await;
    assert_eq!(after_first.state, UploadState::Pending);
    assert_eq!(after_first.attempts, 1);

    clock.set(after_first.next_attempt_at + chrono::Duration::seconds(1));
    let terminal = processor::run_once(&core, &settings).await.unwrap();
    assert_eq!(terminal, 1);

    let final_job = common::load_job(&core, job_id).await;
    assert_eq!(final_job.state, UploadState::Failed);
    assert_eq!(final_job.attempts, 2);
    assert!(final_job.last_error.is_some());
}

#[tokio::test]
async fn permanent_error_fails_immediately_and_leaves_file_untouched() {
    let in_dir = camino_tempfile::tempdir().unwrap();
    let blob_root = camino_tempfile::tempdir().unwrap();
    let (mut core, _clock) = common::test_core(blob_root.path(), common::epoch_start());
    core.blob = Arc::new(AlwaysPermanent);
    common::add_source(&core, "S1", in_dir.path(), None, "*").await;

    let file_path = in_dir.path().join("a.txt");
    tokio::fs::write(&file_path, b"payload").await.unwrap();
    let job_id = common::insert_pending_job(&core, "S1", &file_path, 7).await;

    let terminal = processor::run_once(&core, &settings(5)).await.unwrap();
    assert_eq!(terminal, 1);

    let job = common::load_job(&core, job_id).await;
    assert_eq!(job.state, UploadState::Failed);
    assert_eq!(job.attempts, 0, "permanent errors do not consume a retry attempt");
    assert!(job.last_error.is_some());
    assert!(file_path.exists(), "a permanently failed job must not delete or move the file");
}
