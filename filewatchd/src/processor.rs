//! Drains the upload queue: reclaims stale `InFlight` rows, claims a bounded batch of `Pending`
//! rows, uploads each with bounded concurrency, and applies post-upload disposition.

use std::sync::Arc;
use std::time::Duration;

use blob_storage::UploadOutcome;
use camino::{Utf8Path, Utf8PathBuf};
use diesel::prelude::*;
use futures::future::join_all;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::config_service::keys;
use crate::core_services::CoreServices;
use crate::error::{DispositionError, StoreError};
use crate::store::models::{UploadJobRow, UploadState};
use crate::store::schema::upload_jobs::dsl as u;

pub struct ProcessorSettings {
    pub max_concurrent_uploads: u32,
    pub max_retries: i32,
    pub retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub reclaim_after: Duration,
    pub archive_on_success: bool,
    pub delete_on_success: bool,
}

pub async fn load_settings(core: &CoreServices) -> ProcessorSettings {
    let tick_secs = core
        .config
        .get_typed::<u64>(keys::PROCESSING_INTERVAL_SECONDS)
        .await
        .unwrap_or(30);
    let reclaim_multiplier = core
        .config
        .get_typed::<u64>(keys::UPLOAD_RECLAIM_MULTIPLIER)
        .await
        .unwrap_or(10);
    ProcessorSettings {
        max_concurrent_uploads: core
            .config
            .get_typed::<u32>(keys::MAX_CONCURRENT_UPLOADS)
            .await
            .unwrap_or(4),
        max_retries: core
            .config
            .get_typed::<i32>(keys::MAX_RETRIES)
            .await
            .unwrap_or(5),
        retry_delay: core
            .config
            .get_duration_seconds(keys::RETRY_DELAY_SECONDS)
            .await
            .unwrap_or(Duration::from_secs(10)),
        max_retry_delay: core
            .config
            .get_typed::<u64>(keys::MAX_RETRY_DELAY_MINUTES)
            .await
            .map(|m| Duration::from_secs(m * 60))
            .unwrap_or(Duration::from_secs(30 * 60)),
        reclaim_after: Duration::from_secs(tick_secs * reclaim_multiplier),
        archive_on_success: core.config.get_bool(keys::ARCHIVE_ON_SUCCESS).await.unwrap_or(true),
        delete_on_success: core.config.get_bool(keys::DELETE_ON_SUCCESS).await.unwrap_or(false),
    }
}

/// Runs one processor pass: reclaim, claim, upload, disposition, commit. Returns the number of
/// jobs that reached a terminal state this pass.
pub async fn run_once(core: &CoreServices, settings: &ProcessorSettings) -> Result<usize, StoreError> {
    reclaim_stale(core, settings).await?;
    let claimed = claim_batch(core, settings).await?;
    if claimed.is_empty() {
        return Ok(0);
    }

    let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_uploads.max(1) as usize));
    let tasks = claimed.into_iter().map(|job| {
        let core = core.clone();
        let semaphore = semaphore.clone();
        let archive_on_success = settings.archive_on_success;
        let delete_on_success = settings.delete_on_success;
        let max_retries = settings.max_retries;
        let retry_delay = settings.retry_delay;
        let max_retry_delay = settings.max_retry_delay;
        async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
            process_one(&core, job, max_retries, retry_delay, max_retry_delay, archive_on_success, delete_on_success).await
        }
    });

    let results = join_all(tasks).await;
    Ok(results.into_iter().filter(|terminal| *terminal).count())
}

async fn reclaim_stale(core: &CoreServices, settings: &ProcessorSettings) -> Result<(), StoreError> {
    let cutoff = (core.clock.now() - chrono::Duration::from_std(settings.reclaim_after).unwrap_or_default()).to_rfc3339();
    let now = core.clock.now().to_rfc3339();
    core.store
        .with_conn(move |conn| {
            diesel::update(
                u::upload_jobs
                    .filter(u::state.eq(UploadState::InFlight.to_string()))
                    .filter(u::updated_at.lt(&cutoff)),
            )
            .set((
                u::state.eq(UploadState::Pending.to_string()),
                u::last_error.eq(Some("reclaimed".to_string())),
                u::next_attempt_at.eq(&now),
                u::updated_at.eq(&now),
            ))
            .execute(conn)
            .map(|_| ())
            .map_err(StoreError::from)
        })
        .await
}

/// Claims up to `max_concurrent_uploads` pending, eligible rows by transitioning each to
/// `InFlight` one row at a time via `UPDATE ... WHERE id = ? AND state = 'pending'` — a
/// statement shape that stays a safe compare-and-swap even if this ever ran from more than one
/// process against the same database file.
async fn claim_batch(core: &CoreServices, settings: &ProcessorSettings) -> Result<Vec<UploadJobRow>, StoreError> {
    let now = core.clock.now().to_rfc3339();
    let limit = settings.max_concurrent_uploads as i64;
    core.store
        .with_conn(move |conn| {
            let candidates: Vec<UploadJobRow> = u::upload_jobs
                .filter(u::state.eq(UploadState::Pending.to_string()))
                .filter(u::next_attempt_at.le(&now))
                .order((u::next_attempt_at.asc(), u::id.asc()))
                .limit(limit)
                .load::<UploadJobRow>(conn)?;

            let mut claimed = Vec::with_capacity(candidates.len());
            for candidate in candidates {
                let updated = diesel::update(
                    u::upload_jobs
                        .filter(u::id.eq(candidate.id))
                        .filter(u::state.eq(UploadState::Pending.to_string())),
                )
                .set((u::state.eq(UploadState::InFlight.to_string()), u::updated_at.eq(&now)))
                .execute(conn)?;
                if updated == 1 {
                    claimed.push(candidate);
                }
            }
            Ok(claimed)
        })
        .await
}

/// Returns `true` if the job reached a terminal state (`Succeeded` or `Failed`) this attempt.
async fn process_one(
    core: &CoreServices,
    job: UploadJobRow,
    max_retries: i32,
    retry_delay: Duration,
    max_retry_delay: Duration,
    archive_on_success: bool,
    delete_on_success: bool,
) -> bool {
    let local_path = Utf8PathBuf::from(&job.local_path);
    let deadline = upload_deadline(job.size_bytes as u64);

    let outcome = tokio::time::timeout(
        deadline,
        core.blob
            .upload(&local_path, &job.target_container, &job.target_object_name),
    )
    .await;

    match outcome {
        Ok(Ok(())) => {
            if let Err(e) = apply_disposition(core, &local_path, &job, archive_on_success, delete_on_success).await {
                warn!(job_id = job.id, "disposition failed after successful upload: {e}");
            }
            commit_success(core, job.id).await;
            true
        }
        Ok(Err(UploadOutcome::Permanent(e))) => {
            commit_failed(core, job.id, &e.to_string()).await;
            true
        }
        Ok(Err(UploadOutcome::Transient(e))) => {
            commit_retry_or_fail(core, &job, &e.to_string(), max_retries, retry_delay, max_retry_delay).await
        }
        Err(_timeout) => {
            commit_retry_or_fail(core, &job, "upload timed out", max_retries, retry_delay, max_retry_delay).await
        }
    }
}

/// `size_bytes / 1 MiB/s`, floored at 30s.
fn upload_deadline(size_bytes: u64) -> Duration {
    let estimated = Duration::from_secs(size_bytes / (1024 * 1024) + 1);
    estimated.max(Duration::from_secs(30))
}

async fn apply_disposition(
    core: &CoreServices,
    local_path: &Utf8Path,
    job: &UploadJobRow,
    archive_on_success: bool,
    delete_on_success: bool,
) -> Result<(), DispositionError> {
    if delete_on_success {
        return tokio::fs::remove_file(local_path)
            .await
            .map_err(|source| DispositionError::Delete {
                path: local_path.to_owned(),
                source,
            });
    }
    if !archive_on_success {
        return Ok(());
    }

    let archive_dir = core
        .data_sources
        .get_by_name(&job.data_source_name)
        .await
        .ok()
        .flatten()
        .and_then(|row| row.archive_folder_path)
        .map(Utf8PathBuf::from);
    let Some(archive_dir) = archive_dir else {
        return Ok(());
    };

    let file_name = local_path.file_name().unwrap_or(job.target_object_name.as_str());
    let dest = archive_dir.join(file_name);
    if let Err(source) = tokio::fs::create_dir_all(&archive_dir).await {
        return Err(DispositionError::Archive {
            path: local_path.to_owned(),
            dest,
            source,
        });
    }
    tokio::fs::rename(local_path, &dest)
        .await
        .map_err(|source| DispositionError::Archive {
            path: local_path.to_owned(),
            dest,
            source,
        })
}

async fn commit_success(core: &CoreServices, job_id: i32) {
    let now = core.clock.now().to_rfc3339();
    let res = core
        .store
        .with_conn(move |conn| {
            diesel::update(u::upload_jobs.filter(u::id.eq(job_id)))
                .set((
                    u::state.eq(UploadState::Succeeded.to_string()),
                    u::last_error.eq(None::<String>),
                    u::updated_at.eq(&now),
                ))
                .execute(conn)
                .map(|_| ())
                .map_err(StoreError::from)
        })
        .await;
    if let Err(e) = res {
        error!(job_id, "failed to commit Succeeded state: {e}");
    } else {
        info!(job_id, "upload succeeded");
    }
}

async fn commit_failed(core: &CoreServices, job_id: i32, error_message: &str) {
    let now = core.clock.now().to_rfc3339();
    let error_message = error_message.to_owned();
    let res = core
        .store
        .with_conn(move |conn| {
            diesel::update(u::upload_jobs.filter(u::id.eq(job_id)))
                .set((
                    u::state.eq(UploadState::Failed.to_string()),
                    u::last_error.eq(Some(error_message)),
                    u::updated_at.eq(&now),
                ))
                .execute(conn)
                .map(|_| ())
                .map_err(StoreError::from)
        })
        .await;
    if let Err(e) = res {
        error!(job_id, "failed to commit Failed state: {e}");
    } else {
        warn!(job_id, "upload permanently failed");
    }
}

/// Returns `true` if the job reached `Failed` (exhausted retries), `false` if it went back to
/// `Pending` for another attempt.
async fn commit_retry_or_fail(
    core: &CoreServices,
    job: &UploadJobRow,
    error_message: &str,
    max_retries: i32,
    retry_delay: Duration,
    max_retry_delay: Duration,
) -> bool {
    let attempts = job.attempts + 1;
    let now = core.clock.now();
    let job_id = job.id;
    let error_message = error_message.to_owned();

    if attempts >= max_retries {
        let now_str = now.to_rfc3339();
        let res = core
            .store
            .with_conn(move |conn| {
                diesel::update(u::upload_jobs.filter(u::id.eq(job_id)))
                    .set((
                        u::state.eq(UploadState::Failed.to_string()),
                        u::attempts.eq(attempts),
                        u::last_error.eq(Some(error_message)),
                        u::updated_at.eq(&now_str),
                    ))
                    .execute(conn)
                    .map(|_| ())
                    .map_err(StoreError::from)
            })
            .await;
        if let Err(e) = res {
            error!(job_id, "failed to commit Failed state after retry exhaustion: {e}");
        } else {
            warn!(job_id, attempts, "retries exhausted, marking Failed");
        }
        return true;
    }

    let exponent = attempts.saturating_sub(1).min(62) as u32;
    let backoff = retry_delay
        .checked_mul(1u32.checked_shl(exponent).unwrap_or(u32::MAX))
        .unwrap_or(max_retry_delay)
        .min(max_retry_delay);
    let next_attempt_at = (now + chrono::Duration::from_std(backoff).unwrap_or_default()).to_rfc3339();
    let now_str = now.to_rfc3339();

    let res = core
        .store
        .with_conn(move |conn| {
            diesel::update(u::upload_jobs.filter(u::id.eq(job_id)))
                .set((
                    u::state.eq(UploadState::Pending.to_string()),
                    u::attempts.eq(attempts),
                    u::last_error.eq(Some(error_message)),
                    u::next_attempt_at.eq(&next_attempt_at),
                    u::updated_at.eq(&now_str),
                ))
                .execute(conn)
                .map(|_| ())
                .map_err(StoreError::from)
        })
        .await;
    if let Err(e) = res {
        error!(job_id, "failed to commit retry state: {e}");
    }
    false
}
