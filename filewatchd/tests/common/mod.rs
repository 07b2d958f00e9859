use std::sync::Arc;
use std::time::Duration;

use blob_storage::{BlobUploader, LocalFsBlobStorage};
use camino::Utf8Path;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use filewatchd::clock::{Clock, ManualClock};
use filewatchd::config_service::ConfigService;
use filewatchd::core_services::CoreServices;
use filewatchd::datasource_service::DataSourceService;
use filewatchd::store::models::{NewDataSourceRow, NewUploadJobRow, UploadState};
use filewatchd::store::schema::upload_jobs::dsl as u;
use filewatchd::store::Store;

pub fn epoch_start() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// Builds a `CoreServices` backed by an in-memory store, a local-filesystem blob backend rooted
/// at `blob_root`, and a manual clock started at `start`. The config cache TTL is zero so every
/// test reads see writes from the same test immediately.
pub fn test_core(blob_root: &Utf8Path, start: DateTime<Utc>) -> (CoreServices, Arc<ManualClock>) {
    let store = Store::open_in_memory();
    let config = ConfigService::new(store.clone(), Duration::from_secs(0));
    let data_sources = DataSourceService::new(store.clone());
    let blob: Arc<dyn BlobUploader> = Arc::new(LocalFsBlobStorage::new(blob_root.to_owned()));
    let clock = ManualClock::new(start);
    let clock_dyn: Arc<dyn Clock> = clock.clone();
    (
        CoreServices {
            store,
            config,
            data_sources,
            blob,
            clock: clock_dyn,
        },
        clock,
    )
}

pub async fn add_source(
    core: &CoreServices,
    name: &str,
    folder_path: &Utf8Path,
    archive_folder_path: Option<&Utf8Path>,
    file_pattern: &str,
) {
    core.data_sources
        .create(NewDataSourceRow {
            name: name.to_string(),
            folder_path: folder_path.to_string(),
            archive_folder_path: archive_folder_path.map(|p| p.to_string()),
            file_pattern: file_pattern.to_string(),
            is_enabled: true,
            needs_refresh: false,
            created_at: Utc::now().to_rfc3339(),
        })
        .await
        .expect("creating data source");
}

/// Inserts an `UploadJob` row directly in `Pending` state, bypassing the watcher. Used by tests
/// that exercise the processor in isolation.
pub async fn insert_pending_job(
    core: &CoreServices,
    data_source_name: &str,
    local_path: &Utf8Path,
    size_bytes: i64,
) -> i32 {
    let now = core.clock.now().to_rfc3339();
    let row = NewUploadJobRow {
        data_source_name: data_source_name.to_string(),
        local_path: local_path.to_string(),
        target_container: "default".to_string(),
        target_object_name: local_path.file_name().unwrap().to_string(),
        size_bytes,
        state: UploadState::Pending.to_string(),
        attempts: 0,
        last_error: None,
        next_attempt_at: now.clone(),
        created_at: now.clone(),
        updated_at: now,
    };
    core.store
        .with_conn(move |conn| {
            diesel::insert_into(u::upload_jobs)
                .values(&row)
                .execute(conn)?;
            u::upload_jobs
                .order(u::id.desc())
                .select(u::id)
                .first::<i32>(conn)
                .map_err(filewatchd::error::StoreError::from)
        })
        .await
        .expect("inserting pending job")
}

pub struct JobSnapshot {
    pub state: UploadState,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub next_attempt_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub async fn load_job(core: &CoreServices, id: i32) -> JobSnapshot {
    let row = core
        .store
        .with_conn(move |conn| {
            u::upload_jobs
                .filter(u::id.eq(id))
                .first::<filewatchd::store::models::UploadJobRow>(conn)
                .map_err(filewatchd::error::StoreError::from)
        })
        .await
        .expect("loading job");
    JobSnapshot {
        state: row.parsed_state(),
        attempts: row.attempts,
        last_error: row.last_error,
        next_attempt_at: row.parsed_next_attempt_at(),
        updated_at: row.parsed_updated_at(),
    }
}
