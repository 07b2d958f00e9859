//! One folder watcher per `DataSource`. Observes `folder_path` for files matching `file_pattern`,
//! waits for each file to go quiescent (size stable across the configured window), and enqueues
//! an `UploadJob` once it is ready. Built on `notify` (already part of the teacher's dependency
//! set, used by `compute_tools`), bridging its synchronous event channel into the async world on
//! a dedicated blocking thread.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use diesel::prelude::*;
use notify::{RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcherTrait};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core_services::CoreServices;
use crate::error::WatcherError;
use crate::store::models::{NewUploadJobRow, UploadJobRow, UploadState};
use crate::store::schema::upload_jobs::dsl as u;

/// A running watcher instance. Dropping it (or calling `stop`) cancels its background task and
/// releases the underlying OS watch handle.
pub struct RunningWatcher {
    data_source_name: String,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RunningWatcher {
    pub fn data_source_name(&self) -> &str {
        &self.data_source_name
    }

    /// Identifies this particular watcher instance, distinct from any instance that preceded or
    /// follows it for the same data source. Used by tests to confirm a refresh actually replaced
    /// the running watcher rather than reusing it.
    pub fn instance_id(&self) -> tokio::task::Id {
        self.task.id()
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!(data_source = %self.data_source_name, "watcher task panicked: {e}");
            }
        }
    }
}

struct TrackedFile {
    last_size: u64,
    last_changed: std::time::Instant,
}

#[derive(Clone)]
pub struct WatcherConfig {
    pub name: String,
    pub folder_path: Utf8PathBuf,
    pub file_pattern: String,
    pub default_container: String,
    pub quiescence: Duration,
    pub max_file_size_bytes: u64,
}

/// An unstarted watcher instance. Constructing one does not touch the filesystem; `start` does
/// that, exactly once. A second call to `start` against the same instance returns
/// `WatcherError::AlreadyStarted` rather than spawning a second OS watch — per spec §4.5, `start`
/// "must be idempotent per instance (calling twice is an error)". The supervisor never reuses a
/// stopped watcher's instance across a restart; it always builds a fresh `Watcher` (see `DESIGN.md`
/// §9 Open Question #2), so this guard is purely an invariant check, never a thing the supervisor
/// itself needs to route around.
pub struct Watcher {
    config: WatcherConfig,
    started: std::sync::atomic::AtomicBool,
}

impl Watcher {
    pub fn new(config: WatcherConfig) -> Self {
        Self {
            config,
            started: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Begins observation, parented to `parent_cancel` via a fresh child token (never the
    /// parent's own token, and never reused across restarts — each call allocates a new one).
    pub fn start(
        &self,
        core: CoreServices,
        parent_cancel: &CancellationToken,
        on_error: Arc<dyn Fn(WatcherError) + Send + Sync>,
    ) -> Result<RunningWatcher, WatcherError> {
        if self.started.swap(true, std::sync::atomic::Ordering::SeqCst) {
            return Err(WatcherError::AlreadyStarted);
        }
        start_inner(self.config.clone(), core, parent_cancel, on_error)
    }
}

/// Convenience wrapper over `Watcher::new(config).start(..)` for callers that never need to
/// observe the idempotency guard directly (the supervisor, and most tests, construct a fresh
/// watcher per start and never hold onto the instance).
pub fn start(
    config: WatcherConfig,
    core: CoreServices,
    parent_cancel: &CancellationToken,
    on_error: Arc<dyn Fn(WatcherError) + Send + Sync>,
) -> Result<RunningWatcher, WatcherError> {
    Watcher::new(config).start(core, parent_cancel, on_error)
}

fn start_inner(
    config: WatcherConfig,
    core: CoreServices,
    parent_cancel: &CancellationToken,
    on_error: Arc<dyn Fn(WatcherError) + Send + Sync>,
) -> Result<RunningWatcher, WatcherError> {
    if !config.folder_path.is_dir() {
        return Err(WatcherError::FolderMissing {
            path: config.folder_path.clone(),
        });
    }
    let pattern = glob::Pattern::new(&config.file_pattern).map_err(|source| {
        WatcherError::InvalidPattern {
            pattern: config.file_pattern.clone(),
            source,
        }
    })?;

    let cancel = parent_cancel.child_token();
    let data_source_name = config.name.clone();

    let (tx, mut rx) = mpsc::unbounded_channel::<notify::Event>();
    let mut notify_watcher: RecommendedWatcher = notify::recommended_watcher(move |res| {
        if let Ok(event) = res {
            let _ = tx.send(event);
        }
    })?;
    notify_watcher
        .watch(config.folder_path.as_std_path(), RecursiveMode::NonRecursive)?;

    let task_cancel = cancel.clone();
    let task = tokio::spawn(async move {
        // Keep the notify watcher alive for the lifetime of this task; it stops observing and
        // releases its OS handle when dropped at task exit.
        let _notify_watcher = notify_watcher;

        let seen_this_session: Mutex<HashSet<Utf8PathBuf>> = Mutex::new(HashSet::new());
        let mut tracked: HashMap<Utf8PathBuf, TrackedFile> = HashMap::new();

        if let Err(e) = cold_start_rescan(&config, &core, &pattern, &seen_this_session, on_error.as_ref()).await {
            on_error(e);
        }

        let mut poll = tokio::time::interval(config.quiescence.min(Duration::from_millis(250)).max(Duration::from_millis(50)));

        loop {
            tokio::select! {
                _ = task_cancel.cancelled() => {
                    info!(data_source = %config.name, "watcher stopping");
                    break;
                }
                maybe_event = rx.recv() => {
                    let Some(event) = maybe_event else { break };
                    for path in event.paths {
                        let Ok(path) = Utf8PathBuf::from_path_buf(path) else { continue };
                        if !matches_pattern(&pattern, &path) {
                            continue;
                        }
                        if let Ok(meta) = std::fs::metadata(&path) {
                            tracked.insert(
                                path,
                                TrackedFile { last_size: meta.len(), last_changed: std::time::Instant::now() },
                            );
                        }
                    }
                }
                _ = poll.tick() => {
                    let mut ready = Vec::new();
                    for (path, state) in tracked.iter_mut() {
                        let Ok(meta) = std::fs::metadata(path) else {
                            continue;
                        };
                        if meta.len() != state.last_size {
                            state.last_size = meta.len();
                            state.last_changed = std::time::Instant::now();
                            continue;
                        }
                        if state.last_changed.elapsed() >= config.quiescence {
                            ready.push((path.clone(), meta.len()));
                        }
                    }
                    for (path, size) in ready {
                        tracked.remove(&path);
                        if seen_this_session.lock().unwrap().contains(&path) {
                            continue;
                        }
                        if size > config.max_file_size_bytes {
                            on_error(WatcherError::FolderUnreadable {
                                path: path.clone(),
                                source: std::io::Error::new(std::io::ErrorKind::InvalidData, "file exceeds Upload.MaxFileSizeMB"),
                            });
                            seen_this_session.lock().unwrap().insert(path);
                            continue;
                        }
                        if let Err(e) = enqueue(&config, &core, &path, size).await {
                            warn!(data_source = %config.name, %path, "failed to enqueue upload job: {e}");
                            continue;
                        }
                        seen_this_session.lock().unwrap().insert(path);
                    }
                }
            }
        }
    });

    Ok(RunningWatcher {
        data_source_name,
        cancel,
        task,
    })
}

fn matches_pattern(pattern: &glob::Pattern, path: &Utf8Path) -> bool {
    path.file_name()
        .map(|name| pattern.matches(name))
        .unwrap_or(false)
}

async fn cold_start_rescan(
    config: &WatcherConfig,
    core: &CoreServices,
    pattern: &glob::Pattern,
    seen_this_session: &Mutex<HashSet<Utf8PathBuf>>,
    on_error: &(dyn Fn(WatcherError) + Send + Sync),
) -> Result<(), WatcherError> {
    let entries = std::fs::read_dir(config.folder_path.as_std_path()).map_err(|source| {
        WatcherError::FolderUnreadable {
            path: config.folder_path.clone(),
            source,
        }
    })?;

    for entry in entries.flatten() {
        let Ok(path) = Utf8PathBuf::from_path_buf(entry.path()) else { continue };
        if !matches_pattern(pattern, &path) {
            continue;
        }
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        if already_has_terminal_or_inflight_job(core, &path).await.unwrap_or(false) {
            seen_this_session.lock().unwrap().insert(path);
            continue;
        }
        if meta.len() > config.max_file_size_bytes {
            on_error(WatcherError::FolderUnreadable {
                path: path.clone(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "file exceeds Upload.MaxFileSizeMB",
                ),
            });
            seen_this_session.lock().unwrap().insert(path);
            continue;
        }
        if let Err(e) = enqueue(config, core, &path, meta.len()).await {
            debug!("cold-start enqueue failed for {path}: {e}");
            continue;
        }
        seen_this_session.lock().unwrap().insert(path);
    }
    Ok(())
}

async fn already_has_terminal_or_inflight_job(
    core: &CoreServices,
    path: &Utf8Path,
) -> Result<bool, crate::error::StoreError> {
    let path = path.to_string();
    core.store
        .with_conn(move |conn| {
            let rows: Vec<UploadJobRow> = u::upload_jobs
                .filter(u::local_path.eq(&path))
                .load::<UploadJobRow>(conn)?;
            Ok(rows.iter().any(|r| {
                matches!(
                    r.parsed_state(),
                    UploadState::Succeeded | UploadState::InFlight
                )
            }))
        })
        .await
}

async fn enqueue(
    config: &WatcherConfig,
    core: &CoreServices,
    path: &Utf8Path,
    size: u64,
) -> Result<(), crate::error::StoreError> {
    let now = core.clock.now();
    let object_name = path
        .file_name()
        .map(str::to_owned)
        .unwrap_or_else(|| path.to_string());
    let row = NewUploadJobRow {
        data_source_name: config.name.clone(),
        local_path: path.to_string(),
        target_container: config.default_container.clone(),
        target_object_name: object_name,
        size_bytes: size as i64,
        state: UploadState::Pending.to_string(),
        attempts: 0,
        last_error: None,
        next_attempt_at: now.to_rfc3339(),
        created_at: now.to_rfc3339(),
        updated_at: now.to_rfc3339(),
    };
    core.store
        .with_conn(move |conn| {
            diesel::insert_into(u::upload_jobs)
                .values(&row)
                .execute(conn)
                .map(|_| ())
                .map_err(crate::error::StoreError::from)
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use blob_storage::{BlobUploader, LocalFsBlobStorage};

    use crate::clock::{Clock, SystemClock};
    use crate::config_service::ConfigService;
    use crate::core_services::CoreServices;
    use crate::datasource_service::DataSourceService;
    use crate::store::Store;

    fn test_core(blob_root: &Utf8Path) -> CoreServices {
        let store = Store::open_in_memory();
        let config = ConfigService::new(store.clone(), Duration::from_secs(0));
        let data_sources = DataSourceService::new(store.clone());
        let blob: Arc<dyn BlobUploader> = Arc::new(LocalFsBlobStorage::new(blob_root.to_owned()));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        CoreServices {
            store,
            config,
            data_sources,
            blob,
            clock,
        }
    }

    #[tokio::test]
    async fn start_twice_on_the_same_instance_is_an_error() {
        let folder = camino_tempfile::tempdir().unwrap();
        let blob_root = camino_tempfile::tempdir().unwrap();
        let core = test_core(blob_root.path());
        let watcher = Watcher::new(WatcherConfig {
            name: "S1".to_string(),
            folder_path: folder.path().to_owned(),
            file_pattern: "*".to_string(),
            default_container: "uploads".to_string(),
            quiescence: Duration::from_millis(50),
            max_file_size_bytes: 1024,
        });
        let cancel = CancellationToken::new();
        let on_error: Arc<dyn Fn(WatcherError) + Send + Sync> =
            Arc::new(|e| panic!("unexpected watcher error: {e}"));

        let first = watcher
            .start(core.clone(), &cancel, on_error.clone())
            .expect("first start succeeds");

        let second = watcher.start(core.clone(), &cancel, on_error);
        assert!(matches!(second, Err(WatcherError::AlreadyStarted)));

        first.stop().await;
    }
}
