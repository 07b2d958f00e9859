//! Reconciles the running watcher set against the `file_data_sources` table on every tick and
//! drives the upload processor. Modeled on `safekeeper`'s `timeline_manager::main_task`: a single
//! task owns all mutable state and alternates tick-work with a cancellation-aware sleep.
//!
//! The running-watcher map is owned solely by this task — never a global, never shared.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config_service::keys;
use crate::core_services::CoreServices;
use crate::processor;
use crate::store::models::DataSourceRow;
use crate::watcher::{self, RunningWatcher, WatcherConfig};

pub struct Supervisor {
    core: CoreServices,
    cancel: CancellationToken,
    running: HashMap<String, RunningWatcher>,
}

impl Supervisor {
    pub fn new(core: CoreServices, cancel: CancellationToken) -> Self {
        Self {
            core,
            cancel,
            running: HashMap::new(),
        }
    }

    /// The instance id of the currently running watcher for `name`, if any. Exposed for tests
    /// that need to confirm a refresh replaced the watcher rather than reusing it.
    pub fn watcher_instance_id(&self, name: &str) -> Option<tokio::task::Id> {
        self.running.get(name).map(|w| w.instance_id())
    }

    pub fn is_watching(&self, name: &str) -> bool {
        self.running.contains_key(name)
    }

    pub async fn run(mut self) {
        loop {
            if let Err(e) = self.tick().await {
                error!("supervisor tick failed: {e}");
            }

            let interval = self
                .core
                .config
                .get_duration_seconds(keys::PROCESSING_INTERVAL_SECONDS)
                .await
                .unwrap_or(Duration::from_secs(30));

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        info!("supervisor shutting down, stopping all watchers");
        let stragglers: Vec<_> = self.running.drain().collect();
        for (name, watcher) in stragglers {
            info!(data_source = %name, "stopping watcher");
            watcher.stop().await;
        }
    }

    /// Runs exactly one reconciliation pass: start/stop/refresh watchers against the current
    /// `file_data_sources` table, then drive the upload processor once. Exposed as its own method
    /// (rather than folded into `run`'s loop) so tests can observe a single pass deterministically
    /// without waiting on the real tick timer.
    pub async fn tick(&mut self) -> Result<(), crate::error::StoreError> {
        let sources = self.core.data_sources.list_all().await?;
        let by_name: HashMap<&str, &DataSourceRow> =
            sources.iter().map(|s| (s.name.as_str(), s)).collect();

        // Stop watchers for sources that disappeared or now need a refresh.
        let mut to_restart = Vec::new();
        for name in self.running.keys().cloned().collect::<Vec<_>>() {
            match by_name.get(name.as_str()) {
                None => {
                    self.stop_watcher(&name).await;
                }
                Some(source) if source.needs_refresh => {
                    to_restart.push(name);
                }
                Some(source) if !source.is_enabled => {
                    self.stop_watcher(&name).await;
                }
                Some(_) => {}
            }
        }
        for name in to_restart {
            self.stop_watcher(&name).await;
        }

        // Start watchers for enabled sources with none running. Honors `is_enabled`: a source
        // with `is_enabled = false` never gets a watcher, matching the corrected behavior.
        for source in &sources {
            if source.is_enabled && !self.running.contains_key(&source.name) {
                self.start_watcher(source).await;
            }
            if source.needs_refresh {
                if let Err(e) = self.core.data_sources.clear_needs_refresh(&source.name).await {
                    warn!(data_source = %source.name, "failed to clear needs_refresh: {e}");
                }
            }
        }

        let settings = processor::load_settings(&self.core).await;
        match processor::run_once(&self.core, &settings).await {
            Ok(n) if n > 0 => info!(terminal_jobs = n, "processor pass complete"),
            Ok(_) => {}
            Err(e) => error!("processor pass failed: {e}"),
        }

        Ok(())
    }

    async fn stop_watcher(&mut self, name: &str) {
        if let Some(watcher) = self.running.remove(name) {
            watcher.stop().await;
        }
    }

    async fn start_watcher(&mut self, source: &DataSourceRow) {
        let default_container = self
            .core
            .config
            .get(keys::AZURE_DEFAULT_CONTAINER)
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| "uploads".to_string());
        let quiescence_ms = self
            .core
            .config
            .get_typed::<u64>(keys::WATCHER_QUIESCENCE_MILLIS)
            .await
            .unwrap_or(1000);
        let max_file_size_bytes = self
            .core
            .config
            .get_typed::<u64>(keys::MAX_FILE_SIZE_MB)
            .await
            .unwrap_or(500)
            * 1024
            * 1024;

        let config = WatcherConfig {
            name: source.name.clone(),
            folder_path: Utf8PathBuf::from(&source.folder_path),
            file_pattern: source.file_pattern.clone(),
            default_container,
            quiescence: Duration::from_millis(quiescence_ms),
            max_file_size_bytes,
        };

        let name_for_log = source.name.clone();
        let on_error: Arc<dyn Fn(crate::error::WatcherError) + Send + Sync> = {
            let name = name_for_log.clone();
            Arc::new(move |e| {
                warn!(data_source = %name, "watcher error: {e}");
            })
        };

        match watcher::start(config, self.core.clone(), &self.cancel, on_error) {
            Ok(handle) => {
                info!(data_source = %name_for_log, "watcher started");
                self.running.insert(name_for_log, handle);
            }
            Err(e) => {
                warn!(data_source = %name_for_log, "failed to start watcher: {e}");
            }
        }
    }
}
