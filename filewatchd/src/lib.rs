pub mod clock;
pub mod config_service;
pub mod core_services;
pub mod datasource_service;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod process_config;
pub mod processor;
pub mod store;
pub mod supervisor;
pub mod watcher;

use std::sync::Arc;
use std::time::Duration;

use blob_storage::{AzureBlobStorage, BlobUploader, LocalFsBlobStorage};
use camino::Utf8Path;

use crate::clock::{Clock, SystemClock};
use crate::config_service::{keys, ConfigService};
use crate::core_services::CoreServices;
use crate::datasource_service::DataSourceService;
use crate::store::Store;

/// A short TTL keeps the configuration cache from going stale for more than a fraction of a
/// supervisor tick, without hammering the store on every single read.
pub const CONFIG_CACHE_TTL: Duration = Duration::from_secs(5);

/// Opens the store, seeds bootstrap defaults, and builds the blob uploader the configured
/// backend points at. `local_fs_root`, when set, forces the local-filesystem backend regardless
/// of `Azure.StorageConnectionString` — used by tests and by operators without an Azure account.
pub async fn bootstrap(
    database_url: &str,
    local_fs_root: Option<&Utf8Path>,
) -> anyhow::Result<CoreServices> {
    let store = Store::open(database_url)?;
    let config = ConfigService::new(store.clone(), CONFIG_CACHE_TTL);
    config.seed_defaults(&defaults::load()).await?;
    config_service::warn_on_conflicting_disposition(&config).await;

    let data_sources = DataSourceService::new(store.clone());
    let blob: Arc<dyn BlobUploader> = build_blob_uploader(&config, local_fs_root).await?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    Ok(CoreServices {
        store,
        config,
        data_sources,
        blob,
        clock,
    })
}

async fn build_blob_uploader(
    config: &ConfigService,
    local_fs_root: Option<&Utf8Path>,
) -> anyhow::Result<Arc<dyn BlobUploader>> {
    if let Some(root) = local_fs_root {
        return Ok(Arc::new(LocalFsBlobStorage::new(root.to_owned())));
    }

    let connection_string = config
        .get(keys::AZURE_STORAGE_CONNECTION_STRING)
        .await?
        .filter(|s| !s.is_empty())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "Azure.StorageConnectionString is not set; configure it or pass --local-fs-root"
            )
        })?;
    let default_container = config
        .get(keys::AZURE_DEFAULT_CONTAINER)
        .await?
        .unwrap_or_else(|| "uploads".to_string());
    Ok(Arc::new(AzureBlobStorage::new(
        &connection_string,
        default_container,
    )?))
}
