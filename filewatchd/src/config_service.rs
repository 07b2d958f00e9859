//! Typed, cached access to the `configurations` table. Every other component reads its tunables
//! through this service rather than querying the store directly.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::{Duration, Instant};

use diesel::prelude::*;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::error::StoreError;
use crate::store::models::ConfigurationRow;
use crate::store::schema::configurations::dsl as c;
use crate::store::Store;

/// Recognized configuration keys. Kept as plain `&str` constants (not an enum) so operators can
/// still add ad hoc keys the core doesn't interpret without the type system fighting them.
pub mod keys {
    pub const PROCESSING_INTERVAL_SECONDS: &str = "App.ProcessingIntervalSeconds";
    pub const MAX_FILE_SIZE_MB: &str = "Upload.MaxFileSizeMB";
    pub const MAX_CONCURRENT_UPLOADS: &str = "Upload.MaxConcurrentUploads";
    pub const MAX_RETRIES: &str = "Upload.MaxRetries";
    pub const RETRY_DELAY_SECONDS: &str = "Upload.RetryDelaySeconds";
    pub const MAX_RETRY_DELAY_MINUTES: &str = "Upload.MaxRetryDelayMinutes";
    pub const ARCHIVE_ON_SUCCESS: &str = "Upload.ArchiveOnSuccess";
    pub const DELETE_ON_SUCCESS: &str = "Upload.DeleteOnSuccess";
    pub const AZURE_STORAGE_CONNECTION_STRING: &str = "Azure.StorageConnectionString";
    pub const AZURE_DEFAULT_CONTAINER: &str = "Azure.DefaultContainer";
    pub const WATCHER_QUIESCENCE_MILLIS: &str = "Watcher.QuiescenceMillis";
    pub const UPLOAD_RECLAIM_MULTIPLIER: &str = "Upload.ReclaimMultiplier";
}

struct CacheEntry {
    value: String,
    fetched_at: Instant,
}

#[derive(Clone)]
pub struct ConfigService {
    store: Store,
    cache: std::sync::Arc<RwLock<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

impl ConfigService {
    pub fn new(store: Store, ttl: Duration) -> Self {
        Self {
            store,
            cache: std::sync::Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.get(key).await?.is_some())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if let Some(entry) = self.cache.read().await.get(key) {
            if entry.fetched_at.elapsed() < self.ttl {
                return Ok(Some(entry.value.clone()));
            }
        }

        let key_owned = key.to_owned();
        let row: Option<ConfigurationRow> = self
            .store
            .with_conn(move |conn| {
                c::configurations
                    .filter(c::key.eq(&key_owned))
                    .first::<ConfigurationRow>(conn)
                    .optional()
                    .map_err(StoreError::from)
            })
            .await?;

        let value = row.map(|r| r.value);
        if let Some(ref v) = value {
            self.cache.write().await.insert(
                key.to_owned(),
                CacheEntry {
                    value: v.clone(),
                    fetched_at: Instant::now(),
                },
            );
        }
        Ok(value)
    }

    pub async fn get_typed<T: FromStr>(&self, key: &str) -> Option<T> {
        match self.get(key).await {
            Ok(Some(raw)) => raw.parse::<T>().ok(),
            _ => None,
        }
    }

    pub async fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key).await {
            Ok(Some(raw)) => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    pub async fn get_duration_seconds(&self, key: &str) -> Option<Duration> {
        self.get_typed::<u64>(key).await.map(Duration::from_secs)
    }

    pub async fn set(
        &self,
        key: &str,
        value: &str,
        category: Option<&str>,
        description: Option<&str>,
    ) -> Result<(), StoreError> {
        let row = ConfigurationRow {
            key: key.to_owned(),
            value: value.to_owned(),
            category: category.map(str::to_owned),
            description: description.map(str::to_owned),
        };
        self.store
            .with_conn(move |conn| {
                diesel::insert_into(c::configurations)
                    .values(&row)
                    .on_conflict(c::key)
                    .do_update()
                    .set(&row)
                    .execute(conn)
                    .map(|_| ())
                    .map_err(StoreError::from)
            })
            .await?;
        self.cache.write().await.remove(key);
        Ok(())
    }

    /// Upserts every `(key, value, category, description)` from the bootstrap defaults document
    /// whose key is not already present. Never overwrites an existing value.
    pub async fn seed_defaults(&self, defaults: &[crate::defaults::DefaultConfig]) -> Result<(), StoreError> {
        for d in defaults {
            if self.exists(&d.key).await? {
                continue;
            }
            info!(key = %d.key, "seeding default configuration value");
            self.set(&d.key, &d.value, Some(&d.category), Some(&d.description))
                .await?;
        }
        Ok(())
    }
}

/// Logs a warning, once, if both disposition settings are enabled simultaneously (delete wins).
pub async fn warn_on_conflicting_disposition(cfg: &ConfigService) {
    let archive = cfg.get_bool(keys::ARCHIVE_ON_SUCCESS).await.unwrap_or(false);
    let delete = cfg.get_bool(keys::DELETE_ON_SUCCESS).await.unwrap_or(false);
    if archive && delete {
        warn!("both Upload.ArchiveOnSuccess and Upload.DeleteOnSuccess are true; delete takes precedence");
    }
}
