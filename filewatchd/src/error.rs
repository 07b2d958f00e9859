//! Error taxonomy. Each component boundary gets its own leaf error type; call sites that don't
//! need to match on a specific variant compose these with `anyhow::Context` as usual.

use camino::Utf8PathBuf;

/// Fatal: raised only during startup configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration file {path} could not be read: {source}")]
    Read {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("configuration file {path} is not valid TOML: {source}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("required configuration key {key} is missing or unparseable")]
    MissingRequiredKey { key: &'static str },
}

/// Persistence-store failures. Transient ones (lock contention) are retried once at the call
/// site; the rest propagate and end the current tick early.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database is busy, try again")]
    Busy,
    #[error("database migration failed: {0}")]
    Migration(String),
    #[error(transparent)]
    Query(#[from] diesel::result::Error),
    #[error(transparent)]
    Pool(#[from] diesel::r2d2::PoolError),
    #[error("background task panicked or was cancelled: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Busy)
            || matches!(
                self,
                StoreError::Query(diesel::result::Error::DatabaseError(
                    diesel::result::DatabaseErrorKind::SerializationFailure,
                    _
                ))
            )
    }
}

/// Delivered to a watcher's `on_error` callback. Per-file errors (an oversized file, a file that
/// disappears mid-scan) are reported and the watcher keeps running; only a missing folder at
/// startup prevents the watcher from starting at all, and that case is returned directly from
/// `start` rather than routed through this callback.
#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("folder {path} does not exist or is not a directory")]
    FolderMissing { path: Utf8PathBuf },
    #[error("folder {path} could not be read: {source}")]
    FolderUnreadable {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid file pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },
    #[error("underlying filesystem watcher failed: {0}")]
    Notify(#[from] notify::Error),
    #[error("watcher was already started")]
    AlreadyStarted,
}

/// Disposition (archive/delete) failures are logged but never revert a job's terminal state.
#[derive(Debug, thiserror::Error)]
pub enum DispositionError {
    #[error("failed to delete {path}: {source}")]
    Delete {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to archive {path} to {dest}: {source}")]
    Archive {
        path: Utf8PathBuf,
        dest: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}
