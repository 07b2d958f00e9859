//! Blob upload capability used by the upload processor.
//!
//! [`BlobUploader`] is a small CRUD-ish trait, deliberately narrower than a general remote
//! storage abstraction: the upload processor only ever needs to push one file to one object and
//! to ask the backend whether it is reachable. Two backends implement it: [`AzureBlobStorage`]
//! for production and [`LocalFsBlobStorage`] for local development and tests.

mod azure_blob;
mod local_fs;

use std::time::Duration;

use camino::Utf8Path;

pub use azure_blob::AzureBlobStorage;
pub use local_fs::LocalFsBlobStorage;

/// Default per-request timeout applied on top of the per-upload deadline the processor computes
/// from file size (see `filewatchd`'s upload processor).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// The result of a failed upload attempt, classified so the caller knows whether to retry.
#[derive(Debug, thiserror::Error)]
pub enum UploadOutcome {
    /// Network blip, throttling, 5xx: retry with backoff.
    #[error("transient upload error: {0}")]
    Transient(#[source] anyhow::Error),
    /// Bad credentials, malformed name, 4xx: retrying will not help.
    #[error("permanent upload error: {0}")]
    Permanent(#[source] anyhow::Error),
}

/// Outcome of a startup connectivity check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Connected,
    Disconnected(String),
}

/// Capability needed by the upload processor: push a file to a named object, list containers for
/// operator tooling, and report connectivity at startup.
#[async_trait::async_trait]
pub trait BlobUploader: Send + Sync + 'static {
    /// Streams `local_path`'s contents to `object_name` inside `container`. Overwrites any
    /// existing object of the same name, which is what makes retries and replays idempotent.
    async fn upload(
        &self,
        local_path: &Utf8Path,
        container: &str,
        object_name: &str,
    ) -> Result<(), UploadOutcome>;

    /// Advisory: used by the `list-containers` operator subcommand, never by the core loop.
    async fn list_containers(&self) -> anyhow::Result<Vec<String>>;

    /// Startup diagnostic. A disconnected result is logged but does not prevent startup.
    async fn probe(&self) -> ProbeResult;
}
