//! Azure Blob Storage backend.
//!
//! Uploads go through `put_block` / `put_block_list` rather than a single `put_block_blob` call
//! so that the file is streamed in bounded-size chunks instead of being buffered whole into RAM.

use std::sync::atomic::{AtomicU64, Ordering};

use azure_core::StatusCode;
use azure_storage::prelude::*;
use azure_storage_blobs::prelude::*;
use camino::Utf8Path;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};

use crate::{ProbeResult, UploadOutcome};

/// Each block is read into memory once, uploaded, then dropped; this bounds peak memory to one
/// block regardless of file size.
const BLOCK_SIZE_BYTES: usize = 4 * 1024 * 1024;

pub struct AzureBlobStorage {
    service_client: BlobServiceClient,
    default_container: String,
    block_id_counter: AtomicU64,
}

impl AzureBlobStorage {
    pub fn new(connection_string: &str, default_container: impl Into<String>) -> anyhow::Result<Self> {
        let parsed = azure_storage::ConnectionString::new(connection_string)
            .map_err(|e| anyhow::anyhow!("invalid Azure storage connection string: {e}"))?;
        let account = parsed
            .account_name
            .ok_or_else(|| anyhow::anyhow!("Azure connection string is missing AccountName"))?
            .to_owned();
        let credentials = StorageCredentials::connection_string(connection_string)
            .map_err(|e| anyhow::anyhow!("invalid Azure storage credentials: {e}"))?;
        let service_client = BlobServiceClient::new(account, credentials);
        Ok(Self {
            service_client,
            default_container: default_container.into(),
            block_id_counter: AtomicU64::new(0),
        })
    }

    fn container_client(&self, container: &str) -> ContainerClient {
        self.service_client.container_client(container)
    }

    fn next_block_id(&self) -> String {
        let n = self.block_id_counter.fetch_add(1, Ordering::Relaxed);
        // Block ids must be equal length base64 strings within one blob's upload; zero-padding
        // the counter keeps every id the same length.
        base64::encode(format!("block-{n:010}"))
    }

    fn classify_http_error(err: &azure_core::Error) -> UploadOutcome {
        match err.as_http_error().map(|e| e.status()) {
            Some(StatusCode::Unauthorized)
            | Some(StatusCode::Forbidden)
            | Some(StatusCode::BadRequest)
            | Some(StatusCode::NotFound)
            | Some(StatusCode::Conflict) => {
                UploadOutcome::Permanent(anyhow::anyhow!("{err}"))
            }
            _ => UploadOutcome::Transient(anyhow::anyhow!("{err}")),
        }
    }
}

#[async_trait::async_trait]
impl crate::BlobUploader for AzureBlobStorage {
    async fn upload(
        &self,
        local_path: &Utf8Path,
        container: &str,
        object_name: &str,
    ) -> Result<(), UploadOutcome> {
        let container = if container.is_empty() {
            self.default_container.as_str()
        } else {
            container
        };
        let blob_client = self.container_client(container).blob_client(object_name);

        let mut file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| UploadOutcome::Transient(anyhow::anyhow!("opening {local_path}: {e}")))?;

        let mut block_ids = Vec::new();
        let mut buf = vec![0u8; BLOCK_SIZE_BYTES];
        loop {
            let n = file
                .read(&mut buf)
                .await
                .map_err(|e| UploadOutcome::Transient(anyhow::anyhow!("reading {local_path}: {e}")))?;
            if n == 0 {
                break;
            }
            let block_id = self.next_block_id();
            let body = azure_core::Body::Bytes(buf[..n].to_vec().into());
            blob_client
                .put_block(block_id.clone(), body)
                .into_future()
                .await
                .map_err(|e| Self::classify_http_error(&e))?;
            block_ids.push(block_id);
        }

        // Zero-byte files still need one committed, empty block list.
        let block_list = BlockList {
            blocks: block_ids
                .into_iter()
                .map(|id| BlobBlockType::Uncommitted(BlockId::new(id)))
                .collect(),
        };
        blob_client
            .put_block_list(block_list)
            .into_future()
            .await
            .map_err(|e| Self::classify_http_error(&e))?;

        info!(container, object_name, "uploaded blob");
        Ok(())
    }

    async fn list_containers(&self) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut stream = self.service_client.list_containers().into_stream();
        use futures::StreamExt;
        while let Some(page) = stream.next().await {
            let page = page?;
            names.extend(page.containers.into_iter().map(|c| c.name));
        }
        Ok(names)
    }

    async fn probe(&self) -> ProbeResult {
        match self.list_containers().await {
            Ok(_) => ProbeResult::Connected,
            Err(e) => {
                warn!("azure blob probe failed: {e}");
                ProbeResult::Disconnected(e.to_string())
            }
        }
    }
}
