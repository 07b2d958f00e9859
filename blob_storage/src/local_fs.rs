//! Local-filesystem blob backend: a directory tree stands in for containers/objects.
//!
//! Used for development deployments without an Azure account, and by every integration test in
//! `filewatchd` in place of a live Azure container.

use camino::{Utf8Path, Utf8PathBuf};
use tracing::info;

use crate::{ProbeResult, UploadOutcome};

pub struct LocalFsBlobStorage {
    root: Utf8PathBuf,
}

impl LocalFsBlobStorage {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn container_dir(&self, container: &str) -> Utf8PathBuf {
        self.root.join(container)
    }
}

#[async_trait::async_trait]
impl crate::BlobUploader for LocalFsBlobStorage {
    async fn upload(
        &self,
        local_path: &Utf8Path,
        container: &str,
        object_name: &str,
    ) -> Result<(), UploadOutcome> {
        let container_dir = self.container_dir(container);
        tokio::fs::create_dir_all(&container_dir)
            .await
            .map_err(|e| UploadOutcome::Transient(anyhow::anyhow!("creating {container_dir}: {e}")))?;

        let dest = container_dir.join(object_name);
        let mut src = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| UploadOutcome::Permanent(anyhow::anyhow!("opening {local_path}: {e}")))?;
        let mut dst = tokio::fs::File::create(&dest)
            .await
            .map_err(|e| UploadOutcome::Transient(anyhow::anyhow!("creating {dest}: {e}")))?;
        tokio::io::copy(&mut src, &mut dst)
            .await
            .map_err(|e| UploadOutcome::Transient(anyhow::anyhow!("copying into {dest}: {e}")))?;

        info!(container, object_name, "uploaded blob (local fs)");
        Ok(())
    }

    async fn list_containers(&self) -> anyhow::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_owned());
                }
            }
        }
        Ok(names)
    }

    async fn probe(&self) -> ProbeResult {
        match tokio::fs::metadata(&self.root).await {
            Ok(meta) if meta.is_dir() => ProbeResult::Connected,
            Ok(_) => ProbeResult::Disconnected(format!("{} is not a directory", self.root)),
            Err(e) => ProbeResult::Disconnected(e.to_string()),
        }
    }
}
