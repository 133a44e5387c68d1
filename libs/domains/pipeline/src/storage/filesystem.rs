use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

use super::BlobStorage;
use crate::error::{PipelineError, PipelineResult};

#[derive(Debug, Clone, Deserialize)]
pub struct FilesystemConfig {
    /// Directory holding one file per object
    pub root: PathBuf,
}

/// One file per object under a root directory.
pub struct FilesystemStorage {
    root: PathBuf,
}

impl FilesystemStorage {
    /// Open the storage, creating the root directory if needed.
    pub async fn open(config: FilesystemConfig) -> PipelineResult<Self> {
        tokio::fs::create_dir_all(&config.root).await?;
        info!(root = %config.root.display(), "Opened filesystem storage");
        Ok(Self { root: config.root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PipelineResult<PathBuf> {
        let valid = !key.is_empty()
            && key != "."
            && key != ".."
            && !key.contains(['/', '\\', '\0']);
        if !valid {
            return Err(PipelineError::InvalidData(format!(
                "Invalid object key: {key:?}"
            )));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl BlobStorage for FilesystemStorage {
    async fn upload(&self, key: &str, data: &str) -> PipelineResult<()> {
        let path = self.object_path(key)?;
        let staging = self.root.join(format!(".{key}.partial"));

        tokio::fs::write(&staging, data).await?;
        tokio::fs::rename(&staging, &path).await?;

        debug!(key, bytes = data.len(), "Stored object");
        Ok(())
    }

    async fn download(&self, key: &str) -> PipelineResult<String> {
        let path = self.object_path(key)?;
        match tokio::fs::read_to_string(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(PipelineError::ObjectNotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage(dir: &tempfile::TempDir) -> FilesystemStorage {
        FilesystemStorage::open(FilesystemConfig {
            root: dir.path().join("prompts"),
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir).await;
        assert!(storage.root().is_dir());
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir).await;

        storage.upload("6f1c", "prompt body").await.unwrap();
        assert_eq!(storage.download("6f1c").await.unwrap(), "prompt body");

        storage.upload("6f1c", "rewritten").await.unwrap();
        assert_eq!(storage.download("6f1c").await.unwrap(), "rewritten");
        assert!(!storage.root().join(".6f1c.partial").exists());
    }

    #[tokio::test]
    async fn test_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir).await;
        assert!(matches!(
            storage.download("absent").await,
            Err(PipelineError::ObjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage(&dir).await;
        for key in ["", "..", "a/b", "../escape"] {
            assert!(
                matches!(
                    storage.upload(key, "x").await,
                    Err(PipelineError::InvalidData(_))
                ),
                "accepted {key:?}"
            );
        }
    }
}
