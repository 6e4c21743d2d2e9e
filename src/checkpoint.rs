//! Durable storage of the last dispatched post id.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::forum::PostId;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("failed to access checkpoint {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("checkpoint {path} is corrupt: expected a post number, found {contents:?}")]
    Corrupt { path: PathBuf, contents: String },
}

/// A single durable slot holding the last dispatched [`PostId`].
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Read the stored id. `Ok(None)` means no checkpoint has been written yet.
    async fn read(&self) -> Result<Option<PostId>, CheckpointError>;

    /// Replace the stored id.
    async fn write(&self, id: &PostId) -> Result<(), CheckpointError>;
}

/// Checkpoint kept in a text file holding one post number.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    path: PathBuf,
}

impl FileCheckpointStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn read(&self) -> Result<Option<PostId>, CheckpointError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(e)),
        };

        contents
            .trim()
            .parse::<PostId>()
            .map(Some)
            .map_err(|_| CheckpointError::Corrupt {
                path: self.path.clone(),
                contents,
            })
    }

    async fn write(&self, id: &PostId) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        // The temp file's data must be on disk before the rename is.
        let temp = self.temp_path();
        if let Err(e) = write_synced(&temp, id.as_str()).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(self.io_error(e));
        }
        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(self.io_error(e));
        }

        debug!(path = %self.path.display(), post_id = %id, "Checkpoint written");
        Ok(())
    }
}

async fn write_synced(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    file.write_all(contents.as_bytes()).await?;
    file.sync_all().await
}

/// In-memory checkpoint, for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    value: Mutex<Option<PostId>>,
}

impl MemoryCheckpointStore {
    #[must_use]
    pub fn new(initial: Option<PostId>) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }

    /// Current value without going through the trait.
    pub async fn get(&self) -> Option<PostId> {
        self.value.lock().await.clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn read(&self) -> Result<Option<PostId>, CheckpointError> {
        Ok(self.value.lock().await.clone())
    }

    async fn write(&self, id: &PostId) -> Result<(), CheckpointError> {
        *self.value.lock().await = Some(id.clone());
        Ok(())
    }
}
