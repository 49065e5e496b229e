//! Durable file storage for generated images

use bytes::Bytes;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

use crate::error::{AppError, Result};

/// One file per fingerprint under a fixed directory
pub struct FileStore {
    storage_path: PathBuf,
}

impl FileStore {
    /// Create a new file store
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
        }
    }

    /// Ensure the storage directory exists
    pub async fn ensure_storage_dir(&self) -> Result<()> {
        if !fs::try_exists(&self.storage_path).await.unwrap_or(false) {
            fs::create_dir_all(&self.storage_path).await?;
            debug!(path = ?self.storage_path, "Created storage directory");
        }
        Ok(())
    }

    /// Read a stored image, `None` if it was never written
    pub async fn read(&self, file_name: &str) -> Result<Option<Bytes>> {
        match fs::read(self.get_path(file_name)).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Write an image, replacing any previous content
    ///
    /// Data goes to a temporary file first so readers never see a partial image.
    pub async fn write(&self, file_name: &str, data: &[u8]) -> Result<PathBuf> {
        self.ensure_storage_dir().await?;

        let file_path = self.get_path(file_name);
        let tmp_path = self.get_path(&format!(".{}.tmp", file_name));

        fs::write(&tmp_path, data).await?;
        fs::rename(&tmp_path, &file_path).await?;

        debug!(path = ?file_path, size = data.len(), "Saved image file");

        Ok(file_path)
    }

    /// Get the full path for a file name
    pub fn get_path(&self, file_name: &str) -> PathBuf {
        self.storage_path.join(file_name)
    }
}
