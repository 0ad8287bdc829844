//! Persisting captured photos.

use async_trait::async_trait;
use chrono::Local;
use image::ImageFormat;
use obscura::CapturedPhoto;
use std::io::Cursor;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to encode photo: {message}")]
    Encode { message: String },
}

/// Where photos go once the capture pipeline is done with them.
#[async_trait]
pub trait PhotoStore: Send + Sync {
    async fn save(&self, photo: &CapturedPhoto) -> Result<PathBuf, StoreError>;
}

/// Writes each photo as a PNG under one directory, creating the
/// directory on demand.
pub struct FsPhotoStore {
    root: PathBuf,
}

impl FsPhotoStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn file_name(photo: &CapturedPhoto) -> String {
        let stamp = Local::now().format("%Y%m%d-%H%M%S");
        let id = photo.request_id.simple().to_string();
        format!("shutter-{stamp}-{}.png", &id[..8])
    }
}

#[async_trait]
impl PhotoStore for FsPhotoStore {
    async fn save(&self, photo: &CapturedPhoto) -> Result<PathBuf, StoreError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StoreError::Io {
                path: self.root.clone(),
                source: e,
            })?;

        let mut encoded = Cursor::new(Vec::new());
        photo
            .image
            .write_to(&mut encoded, ImageFormat::Png)
            .map_err(|e| StoreError::Encode {
                message: e.to_string(),
            })?;

        let path = self.root.join(Self::file_name(photo));
        tokio::fs::write(&path, encoded.into_inner())
            .await
            .map_err(|e| StoreError::Io {
                path: path.clone(),
                source: e,
            })?;

        info!(
            path = %path.display(),
            width = photo.width,
            height = photo.height,
            "photo saved"
        );
        Ok(path)
    }
}
