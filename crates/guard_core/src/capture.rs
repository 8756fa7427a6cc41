use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use shared::{domain::PhotoRef, error::GuardError};
use tracing::{info, warn};

#[async_trait]
pub trait CameraDevice: Send + Sync {
    fn is_ready(&self) -> bool;
    async fn take_picture(&self) -> Result<PathBuf>;
}

pub struct MissingCamera;

#[async_trait]
impl CameraDevice for MissingCamera {
    fn is_ready(&self) -> bool {
        false
    }

    async fn take_picture(&self) -> Result<PathBuf> {
        Err(anyhow!("camera is unavailable"))
    }
}

pub struct CaptureAdapter {
    camera: Arc<dyn CameraDevice>,
    photo_dir: PathBuf,
}

impl CaptureAdapter {
    pub fn new(camera: Arc<dyn CameraDevice>, photo_dir: impl Into<PathBuf>) -> Self {
        Self {
            camera,
            photo_dir: photo_dir.into(),
        }
    }

    pub fn photo_dir(&self) -> &Path {
        &self.photo_dir
    }

    /// Takes exactly one picture and moves it into the photo directory as
    /// `intruder_<unix-millis>.jpg`. Never retries.
    pub async fn capture_photo(&self) -> std::result::Result<PhotoRef, GuardError> {
        if !self.camera.is_ready() {
            return Err(GuardError::capture("camera is not ready"));
        }

        let shot = self
            .camera
            .take_picture()
            .await
            .map_err(|err| GuardError::capture(format!("failed to take picture: {err:#}")))?;

        let captured_at = Utc::now();
        let target = self.photo_dir.join(format!(
            "intruder_{}.jpg",
            captured_at.timestamp_millis()
        ));
        relocate(&shot, &self.photo_dir, &target)
            .await
            .map_err(|err| GuardError::capture(format!("failed to store photo: {err:#}")))?;

        info!(path = %target.display(), "photo captured");
        Ok(PhotoRef {
            path: target,
            captured_at,
        })
    }
}

async fn relocate(from: &Path, dir: &Path, to: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create photo directory '{}'", dir.display()))?;

    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    // rename fails across filesystems
    tokio::fs::copy(from, to).await.with_context(|| {
        format!(
            "failed to copy '{}' to '{}'",
            from.display(),
            to.display()
        )
    })?;
    if let Err(err) = tokio::fs::remove_file(from).await {
        warn!(path = %from.display(), error = %err, "failed to remove scratch photo");
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/capture_tests.rs"]
mod tests;
