//! OCI archive provider: a tarred OCI layout.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use imgsrc_core::error::{ImageError, Result};

use super::layout::OciLayout;
use crate::image::Image;
use crate::provider::Provider;
use crate::source::Source;
use crate::tempdir::TempDirGenerator;

/// Provides an image from an OCI archive by unpacking it into a temp dir.
#[derive(Debug, Clone)]
pub struct OciArchiveProvider {
    path: PathBuf,
    temp: TempDirGenerator,
}

impl OciArchiveProvider {
    pub fn new(path: impl Into<PathBuf>, temp: TempDirGenerator) -> Self {
        Self {
            path: path.into(),
            temp,
        }
    }
}

fn unpack(archive: &Path, target: &Path) -> Result<()> {
    let file = std::fs::File::open(archive).map_err(|e| ImageError::Archive {
        path: archive.display().to_string(),
        message: format!("unable to open archive: {}", e),
    })?;
    tar::Archive::new(file)
        .unpack(target)
        .map_err(|e| ImageError::Archive {
            path: archive.display().to_string(),
            message: format!("unable to unpack archive: {}", e),
        })
}

#[async_trait]
impl Provider for OciArchiveProvider {
    async fn provide(&self) -> Result<Image> {
        let target = self.temp.new_temp_dir()?;
        tracing::debug!(
            archive = %self.path.display(),
            target = %target.display(),
            "Unpacking OCI archive"
        );

        let archive = self.path.clone();
        let image = tokio::task::spawn_blocking(move || {
            unpack(&archive, &target)?;
            OciLayout::open(&target)?.to_image(Source::OciTarball, archive.display().to_string())
        })
        .await
        .map_err(|e| ImageError::Other(format!("archive unpack task failed: {}", e)))??;

        Ok(image)
    }
}
