//! Docker archive provider.
//!
//! Reads images in the format written by `docker save`: a tar holding
//! `manifest.json`, the config blob and one tarball per layer.

use std::fs::File;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use imgsrc_core::error::{ImageError, Result};
use serde::Deserialize;

use crate::archive::read_member_from_start;
use crate::image::{parse_config_blob, Image, ImageMetadata};
use crate::provider::Provider;
use crate::source::Source;

const MANIFEST_FILE: &str = "manifest.json";

/// One entry of a docker archive's `manifest.json`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ArchiveManifestEntry {
    /// Archive path of the config blob
    pub config: String,
    #[serde(default)]
    pub repo_tags: Option<Vec<String>>,
    /// Archive paths of the layer tarballs, bottom to top
    #[serde(default)]
    pub layers: Vec<String>,
}

/// Provides an image from a docker archive file.
#[derive(Debug, Clone)]
pub struct DockerArchiveProvider {
    path: PathBuf,
    tags: Vec<String>,
    digests: Vec<String>,
}

impl DockerArchiveProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            tags: Vec::new(),
            digests: Vec::new(),
        }
    }

    /// Tags to report instead of the archive's own `RepoTags`.
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_digests(mut self, digests: Vec<String>) -> Self {
        self.digests = digests;
        self
    }

    fn archive_error(&self, message: impl std::fmt::Display) -> ImageError {
        ImageError::Archive {
            path: self.path.display().to_string(),
            message: message.to_string(),
        }
    }

    fn read(&self, archive: &mut File, member: &str) -> Result<Vec<u8>> {
        read_member_from_start(archive, member)
            .map_err(|e| self.archive_error(format!("unable to read {}: {}", member, e)))?
            .ok_or_else(|| self.archive_error(format!("missing {}", member)))
    }

    /// Read the archive synchronously.
    pub fn load(&self) -> Result<Image> {
        let mut archive = File::open(&self.path)
            .map_err(|e| self.archive_error(format!("unable to open archive: {}", e)))?;

        let manifest_bytes = self.read(&mut archive, MANIFEST_FILE)?;
        let entries: Vec<ArchiveManifestEntry> = serde_json::from_slice(&manifest_bytes)
            .map_err(|e| self.archive_error(format!("invalid {}: {}", MANIFEST_FILE, e)))?;
        let entry = entries
            .into_iter()
            .next()
            .ok_or_else(|| self.archive_error(format!("{} lists no images", MANIFEST_FILE)))?;

        let config_bytes = self.read(&mut archive, &entry.config)?;
        let (id, config, layers) = parse_config_blob(&config_bytes)
            .map_err(|e| self.archive_error(format!("invalid image config: {}", e)))?;

        if layers.len() != entry.layers.len() {
            tracing::debug!(
                path = %self.path.display(),
                diff_ids = layers.len(),
                layer_files = entry.layers.len(),
                "Layer count mismatch between config and manifest"
            );
        }

        let tags = if self.tags.is_empty() {
            entry.repo_tags.unwrap_or_default()
        } else {
            self.tags.clone()
        };
        let size = archive
            .metadata()
            .map_err(|e| self.archive_error(e))?
            .len();

        tracing::debug!(path = %self.path.display(), id = %id, "Loaded docker archive");

        Ok(Image {
            source: Source::DockerTarball,
            location: self.path.display().to_string(),
            content_path: self.path.clone(),
            metadata: ImageMetadata {
                id,
                tags,
                digests: self.digests.clone(),
                config,
                layers,
                size,
            },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Provider for DockerArchiveProvider {
    async fn provide(&self) -> Result<Image> {
        let provider = self.clone();
        tokio::task::spawn_blocking(move || provider.load())
            .await
            .map_err(|e| ImageError::Other(format!("archive reader task failed: {}", e)))?
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::archive::tests::{build_tar, lying_tar};
    use crate::image::tests::CONFIG_JSON;
    use tempfile::TempDir;

    /// A docker archive with one image tagged `app:1.0`.
    pub(crate) fn docker_archive() -> Vec<u8> {
        let manifest = r#"[{"Config":"blobs/sha256/cfg","RepoTags":["app:1.0"],"Layers":["blobs/sha256/l1"]}]"#;
        build_tar(&[
            ("blobs/sha256/cfg", CONFIG_JSON.as_bytes()),
            ("blobs/sha256/l1", b"layer"),
            ("manifest.json", manifest.as_bytes()),
        ])
    }

    fn write(dir: &TempDir, bytes: &[u8]) -> PathBuf {
        let path = dir.path().join("image.tar");
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[tokio::test]
    async fn test_provide_reads_manifest_and_config() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, &docker_archive());

        let image = DockerArchiveProvider::new(&path).provide().await.unwrap();
        assert_eq!(image.source, Source::DockerTarball);
        assert_eq!(image.content_path, path);
        assert_eq!(image.metadata.tags, vec!["app:1.0"]);
        assert!(image.metadata.id.starts_with("sha256:"));
        assert_eq!(image.metadata.config.os, "linux");
        assert_eq!(image.metadata.layers.len(), 1);
        assert_eq!(image.metadata.size, std::fs::metadata(&path).unwrap().len());
    }

    #[tokio::test]
    async fn test_explicit_tags_win() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, &docker_archive());

        let image = DockerArchiveProvider::new(&path)
            .with_tags(vec!["registry.local/app:2.0".to_string()])
            .with_digests(vec!["app@sha256:abc".to_string()])
            .provide()
            .await
            .unwrap();
        assert_eq!(image.metadata.tags, vec!["registry.local/app:2.0"]);
        assert_eq!(image.metadata.digests, vec!["app@sha256:abc"]);
    }

    #[test]
    fn test_missing_manifest() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, &build_tar(&[("oci-layout", b"{}")]));
        let err = DockerArchiveProvider::new(&path).load().unwrap_err();
        assert!(matches!(err, ImageError::Archive { .. }));
        assert!(err.to_string().contains("manifest.json"));
    }

    #[test]
    fn test_empty_manifest() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, &build_tar(&[("manifest.json", b"[]")]));
        assert!(DockerArchiveProvider::new(&path).load().is_err());
    }

    #[test]
    fn test_oversized_manifest_is_an_archive_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, &lying_tar("manifest.json", 1 << 46, b"[]"));
        let err = DockerArchiveProvider::new(&path).load().unwrap_err();
        assert!(matches!(err, ImageError::Archive { .. }));
    }
}
