//! OCI image layout parsing.
//!
//! Handles an OCI image layout directory: `oci-layout`, `index.json` and
//! content-addressed blobs under `blobs/<algorithm>/<hex>`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use imgsrc_core::error::{ImageError, Result};
use oci_spec::image::{ImageIndex, ImageManifest};

use crate::image::{parse_config_blob, Image, ImageMetadata};
use crate::provider::Provider;
use crate::source::Source;

/// Annotation carrying the tag a manifest was stored under.
pub const REF_NAME_ANNOTATION: &str = "org.opencontainers.image.ref.name";

/// An OCI image layout loaded from disk.
#[derive(Debug)]
pub struct OciLayout {
    root_dir: PathBuf,
    index: ImageIndex,
    manifest_digest: String,
    manifest: ImageManifest,
    config_bytes: Vec<u8>,
}

impl OciLayout {
    /// Load the first image of the layout at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let root_dir = path.as_ref().to_path_buf();
        Self::validate(&root_dir)?;

        let index: ImageIndex = read_json(&root_dir.join("index.json"), "index.json")?;
        let manifest_digest = index
            .manifests()
            .first()
            .ok_or_else(|| ImageError::OciLayout("no manifests in index.json".to_string()))?
            .digest()
            .to_string();

        let manifest: ImageManifest =
            read_json(&Self::blob_path(&root_dir, &manifest_digest)?, "manifest")?;

        let config_path = Self::blob_path(&root_dir, &manifest.config().digest().to_string())?;
        let config_bytes = std::fs::read(&config_path).map_err(|e| {
            ImageError::OciLayout(format!(
                "failed to read config at {}: {}",
                config_path.display(),
                e
            ))
        })?;

        Ok(Self {
            root_dir,
            index,
            manifest_digest,
            manifest,
            config_bytes,
        })
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    pub fn manifest_digest(&self) -> &str {
        &self.manifest_digest
    }

    /// Paths of the layer blobs, bottom to top.
    pub fn layer_paths(&self) -> Result<Vec<PathBuf>> {
        self.manifest
            .layers()
            .iter()
            .map(|layer| Self::blob_path(&self.root_dir, &layer.digest().to_string()))
            .collect()
    }

    /// Tags recorded in the index annotations.
    pub fn ref_names(&self) -> Vec<String> {
        self.index
            .manifests()
            .iter()
            .filter_map(|m| m.annotations().as_ref())
            .filter_map(|a| a.get(REF_NAME_ANNOTATION).cloned())
            .collect()
    }

    /// Sum of the config and layer blob sizes.
    pub fn content_size(&self) -> u64 {
        let layers: u64 = self
            .manifest
            .layers()
            .iter()
            .map(|l| u64::try_from(l.size()).unwrap_or(0))
            .sum();
        layers + self.config_bytes.len() as u64
    }

    /// Build the image handle for this layout.
    pub fn to_image(&self, source: Source, location: impl Into<String>) -> Result<Image> {
        let (id, config, layers) = parse_config_blob(&self.config_bytes)
            .map_err(|e| ImageError::OciLayout(format!("failed to parse config: {}", e)))?;

        Ok(Image {
            source,
            location: location.into(),
            content_path: self.root_dir.clone(),
            metadata: ImageMetadata {
                id,
                tags: self.ref_names(),
                digests: Vec::new(),
                config,
                layers,
                size: self.content_size(),
            },
        })
    }

    fn validate(root_dir: &Path) -> Result<()> {
        for required in ["oci-layout", "index.json", "blobs"] {
            if !root_dir.join(required).exists() {
                return Err(ImageError::OciLayout(format!(
                    "not a valid OCI layout: missing {} in {}",
                    required,
                    root_dir.display()
                )));
            }
        }
        Ok(())
    }

    /// Path of a blob by digest (`sha256:abc...`, bare hex means sha256).
    ///
    /// Digests come from untrusted manifests, so anything that is not
    /// `<algorithm>:<hex>` is rejected before it can name a path.
    pub fn blob_path(root_dir: &Path, digest: &str) -> Result<PathBuf> {
        let (algorithm, hash) = digest.split_once(':').unwrap_or(("sha256", digest));
        let algorithm_ok = !algorithm.is_empty()
            && algorithm
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b"+._-".contains(&b))
            && !algorithm.starts_with('.');
        let hash_ok = !hash.is_empty() && hash.bytes().all(|b| b.is_ascii_hexdigit());
        if !algorithm_ok || !hash_ok {
            return Err(ImageError::OciLayout(format!("invalid blob digest '{}'", digest)));
        }
        Ok(root_dir.join("blobs").join(algorithm).join(hash))
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    let content = std::fs::read(path).map_err(|e| {
        ImageError::OciLayout(format!("failed to read {} at {}: {}", what, path.display(), e))
    })?;
    serde_json::from_slice(&content)
        .map_err(|e| ImageError::OciLayout(format!("failed to parse {}: {}", what, e)))
}

/// Provides an image from an OCI layout directory.
#[derive(Debug, Clone)]
pub struct OciLayoutProvider {
    path: PathBuf,
}

impl OciLayoutProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Provider for OciLayoutProvider {
    async fn provide(&self) -> Result<Image> {
        let path = self.path.clone();
        let image = tokio::task::spawn_blocking(move || {
            let location = path.display().to_string();
            OciLayout::open(&path)?.to_image(Source::OciDirectory, location)
        })
        .await
        .map_err(|e| ImageError::Other(format!("layout reader task failed: {}", e)))??;

        tracing::debug!(path = %self.path.display(), id = %image.metadata.id, "Loaded OCI layout");
        Ok(image)
    }
}
