//! OCI registry provider.
//!
//! Uses the `oci-distribution` crate to pull an image (manifest, config and
//! layers) from a container registry into an OCI layout in a temp dir.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use imgsrc_core::config::RegistryOptions;
use imgsrc_core::error::{ImageError, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::manifest::{
    ImageIndexEntry, OciDescriptor, OciImageManifest, IMAGE_MANIFEST_MEDIA_TYPE, OCI_IMAGE_MEDIA_TYPE,
};
use oci_distribution::secrets::RegistryAuth;
use oci_distribution::{Client, Reference};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use super::layout::{OciLayout, REF_NAME_ANNOTATION};
use crate::docker::DockerConfigFile;
use crate::image::Image;
use crate::provider::Provider;
use crate::reference::ImageReference;
use crate::source::Source;
use crate::tempdir::TempDirGenerator;

/// Provides an image straight from a registry.
#[derive(Debug, Clone)]
pub struct RegistryProvider {
    reference: String,
    temp: TempDirGenerator,
    options: RegistryOptions,
    docker_config_dir: Option<PathBuf>,
}

impl RegistryProvider {
    pub fn new(reference: impl Into<String>, temp: TempDirGenerator, options: RegistryOptions) -> Self {
        Self {
            reference: reference.into(),
            temp,
            options,
            docker_config_dir: None,
        }
    }

    /// Directory of the docker `config.json` to fall back on for credentials.
    pub fn with_docker_config_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.docker_config_dir = dir;
        self
    }

    fn client(&self) -> Client {
        let protocol = if self.options.insecure_use_http {
            ClientProtocol::Http
        } else {
            ClientProtocol::Https
        };
        Client::new(ClientConfig {
            protocol,
            platform_resolver: Some(Box::new(linux_platform_resolver)),
            ..Default::default()
        })
    }

    /// Explicit credentials first, then the docker config, then anonymous.
    fn auth(&self, reference: &ImageReference) -> RegistryAuth {
        if let Some(creds) = self.options.credentials_for(&reference.registry) {
            tracing::debug!(registry = %reference.registry, "Using configured registry credentials");
            return RegistryAuth::Basic(creds.username.clone(), creds.password.clone());
        }

        let from_docker = DockerConfigFile::load(self.docker_config_dir.as_deref())
            .and_then(|config| config.auth_config(reference.registry_host()));
        match from_docker {
            Ok(Some(auth)) if !auth.username.is_empty() => {
                tracing::debug!(registry = %reference.registry, "Using docker config credentials");
                RegistryAuth::Basic(auth.username, auth.password)
            }
            Ok(_) => RegistryAuth::Anonymous,
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable docker config");
                RegistryAuth::Anonymous
            }
        }
    }

    fn registry_error(registry: &str, message: String) -> ImageError {
        ImageError::Registry {
            registry: registry.to_string(),
            message,
        }
    }

    /// Pull `reference` into an OCI layout at `target_dir`.
    async fn pull(&self, reference: &ImageReference, target_dir: &Path) -> Result<String> {
        let oci_ref = to_oci_reference(reference)?;
        let client = self.client();
        let auth = self.auth(reference);
        let registry = reference.registry.as_str();

        tracing::info!(
            reference = %reference,
            target = %target_dir.display(),
            "Pulling image from registry"
        );

        let blobs_dir = target_dir.join("blobs").join("sha256");
        tokio::fs::create_dir_all(&blobs_dir).await.map_err(|e| {
            Self::registry_error(registry, format!("failed to create blobs directory: {}", e))
        })?;

        // multi-arch indexes resolve to the current platform
        let (manifest, manifest_digest) = client
            .pull_image_manifest(&oci_ref, &auth)
            .await
            .map_err(|e| Self::registry_error(registry, format!("failed to pull manifest: {}", e)))?;

        // the blob must hold the registry's exact bytes to match its digest
        let pinned = Reference::with_digest(
            oci_ref.registry().to_string(),
            oci_ref.repository().to_string(),
            manifest_digest.clone(),
        );
        let (manifest_bytes, _) = client
            .pull_manifest_raw(&pinned, &auth, MANIFEST_MEDIA_TYPES)
            .await
            .map_err(|e| Self::registry_error(registry, format!("failed to pull manifest: {}", e)))?;
        verify_digest(&manifest_bytes, &manifest_digest)
            .map_err(|message| Self::registry_error(registry, message))?;
        write_blob(target_dir, &manifest_digest, &manifest_bytes).await?;

        self.pull_content(&client, &oci_ref, &manifest, target_dir, registry)
            .await?;

        let media_type = manifest
            .media_type
            .clone()
            .unwrap_or_else(|| OCI_IMAGE_MEDIA_TYPE.to_string());
        let mut entry = serde_json::json!({
            "mediaType": media_type,
            "digest": manifest_digest,
            "size": manifest_bytes.len()
        });
        if let Some(tag) = &reference.tag {
            let mut annotations = serde_json::Map::new();
            annotations.insert(REF_NAME_ANNOTATION.to_string(), tag.clone().into());
            entry["annotations"] = serde_json::Value::Object(annotations);
        }
        let index = serde_json::json!({
            "schemaVersion": 2,
            "manifests": [entry]
        });

        for (name, contents) in [
            ("oci-layout", br#"{"imageLayoutVersion":"1.0.0"}"#.to_vec()),
            ("index.json", serde_json::to_vec_pretty(&index)?),
        ] {
            tokio::fs::write(target_dir.join(name), contents)
                .await
                .map_err(|e| Self::registry_error(registry, format!("failed to write {}: {}", name, e)))?;
        }

        tracing::info!(reference = %reference, digest = %manifest_digest, "Image pulled successfully");
        Ok(manifest_digest)
    }

    /// Stream the config and layer blobs to disk.
    async fn pull_content(
        &self,
        client: &Client,
        oci_ref: &Reference,
        manifest: &OciImageManifest,
        target_dir: &Path,
        registry: &str,
    ) -> Result<()> {
        let blobs = std::iter::once(&manifest.config).chain(manifest.layers.iter());
        for descriptor in blobs {
            tracing::debug!(digest = %descriptor.digest, size = descriptor.size, "Pulling blob");
            pull_blob(client, oci_ref, descriptor, target_dir)
                .await
                .map_err(|e| {
                    Self::registry_error(registry, format!("failed to pull blob {}: {}", descriptor.digest, e))
                })?;
        }
        Ok(())
    }
}

/// Manifest media types accepted when fetching the raw manifest bytes.
const MANIFEST_MEDIA_TYPES: &[&str] = &[OCI_IMAGE_MEDIA_TYPE, IMAGE_MANIFEST_MEDIA_TYPE];

async fn write_blob(root: &Path, digest: &str, bytes: &[u8]) -> Result<()> {
    let path = OciLayout::blob_path(root, digest)?;
    tokio::fs::write(&path, bytes).await.map_err(|e| {
        ImageError::OciLayout(format!("failed to write blob {}: {}", path.display(), e))
    })
}

/// Check sha256 digests against the content; other algorithms pass as is.
fn verify_digest(bytes: &[u8], digest: &str) -> std::result::Result<(), String> {
    match digest.split_once(':') {
        Some(("sha256", expected)) => {
            let actual = hex::encode(Sha256::digest(bytes));
            if actual.eq_ignore_ascii_case(expected) {
                Ok(())
            } else {
                Err(format!("content of {} hashes to sha256:{}", digest, actual))
            }
        }
        _ => Ok(()),
    }
}

async fn pull_blob(
    client: &Client,
    oci_ref: &Reference,
    descriptor: &OciDescriptor,
    root: &Path,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // validated before anything touches the filesystem
    let path = OciLayout::blob_path(root, &descriptor.digest)?;
    let mut file = tokio::fs::File::create(&path).await?;
    client.pull_blob(oci_ref, descriptor, &mut file).await?;
    file.flush().await?;
    Ok(())
}

/// Convert an ImageReference to an oci-distribution Reference.
fn to_oci_reference(reference: &ImageReference) -> Result<Reference> {
    let ref_str = match (&reference.digest, &reference.tag) {
        (Some(digest), _) => format!("{}/{}@{}", reference.registry, reference.repository, digest),
        (None, Some(tag)) => format!("{}/{}:{}", reference.registry, reference.repository, tag),
        (None, None) => format!("{}/{}:latest", reference.registry, reference.repository),
    };

    ref_str
        .parse::<Reference>()
        .map_err(|e| ImageError::InvalidReference(format!("'{}': {}", ref_str, e)))
}

/// Pick the linux manifest for the host architecture from an image index.
fn linux_platform_resolver(manifests: &[ImageIndexEntry]) -> Option<String> {
    let arch = match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };

    manifests
        .iter()
        .find(|entry| {
            entry
                .platform
                .as_ref()
                .map_or(false, |p| p.os == "linux" && p.architecture == arch)
        })
        .map(|entry| entry.digest.clone())
}

#[async_trait]
impl Provider for RegistryProvider {
    async fn provide(&self) -> Result<Image> {
        let reference = ImageReference::parse(&self.reference)?;
        let target = self.temp.new_temp_dir()?;

        let digest = self.pull(&reference, &target).await?;

        let mut image = tokio::task::spawn_blocking(move || OciLayout::open(&target))
            .await
            .map_err(|e| ImageError::Other(format!("layout reader task failed: {}", e)))??
            .to_image(Source::OciRegistry, self.reference.clone())?;
        image.metadata.tags = vec![reference.full_reference()];
        image.metadata.digests = vec![format!(
            "{}/{}@{}",
            reference.registry, reference.repository, digest
        )];
        Ok(image)
    }
}
