//! Image fetcher - the acquisition entry point.
//!
//! Resolves a user string to a source, picks the provider for it and hands
//! back the image together with the scratch space that now holds it.

use std::sync::Arc;

use imgsrc_core::config::FetchConfig;
use imgsrc_core::error::{ImageError, Result};
use imgsrc_core::event::{events, EventEmitter, EventPayload, ImageEvent};

use crate::docker::{DaemonClient, DaemonImageProvider, DockerArchiveProvider, EngineClient};
use crate::image::Image;
use crate::oci::{OciArchiveProvider, OciLayoutProvider, RegistryProvider};
use crate::provider::Provider;
use crate::source::{Source, SourceDetector};
use crate::tempdir::TempDirGenerator;

/// Acquires images from any supported source.
pub struct ImageFetcher {
    config: FetchConfig,
    events: EventEmitter,
    temp: TempDirGenerator,
    daemon: Option<Arc<dyn DaemonClient>>,
}

impl ImageFetcher {
    /// Create a fetcher with its own temp dir root and a daemon client for
    /// the configured docker host.
    pub fn new(config: FetchConfig, events: EventEmitter) -> Result<Self> {
        let temp = TempDirGenerator::new(&config.tmpdir_prefix)?;
        Ok(Self::with_temp_dir_generator(config, events, temp))
    }

    /// Create a fetcher whose scratch space lives below `temp`.
    pub fn with_temp_dir_generator(
        config: FetchConfig,
        events: EventEmitter,
        temp: TempDirGenerator,
    ) -> Self {
        let daemon = match EngineClient::from_config(&config) {
            Ok(client) => Some(Arc::new(client) as Arc<dyn DaemonClient>),
            Err(e) => {
                tracing::warn!(error = %e, "Docker daemon support disabled");
                None
            }
        };
        Self {
            config,
            events,
            temp,
            daemon,
        }
    }

    /// Replace the daemon client.
    pub fn with_daemon(mut self, daemon: Arc<dyn DaemonClient>) -> Self {
        self.daemon = Some(daemon);
        self
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub fn detector(&self) -> SourceDetector {
        SourceDetector::new(self.daemon.clone(), self.config.ping_timeout())
    }

    /// Resolve `input` to a source and location without fetching anything.
    pub async fn detect(&self, input: &str) -> Result<(Source, String)> {
        self.detector().detect(input).await
    }

    /// Fetch the image `input` refers to, inferring its source.
    pub async fn get_image(&self, input: &str) -> Result<FetchedImage> {
        let (source, location) = self.detect(input).await?;
        if source == Source::Unknown {
            return Err(ImageError::UnknownSource(input.to_string()));
        }
        self.get_image_from_source(&location, source).await
    }

    /// Fetch the image at `location` from an explicit `source`.
    ///
    /// On failure the scratch space of this call is removed before the
    /// error is returned.
    pub async fn get_image_from_source(&self, location: &str, source: Source) -> Result<FetchedImage> {
        tracing::debug!(source = %source, location, "Fetching image");

        let temp = self.temp.new_generator()?;
        let result = match self.provider(location, source, temp.clone()) {
            Ok(provider) => provider.provide().await,
            Err(e) => Err(e),
        };

        match result {
            Ok(image) => {
                self.events.emit(ImageEvent::new(
                    events::IMAGE_READY,
                    location,
                    EventPayload::String(image.metadata.id.clone()),
                ));
                tracing::info!(
                    source = %source,
                    location,
                    id = %image.metadata.id,
                    "Image ready"
                );
                Ok(FetchedImage { image, temp })
            }
            Err(e) => {
                if let Err(cleanup) = temp.cleanup() {
                    tracing::warn!(error = %cleanup, "Failed to clean up after failed fetch");
                }
                Err(e)
            }
        }
    }

    fn provider(
        &self,
        location: &str,
        source: Source,
        temp: TempDirGenerator,
    ) -> Result<Box<dyn Provider>> {
        let provider: Box<dyn Provider> = match source {
            Source::DockerTarball => Box::new(DockerArchiveProvider::new(location)),
            Source::DockerDaemon => {
                let client = self.daemon.clone().ok_or_else(|| {
                    ImageError::DaemonUnavailable("no docker daemon configured".to_string())
                })?;
                Box::new(
                    DaemonImageProvider::new(location, temp, client)
                        .with_config(&self.config)
                        .with_events(self.events.clone()),
                )
            }
            Source::OciDirectory => Box::new(OciLayoutProvider::new(location)),
            Source::OciTarball => Box::new(OciArchiveProvider::new(location, temp)),
            Source::OciRegistry => Box::new(
                RegistryProvider::new(location, temp, self.config.registry.clone())
                    .with_docker_config_dir(self.config.docker_config_dir.clone()),
            ),
            Source::Unknown => return Err(ImageError::UnknownSource(location.to_string())),
        };
        Ok(provider)
    }

    /// Remove every temp dir this fetcher created.
    pub fn cleanup(&self) -> Result<()> {
        self.temp.cleanup()
    }
}

impl std::fmt::Debug for ImageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageFetcher")
            .field("config", &self.config)
            .field("temp", &self.temp.root())
            .field("daemon", &self.daemon.is_some())
            .finish()
    }
}

/// A fetched image and the scratch space backing it.
#[derive(Debug)]
pub struct FetchedImage {
    pub image: Image,
    temp: TempDirGenerator,
}

impl FetchedImage {
    pub fn image(&self) -> &Image {
        &self.image
    }

    /// Remove the temp dirs created for this image. The content path of
    /// daemon, OCI archive and registry images is gone afterwards.
    pub fn cleanup(&self) -> Result<()> {
        self.temp.cleanup()
    }
}
