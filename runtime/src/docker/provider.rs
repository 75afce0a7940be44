//! Docker daemon image provider.
//!
//! Acquires an image through a local docker daemon: inspect, pull when the
//! daemon lacks the image, `docker save` into a scoped temp dir and hand the
//! archive to [`DockerArchiveProvider`]. Progress is published on the event
//! emitter as a pull status and as a staged save progress.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use imgsrc_core::config::{FetchConfig, DEFAULT_SAVE_THROUGHPUT};
use imgsrc_core::error::{ImageError, Result};
use imgsrc_core::event::{events, EventEmitter, EventPayload, ImageEvent};
use imgsrc_core::progress::{Aggregator, ByteCounter, Stage, StagedProgress, TimedProgress};
use imgsrc_core::pull_status::{self, PullEvent, PullStatusWriter};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::client::{DaemonClient, ImageInspect};
use super::config::{encode_credentials, DockerConfigFile};
use super::tarball::DockerArchiveProvider;
use crate::image::Image;
use crate::provider::Provider;
use crate::reference::ImageReference;
use crate::source::Source;
use crate::tempdir::TempDirGenerator;

/// Stage label while waiting for the daemon to start streaming.
pub const STAGE_REQUESTING: &str = "requesting image from Docker";

/// Stage label while the archive is copied to disk.
pub const STAGE_SAVING: &str = "saving image to disk";

const ARCHIVE_FILE_NAME: &str = "image.tar";

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Provides an image from the docker daemon.
pub struct DaemonImageProvider {
    reference: String,
    temp: TempDirGenerator,
    client: Arc<dyn DaemonClient>,
    events: EventEmitter,
    docker_config_dir: Option<PathBuf>,
    save_throughput: u64,
}

impl DaemonImageProvider {
    pub fn new(
        reference: impl Into<String>,
        temp: TempDirGenerator,
        client: Arc<dyn DaemonClient>,
    ) -> Self {
        Self {
            reference: reference.into(),
            temp,
            client,
            events: EventEmitter::disabled(),
            docker_config_dir: None,
            save_throughput: DEFAULT_SAVE_THROUGHPUT,
        }
    }

    /// Apply the docker config location and save throughput from `config`.
    pub fn with_config(mut self, config: &FetchConfig) -> Self {
        self.docker_config_dir = config.docker_config_dir.clone();
        self.save_throughput = config.save_throughput_bytes;
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = events;
        self
    }

    pub fn with_docker_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.docker_config_dir = Some(dir.into());
        self
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Attach operation and reference to errors that lack them.
    fn context(&self, operation: &str, err: ImageError) -> ImageError {
        match err {
            ImageError::Daemon { .. } | ImageError::Pull { .. } | ImageError::EmptyImage(_) => err,
            other => ImageError::Daemon {
                operation: operation.to_string(),
                reference: self.reference.clone(),
                message: other.to_string(),
            },
        }
    }

    async fn inspect(&self) -> Result<ImageInspect> {
        match self.client.inspect_image(&self.reference).await {
            Ok(inspect) => Ok(inspect),
            Err(e) if e.is_not_found() => {
                tracing::info!(reference = %self.reference, "Image not present in daemon, pulling");
                self.pull().await?;
                self.client
                    .inspect_image(&self.reference)
                    .await
                    .map_err(|e| self.context("inspect", e))
            }
            Err(e) => Err(self.context("inspect", e)),
        }
    }

    /// `X-Registry-Auth` value from the docker config, if credentials are stored.
    fn registry_auth(&self) -> Result<Option<String>> {
        let config = DockerConfigFile::load(self.docker_config_dir.as_deref())?;
        tracing::debug!(config = %config.filename.display(), "Using docker config");

        let reference = ImageReference::parse(&self.reference)?;
        let hostname = reference.registry_host();
        let auth = config.auth_config(hostname).map_err(|e| ImageError::Pull {
            reference: self.reference.clone(),
            message: format!("failed to fetch registry auth (hostname={}): {}", hostname, e),
        })?;

        match auth {
            Some(auth) if !auth.username.is_empty() => {
                tracing::debug!(registry = hostname, "Using docker credentials");
                encode_credentials(&auth.username, &auth.password).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Pull the image into the daemon, publishing its status.
    async fn pull(&self) -> Result<()> {
        tracing::debug!(reference = %self.reference, "Pulling docker image");
        let registry_auth = self.registry_auth()?;

        // completes when dropped, whatever the outcome
        let (writer, reader) = pull_status::channel();
        self.events.emit(ImageEvent::new(
            events::PULL_DOCKER_IMAGE,
            self.reference.as_str(),
            EventPayload::PullStatus(reader),
        ));

        let stream = self
            .client
            .pull_image(&self.reference, registry_auth.as_deref())
            .await
            .map_err(|e| match e {
                ImageError::Pull { .. } => e,
                other => ImageError::Pull {
                    reference: self.reference.clone(),
                    message: other.to_string(),
                },
            })?;

        decode_pull_stream(&self.reference, stream, &writer).await
    }

    /// Copy the save stream into `file`, reporting through `stage` and `counter`.
    async fn save(
        &self,
        mut file: tokio::fs::File,
        estimate: &TimedProgress,
        counter: &ByteCounter,
        stage: &Stage,
    ) -> Result<u64> {
        stage.set(STAGE_REQUESTING);
        let mut stream = self
            .client
            .save_image(&self.reference)
            .await
            .map_err(|e| self.context("save", e))?;

        // the stream is open, the wait is over
        estimate.set_completed();

        stage.set(STAGE_SAVING);
        copy_counted(&mut stream, &mut file, counter)
            .await
            .map_err(|e| ImageError::Daemon {
                operation: "save".to_string(),
                reference: self.reference.clone(),
                message: format!("unable to save image to tar: {}", e),
            })
    }
}

#[async_trait]
impl Provider for DaemonImageProvider {
    async fn provide(&self) -> Result<Image> {
        let dir = self.temp.new_temp_dir()?;
        let archive = dir.join(ARCHIVE_FILE_NAME);
        let file = tokio::fs::File::create(&archive)
            .await
            .map_err(|e| ImageError::TempDir {
                path: archive.display().to_string(),
                message: format!("unable to create temp file for image: {}", e),
            })?;

        let inspect = self.inspect().await?;

        let size = inspect.expected_size();
        let estimate = Arc::new(TimedProgress::for_transfer(size, self.save_throughput));
        let counter = Arc::new(ByteCounter::new(size));
        let stage = Arc::new(Stage::new());
        let aggregate = Arc::new(Aggregator::new(estimate.clone(), counter.clone()));
        self.events.emit(ImageEvent::new(
            events::FETCH_IMAGE,
            self.reference.as_str(),
            EventPayload::Progress(StagedProgress::new(stage.clone(), aggregate)),
        ));

        tracing::debug!(
            reference = %self.reference,
            size,
            estimate = ?estimate.expected(),
            "Saving image from docker daemon"
        );

        let written = self.save(file, &estimate, &counter, &stage).await?;
        if written == 0 {
            return Err(ImageError::EmptyImage(self.reference.clone()));
        }
        counter.set_completed();

        tracing::info!(
            reference = %self.reference,
            bytes = written,
            archive = %archive.display(),
            "Saved image from docker daemon"
        );

        let mut image = DockerArchiveProvider::new(&archive)
            .with_tags(inspect.tags())
            .with_digests(inspect.digests())
            .provide()
            .await?;
        image.source = Source::DockerDaemon;
        image.location = self.reference.clone();
        Ok(image)
    }
}

impl std::fmt::Debug for DaemonImageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DaemonImageProvider")
            .field("reference", &self.reference)
            .field("temp", &self.temp.root())
            .field("docker_config_dir", &self.docker_config_dir)
            .field("save_throughput", &self.save_throughput)
            .finish()
    }
}

/// Decode the daemon's newline-delimited JSON pull stream into `status`.
///
/// Summary lines are dropped. A line carrying an `error` fails the pull.
pub async fn decode_pull_stream<R>(
    reference: &str,
    stream: R,
    status: &PullStatusWriter,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        let line = lines.next_line().await.map_err(|e| ImageError::Pull {
            reference: reference.to_string(),
            message: format!("failed to read pull stream: {}", e),
        })?;
        let Some(line) = line else {
            return Ok(());
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: PullEvent = serde_json::from_str(line).map_err(|e| {
            ImageError::Decode(format!("failed to pull image '{}': {}", reference, e))
        })?;

        if let Some(error) = event.error.as_deref().filter(|e| !e.is_empty()) {
            return Err(ImageError::Pull {
                reference: reference.to_string(),
                message: error.to_string(),
            });
        }
        if event.is_summary() {
            tracing::debug!(reference, status = %event.status, "Pull summary");
            continue;
        }

        status.on_event(&event);
    }
}

async fn copy_counted<R, W>(reader: &mut R, writer: &mut W, counter: &ByteCounter) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n]).await?;
        counter.record(n as u64);
        total += n as u64;
    }
    writer.flush().await?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgsrc_core::progress::Progressable;

    fn lines(events: &[&str]) -> Vec<u8> {
        events.join("\n").into_bytes()
    }

    #[tokio::test]
    async fn test_decode_filters_summary_lines() {
        let stream = lines(&[
            r#"{"status":"Pulling from library/alpine","id":"3.19"}"#,
            r#"{"status":"Pulling fs layer","id":"aaa"}"#,
            r#"{"status":"Downloading","id":"aaa","progressDetail":{"current":5,"total":10}}"#,
            r#"{"status":"Pull complete","id":"aaa"}"#,
            r#"{"status":"Digest: sha256:0000"}"#,
            r#"{"status":"Status: Downloaded newer image for alpine:3.19"}"#,
            "",
        ]);
        let (writer, reader) = pull_status::channel();
        decode_pull_stream("alpine:3.19", &stream[..], &writer).await.unwrap();

        let status = reader.snapshot();
        assert_eq!(status.layers, vec!["aaa"]);
        assert_eq!(status.layers_done(), 1);
        assert!(!status.complete);

        drop(writer);
        assert!(reader.is_complete());
    }

    #[tokio::test]
    async fn test_decode_error_line_is_fatal() {
        let stream = lines(&[
            r#"{"status":"Pulling fs layer","id":"aaa"}"#,
            r#"{"errorDetail":{"message":"denied"},"error":"denied: requested access to the resource is denied"}"#,
        ]);
        let (writer, _reader) = pull_status::channel();
        let err = decode_pull_stream("private/app", &stream[..], &writer)
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::Pull { .. }));
        assert!(err.to_string().contains("denied"));
    }

    #[tokio::test]
    async fn test_decode_malformed_line() {
        let (writer, _reader) = pull_status::channel();
        let err = decode_pull_stream("alpine", &b"{\"status\":"[..], &writer)
            .await
            .unwrap_err();
        assert!(matches!(err, ImageError::Decode(_)));
    }

    #[tokio::test]
    async fn test_copy_counts_every_byte() {
        let data = vec![7u8; COPY_BUFFER_SIZE * 2 + 3];
        let counter = ByteCounter::new(10);
        let mut out = Vec::new();
        let n = copy_counted(&mut &data[..], &mut out, &counter).await.unwrap();
        assert_eq!(n as usize, data.len());
        assert_eq!(out, data);
        assert_eq!(counter.current(), n);
        // the expected size grows with an overshoot
        assert_eq!(counter.progress().size, n);
    }
}
