//! Docker Engine API client.
//!
//! Only the four calls image acquisition needs are implemented: ping,
//! image inspect, image pull and image save. Requests are plain HTTP/1.1
//! over the daemon's unix socket (or a TCP endpoint when `DOCKER_HOST`
//! says so).

use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use futures::TryStreamExt;
use hyper::body::HttpBody;
use hyper::client::conn::SendRequest;
use hyper::{Body, Method, Request, Response, StatusCode};
use imgsrc_core::config::FetchConfig;
use imgsrc_core::error::{ImageError, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UnixStream};
use tokio_util::io::StreamReader;

use crate::reference::ImageReference;

/// Streaming response body.
pub type ByteStream = Pin<Box<dyn AsyncRead + Send>>;

/// Answer to a daemon ping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ping {
    /// Empty when the daemon did not report an API version
    pub api_version: String,
}

/// Subset of `GET /images/{name}/json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageInspect {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub repo_tags: Option<Vec<String>>,
    #[serde(default)]
    pub repo_digests: Option<Vec<String>>,
    #[serde(default)]
    pub size: u64,
    /// Dropped from API v1.44 on; `size` carries the same value there.
    #[serde(default)]
    pub virtual_size: Option<u64>,
}

impl ImageInspect {
    pub fn tags(&self) -> Vec<String> {
        self.repo_tags.clone().unwrap_or_default()
    }

    pub fn digests(&self) -> Vec<String> {
        self.repo_digests.clone().unwrap_or_default()
    }

    /// Uncompressed image size, used to estimate save duration.
    pub fn expected_size(&self) -> u64 {
        self.virtual_size.filter(|s| *s > 0).unwrap_or(self.size)
    }
}

/// Operations the acquisition pipeline needs from a docker daemon.
#[async_trait]
pub trait DaemonClient: Send + Sync {
    /// Check that the daemon is reachable.
    async fn ping(&self) -> Result<Ping>;

    /// Inspect a local image. Fails with `ImageError::NotFound` when the
    /// daemon does not have it.
    async fn inspect_image(&self, reference: &str) -> Result<ImageInspect>;

    /// Start a pull; the stream yields newline-delimited JSON status events.
    async fn pull_image(&self, reference: &str, registry_auth: Option<&str>) -> Result<ByteStream>;

    /// Export an image as a docker archive.
    async fn save_image(&self, reference: &str) -> Result<ByteStream>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Endpoint {
    Unix(PathBuf),
    Tcp(String),
}

/// Docker Engine API client speaking HTTP/1.1 to `DOCKER_HOST`.
#[derive(Debug, Clone)]
pub struct EngineClient {
    endpoint: Endpoint,
}

impl EngineClient {
    /// Create a client for `unix:///path`, `tcp://host:port` or `http://host:port`.
    pub fn new(host: &str) -> Result<Self> {
        let endpoint = if let Some(path) = host.strip_prefix("unix://") {
            Endpoint::Unix(PathBuf::from(path))
        } else if let Some(addr) = host
            .strip_prefix("tcp://")
            .or_else(|| host.strip_prefix("http://"))
        {
            Endpoint::Tcp(addr.trim_end_matches('/').to_string())
        } else {
            return Err(ImageError::Config(format!(
                "unsupported docker host '{}' (expected unix:// or tcp://)",
                host
            )));
        };
        Ok(Self { endpoint })
    }

    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        Self::new(&config.docker_host)
    }

    async fn connect(&self) -> Result<SendRequest<Body>> {
        match &self.endpoint {
            Endpoint::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(|e| {
                    ImageError::DaemonUnavailable(format!(
                        "cannot connect to {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                handshake(stream).await
            }
            Endpoint::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await.map_err(|e| {
                    ImageError::DaemonUnavailable(format!("cannot connect to {}: {}", addr, e))
                })?;
                handshake(stream).await
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        path_and_query: &str,
        headers: &[(&str, &str)],
    ) -> Result<Response<Body>> {
        let mut sender = self.connect().await?;

        let mut builder = Request::builder()
            .method(method)
            .uri(path_and_query)
            .header(hyper::header::HOST, "docker");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder
            .body(Body::empty())
            .map_err(|e| ImageError::Other(format!("invalid docker request: {}", e)))?;

        tracing::trace!(path = path_and_query, "Docker API request");
        sender
            .send_request(request)
            .await
            .map_err(|e| ImageError::DaemonUnavailable(format!("request failed: {}", e)))
    }
}

async fn handshake<T>(io: T) -> Result<SendRequest<Body>>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, connection) = hyper::client::conn::handshake(io)
        .await
        .map_err(|e| ImageError::DaemonUnavailable(format!("handshake failed: {}", e)))?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::debug!(error = %e, "Docker connection closed with error");
        }
    });
    Ok(sender)
}

/// Error body returned by the daemon.
#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

async fn error_message(response: Response<Body>) -> String {
    let status = response.status();
    let body = match hyper::body::to_bytes(response.into_body()).await {
        Ok(body) => body,
        Err(e) => return format!("{} (unreadable body: {})", status, e),
    };
    serde_json::from_slice::<ErrorMessage>(&body)
        .map(|m| m.message)
        .unwrap_or_else(|_| format!("{}: {}", status, String::from_utf8_lossy(&body).trim()))
}

fn into_stream(body: Body) -> ByteStream {
    let stream = TryStreamExt::map_err(body, |e| std::io::Error::new(std::io::ErrorKind::Other, e));
    Box::pin(StreamReader::new(stream))
}

fn daemon_error(operation: &str, reference: &str, message: String) -> ImageError {
    ImageError::Daemon {
        operation: operation.to_string(),
        reference: reference.to_string(),
        message,
    }
}

#[async_trait]
impl DaemonClient for EngineClient {
    async fn ping(&self) -> Result<Ping> {
        let response = self.send(Method::GET, "/_ping", &[]).await?;
        let api_version = response
            .headers()
            .get("Api-Version")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !response.status().is_success() {
            return Err(ImageError::DaemonUnavailable(error_message(response).await));
        }
        // drain so the connection shuts down cleanly
        let mut body = response.into_body();
        while let Some(chunk) = body.data().await {
            if chunk.is_err() {
                break;
            }
        }
        Ok(Ping { api_version })
    }

    async fn inspect_image(&self, reference: &str) -> Result<ImageInspect> {
        let path = format!("/images/{}/json", encode_path(reference));
        let response = self.send(Method::GET, &path, &[]).await?;
        match response.status() {
            StatusCode::OK => {
                let body = hyper::body::to_bytes(response.into_body())
                    .await
                    .map_err(|e| daemon_error("inspect", reference, e.to_string()))?;
                Ok(serde_json::from_slice(&body)?)
            }
            StatusCode::NOT_FOUND => Err(ImageError::NotFound(reference.to_string())),
            _ => Err(daemon_error("inspect", reference, error_message(response).await)),
        }
    }

    async fn pull_image(&self, reference: &str, registry_auth: Option<&str>) -> Result<ByteStream> {
        let parsed = ImageReference::parse(reference)?;
        let from_image = format!("{}/{}", parsed.registry, parsed.repository);
        let tag = parsed
            .digest
            .as_deref()
            .or(parsed.tag.as_deref())
            .unwrap_or("latest");
        let path = format!(
            "/images/create?fromImage={}&tag={}",
            encode_query(&from_image),
            encode_query(tag)
        );

        let mut headers = Vec::new();
        if let Some(auth) = registry_auth {
            headers.push(("X-Registry-Auth", auth));
        }

        let response = self.send(Method::POST, &path, &headers).await?;
        if !response.status().is_success() {
            return Err(ImageError::Pull {
                reference: reference.to_string(),
                message: error_message(response).await,
            });
        }
        Ok(into_stream(response.into_body()))
    }

    async fn save_image(&self, reference: &str) -> Result<ByteStream> {
        let path = format!("/images/get?names={}", encode_query(reference));
        let response = self.send(Method::GET, &path, &[]).await?;
        if !response.status().is_success() {
            return Err(daemon_error("save", reference, error_message(response).await));
        }
        Ok(into_stream(response.into_body()))
    }
}

/// Everything but RFC 3986 unreserved characters.
const QUERY: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Image names keep `/`, `:` and `@` in request paths.
const PATH: &AsciiSet = &QUERY.remove(b'/').remove(b':').remove(b'@');

fn encode_path(value: &str) -> String {
    utf8_percent_encode(value, PATH).to_string()
}

fn encode_query(value: &str) -> String {
    utf8_percent_encode(value, QUERY).to_string()
}
