//! Image source disambiguation.
//!
//! Turns a free-form user string such as `alpine:3.19`,
//! `docker-archive:~/images/app.tar` or `./layout` into the concrete
//! [`Source`] an image should be acquired from, plus the location string
//! that source understands.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use imgsrc_core::error::{ImageError, Result};
use serde::Serialize;

use crate::archive::has_member_from_start;
use crate::docker::DaemonClient;
use crate::reference::is_registry_reference;

/// Separator between an optional scheme hint and the location.
pub const SCHEME_SEPARATOR: char = ':';

/// A concrete strategy for acquiring an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Source {
    #[serde(rename = "UnknownSource")]
    Unknown,
    DockerTarball,
    DockerDaemon,
    OciDirectory,
    OciTarball,
    OciRegistry,
}

impl Source {
    /// Every source that can actually provide an image.
    pub const ALL: [Source; 5] = [
        Source::DockerTarball,
        Source::DockerDaemon,
        Source::OciDirectory,
        Source::OciTarball,
        Source::OciRegistry,
    ];

    /// Map a case-insensitive scheme hint onto a source.
    pub fn from_scheme(scheme: &str) -> Source {
        match scheme.to_ascii_lowercase().as_str() {
            "docker-archive" => Source::DockerTarball,
            "docker" => Source::DockerDaemon,
            "oci-dir" => Source::OciDirectory,
            "oci-archive" => Source::OciTarball,
            "oci-registry" | "registry" => Source::OciRegistry,
            _ => Source::Unknown,
        }
    }

    /// Canonical scheme hint for this source.
    pub fn scheme(&self) -> Option<&'static str> {
        match self {
            Source::Unknown => None,
            Source::DockerTarball => Some("docker-archive"),
            Source::DockerDaemon => Some("docker"),
            Source::OciDirectory => Some("oci-dir"),
            Source::OciTarball => Some("oci-archive"),
            Source::OciRegistry => Some("registry"),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Source::Unknown => "UnknownSource",
            Source::DockerTarball => "DockerTarball",
            Source::DockerDaemon => "DockerDaemon",
            Source::OciDirectory => "OciDirectory",
            Source::OciTarball => "OciTarball",
            Source::OciRegistry => "OciRegistry",
        }
    }

    /// Whether the location of this source is a filesystem path.
    pub fn is_path_based(&self) -> bool {
        matches!(
            self,
            Source::OciDirectory | Source::OciTarball | Source::DockerTarball
        )
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match Source::from_scheme(s) {
            Source::Unknown => Source::ALL
                .into_iter()
                .find(|source| source.name().eq_ignore_ascii_case(s))
                .ok_or_else(|| {
                    format!(
                        "unknown image source: '{}' (supported: docker-archive, docker, oci-dir, oci-archive, registry)",
                        s
                    )
                }),
            source => Ok(source),
        }
    }
}

/// Outcome of probing a filesystem path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathProbe {
    /// The path holds an image in a known format.
    Found(Source),
    /// The path exists but is not a recognized image format.
    Unrecognized,
    /// Nothing exists at the path.
    Missing,
}

impl PathProbe {
    pub fn source(&self) -> Source {
        match self {
            PathProbe::Found(source) => *source,
            PathProbe::Unrecognized | PathProbe::Missing => Source::Unknown,
        }
    }
}

/// Expand a leading `~` to the current user's home directory.
pub fn expand_home(path: &str) -> Result<String> {
    let Some(rest) = path.strip_prefix('~') else {
        return Ok(path.to_string());
    };
    if !rest.is_empty() && !rest.starts_with(['/', '\\']) {
        return Err(ImageError::Expansion {
            path: path.to_string(),
            message: "cannot expand user-specific home dir".to_string(),
        });
    }
    let home = dirs::home_dir().ok_or_else(|| ImageError::Expansion {
        path: path.to_string(),
        message: "cannot determine home directory".to_string(),
    })?;
    Ok(format!("{}{}", home.display(), rest))
}

/// Distinguish an OCI layout directory, an OCI archive and a docker archive.
pub fn detect_source_from_path(path: &str) -> Result<PathProbe> {
    let path = expand_home(path)?;
    let path = Path::new(&path);

    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PathProbe::Missing),
        Err(e) => {
            return Err(ImageError::Archive {
                path: path.display().to_string(),
                message: format!("failed to open path: {}", e),
            })
        }
    };

    if metadata.is_dir() {
        // no other directory-based formats are supported
        return Ok(if path.join("oci-layout").exists() {
            PathProbe::Found(Source::OciDirectory)
        } else {
            PathProbe::Unrecognized
        });
    }

    let mut archive = File::open(path).map_err(|e| ImageError::Archive {
        path: path.display().to_string(),
        message: format!("unable to open archive: {}", e),
    })?;

    // manifest.json first so docker archives are never taken for OCI archives
    for (member, source) in [
        ("manifest.json", Source::DockerTarball),
        ("oci-layout", Source::OciTarball),
    ] {
        let found = has_member_from_start(&mut archive, member).map_err(|e| {
            ImageError::Archive {
                path: path.display().to_string(),
                message: format!("unable to read archive: {}", e),
            }
        })?;
        if found {
            return Ok(PathProbe::Found(source));
        }
    }

    Ok(PathProbe::Unrecognized)
}

/// Resolves user strings into sources, consulting the docker daemon when
/// the string could be pulled.
#[derive(Clone)]
pub struct SourceDetector {
    daemon: Option<Arc<dyn DaemonClient>>,
    ping_timeout: Duration,
}

impl SourceDetector {
    pub fn new(daemon: Option<Arc<dyn DaemonClient>>, ping_timeout: Duration) -> Self {
        Self {
            daemon,
            ping_timeout,
        }
    }

    /// Determine the source of `input` and the location within it.
    ///
    /// An unknown source comes back as `(Source::Unknown, "")`.
    pub async fn detect(&self, input: &str) -> Result<(Source, String)> {
        // Only the hint prefix is stripped; the location may itself contain ':'
        let (mut source, mut location) = match input.split_once(SCHEME_SEPARATOR) {
            Some((hint, rest)) => (Source::from_scheme(hint), rest.to_string()),
            None => (Source::Unknown, input.to_string()),
        };

        if source.is_path_based() {
            // an explicit scheme means the shell did not expand '~'
            location = expand_home(&location)?;
        }

        if source == Source::Unknown {
            if let PathProbe::Found(found) = detect_source_from_path(input)? {
                source = found;
                location = expand_home(input)?;
            } else {
                source = self.determine_pull_source(input).await;
                location = match source {
                    Source::Unknown => String::new(),
                    _ => input.to_string(),
                };
            }
        }

        tracing::debug!(input, source = %source, location = %location, "Detected image source");
        Ok((source, location))
    }

    /// Pick the daemon when it is reachable, the registry otherwise.
    /// Returns `Source::Unknown` if `input` is not an image reference.
    pub async fn determine_pull_source(&self, input: &str) -> Source {
        if !is_registry_reference(input) {
            return Source::Unknown;
        }

        if let Some(daemon) = &self.daemon {
            match tokio::time::timeout(self.ping_timeout, daemon.ping()).await {
                Ok(Ok(ping)) if !ping.api_version.is_empty() => return Source::DockerDaemon,
                Ok(Ok(_)) => tracing::debug!("Docker daemon answered without an API version"),
                Ok(Err(e)) => tracing::debug!(error = %e, "Docker daemon not reachable"),
                Err(_) => tracing::debug!(
                    timeout = ?self.ping_timeout,
                    "Docker daemon ping timed out"
                ),
            }
        }

        Source::OciRegistry
    }
}

impl std::fmt::Debug for SourceDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceDetector")
            .field("daemon", &self.daemon.is_some())
            .field("ping_timeout", &self.ping_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::{build_tar, lying_tar};
    use crate::docker::testing::FakeDaemon;
    use tempfile::TempDir;

    fn detector(daemon: Option<FakeDaemon>) -> SourceDetector {
        SourceDetector::new(
            daemon.map(|d| Arc::new(d) as Arc<dyn DaemonClient>),
            Duration::from_millis(200),
        )
    }

    fn write(dir: &TempDir, name: &str, contents: &[u8]) -> String {
        let path = dir.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_scheme_vocabulary() {
        assert_eq!(Source::from_scheme("docker-archive"), Source::DockerTarball);
        assert_eq!(Source::from_scheme("DOCKER"), Source::DockerDaemon);
        assert_eq!(Source::from_scheme("oci-dir"), Source::OciDirectory);
        assert_eq!(Source::from_scheme("Oci-Archive"), Source::OciTarball);
        assert_eq!(Source::from_scheme("oci-registry"), Source::OciRegistry);
        assert_eq!(Source::from_scheme("registry"), Source::OciRegistry);
        assert_eq!(Source::from_scheme("bogus"), Source::Unknown);
        assert_eq!(Source::from_scheme(""), Source::Unknown);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(Source::Unknown.to_string(), "UnknownSource");
        assert_eq!(Source::OciRegistry.to_string(), "OciRegistry");
        assert_eq!("docker".parse::<Source>().unwrap(), Source::DockerDaemon);
        assert_eq!("OciTarball".parse::<Source>().unwrap(), Source::OciTarball);
        assert!("bogus".parse::<Source>().is_err());
    }

    #[test]
    fn test_expand_home() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(
            expand_home("~/img.tar").unwrap(),
            format!("{}/img.tar", home.display())
        );
        assert_eq!(expand_home("/abs/img.tar").unwrap(), "/abs/img.tar");
        assert!(matches!(
            expand_home("~bob/img.tar"),
            Err(ImageError::Expansion { .. })
        ));
    }

    #[test]
    fn test_path_probe_oci_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().display().to_string();
        assert_eq!(detect_source_from_path(&path).unwrap(), PathProbe::Unrecognized);

        std::fs::write(dir.path().join("oci-layout"), r#"{"imageLayoutVersion":"1.0.0"}"#).unwrap();
        assert_eq!(
            detect_source_from_path(&path).unwrap(),
            PathProbe::Found(Source::OciDirectory)
        );
    }

    #[test]
    fn test_path_probe_missing_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.tar").display().to_string();
        assert_eq!(detect_source_from_path(&path).unwrap(), PathProbe::Missing);
        assert_eq!(PathProbe::Missing.source(), Source::Unknown);
    }

    #[test]
    fn test_path_probe_archives() {
        let dir = TempDir::new().unwrap();
        let docker = write(&dir, "docker.tar", &build_tar(&[("manifest.json", b"[]")]));
        let oci = write(&dir, "oci.tar", &build_tar(&[("oci-layout", b"{}")]));
        let other = write(&dir, "other.tar", &build_tar(&[("readme", b"hi")]));

        assert_eq!(
            detect_source_from_path(&docker).unwrap(),
            PathProbe::Found(Source::DockerTarball)
        );
        assert_eq!(
            detect_source_from_path(&oci).unwrap(),
            PathProbe::Found(Source::OciTarball)
        );
        assert_eq!(detect_source_from_path(&other).unwrap(), PathProbe::Unrecognized);
    }

    #[test]
    fn test_manifest_takes_precedence_over_oci_layout() {
        let dir = TempDir::new().unwrap();
        // oci-layout stored first to make sure ordering in the archive does not matter
        let both = write(
            &dir,
            "both.tar",
            &build_tar(&[("oci-layout", b"{}"), ("manifest.json", b"[]")]),
        );
        assert_eq!(
            detect_source_from_path(&both).unwrap(),
            PathProbe::Found(Source::DockerTarball)
        );
    }

    #[test]
    fn test_probe_ignores_declared_member_size() {
        let dir = TempDir::new().unwrap();
        let crafted = write(&dir, "crafted.tar", &lying_tar("manifest.json", 1 << 46, b"[]"));
        assert_eq!(
            detect_source_from_path(&crafted).unwrap(),
            PathProbe::Found(Source::DockerTarball)
        );
    }

    #[test]
    fn test_unreadable_archive_short_circuits() {
        let dir = TempDir::new().unwrap();
        let garbage = write(&dir, "garbage.tar", &[0x41u8; 2048]);
        assert!(matches!(
            detect_source_from_path(&garbage),
            Err(ImageError::Archive { .. })
        ));
    }

    #[tokio::test]
    async fn test_explicit_scheme_keeps_remainder_verbatim() {
        let d = detector(None);
        let (source, location) = d.detect("docker:registry.local:5000/app:1.0").await.unwrap();
        assert_eq!(source, Source::DockerDaemon);
        assert_eq!(location, "registry.local:5000/app:1.0");

        let (source, location) = d.detect("REGISTRY:alpine:3.19").await.unwrap();
        assert_eq!(source, Source::OciRegistry);
        assert_eq!(location, "alpine:3.19");
    }

    #[tokio::test]
    async fn test_explicit_path_scheme_expands_home() {
        let d = detector(None);
        let home = dirs::home_dir().unwrap();
        let (source, location) = d.detect("docker-archive:~/img.tar").await.unwrap();
        assert_eq!(source, Source::DockerTarball);
        assert_eq!(location, format!("{}/img.tar", home.display()));

        let err = d.detect("oci-dir:~bob/layout").await.unwrap_err();
        assert!(matches!(err, ImageError::Expansion { .. }));
    }

    #[tokio::test]
    async fn test_bare_path_is_probed() {
        let dir = TempDir::new().unwrap();
        let oci = write(&dir, "oci.tar", &build_tar(&[("oci-layout", b"{}")]));
        let (source, location) = detector(None).detect(&oci).await.unwrap();
        assert_eq!(source, Source::OciTarball);
        assert_eq!(location, oci);
    }

    #[tokio::test]
    async fn test_unrecognized_scheme_behaves_like_no_scheme() {
        let reachable = detector(Some(FakeDaemon::reachable("1.43")));
        assert_eq!(
            reachable.detect("bogus:thing").await.unwrap(),
            (Source::DockerDaemon, "bogus:thing".to_string())
        );

        let unreachable = detector(None);
        assert_eq!(
            unreachable.detect("bogus:thing").await.unwrap(),
            (Source::OciRegistry, "bogus:thing".to_string())
        );
    }

    #[tokio::test]
    async fn test_reference_with_reachable_daemon() {
        let d = detector(Some(FakeDaemon::reachable("1.43")));
        assert_eq!(
            d.detect("alpine:3.19").await.unwrap(),
            (Source::DockerDaemon, "alpine:3.19".to_string())
        );
    }

    #[tokio::test]
    async fn test_reference_falls_back_to_registry() {
        for daemon in [
            FakeDaemon::reachable(""),
            FakeDaemon::unreachable(),
            FakeDaemon::hanging(),
        ] {
            let d = detector(Some(daemon));
            assert_eq!(
                d.detect("alpine:3.19").await.unwrap(),
                (Source::OciRegistry, "alpine:3.19".to_string())
            );
        }
    }

    #[tokio::test]
    async fn test_nothing_matches() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.tar").display().to_string();
        let d = detector(Some(FakeDaemon::reachable("1.43")));
        assert_eq!(d.detect(&missing).await.unwrap(), (Source::Unknown, String::new()));
        assert_eq!(d.detect("Not A Reference").await.unwrap(), (Source::Unknown, String::new()));
    }
}
