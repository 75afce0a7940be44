//! imgsrc Runtime - image source detection and acquisition.
//!
//! This crate resolves free-form image strings to a concrete source and
//! materializes images from the docker daemon, docker archives, OCI layouts,
//! OCI archives and OCI registries.

#![allow(clippy::result_large_err)]

mod archive;
pub mod docker;
pub mod fetcher;
pub mod image;
pub mod oci;
pub mod provider;
pub mod reference;
pub mod source;
pub mod tempdir;

// Re-export common types
pub use docker::{DaemonClient, DaemonImageProvider, DockerArchiveProvider, EngineClient};
pub use fetcher::{FetchedImage, ImageFetcher};
pub use image::{Image, ImageConfig, ImageMetadata};
pub use oci::{OciArchiveProvider, OciLayout, OciLayoutProvider, RegistryProvider};
pub use provider::Provider;
pub use reference::{is_registry_reference, ImageReference};
pub use source::{detect_source_from_path, expand_home, PathProbe, Source, SourceDetector};
pub use tempdir::TempDirGenerator;

/// imgsrc Runtime version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
