//! Docker daemon and docker archive support.

mod client;
mod config;
mod provider;
mod tarball;

pub use client::{ByteStream, DaemonClient, EngineClient, ImageInspect, Ping};
pub use config::{encode_credentials, AuthConfig, AuthEntry, DockerConfigFile};
pub use provider::{decode_pull_stream, DaemonImageProvider, STAGE_REQUESTING, STAGE_SAVING};
pub use tarball::{ArchiveManifestEntry, DockerArchiveProvider};

#[cfg(test)]
pub(crate) use tarball::tests::docker_archive;
