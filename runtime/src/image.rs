//! Materialized image handle.
//!
//! Providers return an [`Image`]: where the image came from, where its
//! content now lives on disk, and the metadata read from its configuration.

use std::collections::HashMap;
use std::path::PathBuf;

use oci_spec::image::ImageConfiguration;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::source::Source;

/// An image available on local disk.
#[derive(Debug, Clone, Serialize)]
pub struct Image {
    /// Source the image was acquired from
    pub source: Source,

    /// Reference or path the image was requested with
    pub location: String,

    /// Docker archive file or OCI layout directory holding the content
    pub content_path: PathBuf,

    pub metadata: ImageMetadata,
}

/// Identity and configuration of an image.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageMetadata {
    /// `sha256:` digest of the image configuration blob
    pub id: String,

    pub tags: Vec<String>,

    /// Repository digests (`name@sha256:...`), when known
    pub digests: Vec<String>,

    pub config: ImageConfig,

    /// Uncompressed layer digests (rootfs diff ids), bottom to top
    pub layers: Vec<String>,

    /// Size of the content on disk in bytes
    pub size: u64,
}

/// Runtime configuration carried by the image.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImageConfig {
    pub architecture: String,
    pub os: String,

    /// Entrypoint command
    pub entrypoint: Option<Vec<String>>,

    /// Default command arguments
    pub cmd: Option<Vec<String>>,

    /// Environment variables
    pub env: Vec<(String, String)>,

    pub working_dir: Option<String>,

    /// User to run as
    pub user: Option<String>,

    pub exposed_ports: Vec<String>,

    pub labels: HashMap<String, String>,
}

impl ImageConfig {
    /// Convert an OCI image configuration.
    pub fn from_oci_config(oci_config: &ImageConfiguration) -> Self {
        let config = oci_config.config();

        let entrypoint = config.as_ref().and_then(|c| c.entrypoint().clone());
        let cmd = config.as_ref().and_then(|c| c.cmd().clone());
        let working_dir = config.as_ref().and_then(|c| c.working_dir().clone());
        let user = config.as_ref().and_then(|c| c.user().clone());

        let env = config
            .as_ref()
            .and_then(|c| c.env().as_ref())
            .map(|env_list| {
                env_list
                    .iter()
                    .filter_map(|e| e.split_once('='))
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect()
            })
            .unwrap_or_default();

        let mut exposed_ports: Vec<String> = config
            .as_ref()
            .and_then(|c| c.exposed_ports().as_ref())
            .map(|ports| ports.iter().cloned().collect())
            .unwrap_or_default();
        exposed_ports.sort();

        let labels = config
            .as_ref()
            .and_then(|c| c.labels().clone())
            .unwrap_or_default();

        Self {
            architecture: oci_config.architecture().to_string(),
            os: oci_config.os().to_string(),
            entrypoint,
            cmd,
            env,
            working_dir,
            user,
            exposed_ports,
            labels,
        }
    }
}

/// Parse a configuration blob into the image id, config and layer list.
pub(crate) fn parse_config_blob(
    bytes: &[u8],
) -> serde_json::Result<(String, ImageConfig, Vec<String>)> {
    let oci_config: ImageConfiguration = serde_json::from_slice(bytes)?;
    let id = format!("sha256:{}", hex::encode(Sha256::digest(bytes)));
    let layers = oci_config.rootfs().diff_ids().clone();
    Ok((id, ImageConfig::from_oci_config(&oci_config), layers))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const CONFIG_JSON: &str = r#"{
        "architecture": "amd64",
        "os": "linux",
        "config": {
            "Entrypoint": ["/bin/app"],
            "Cmd": ["--serve"],
            "Env": ["PATH=/usr/local/bin:/usr/bin", "MODE=a=b"],
            "WorkingDir": "/srv",
            "ExposedPorts": {"8080/tcp": {}, "443/tcp": {}},
            "Labels": {"org.opencontainers.image.title": "app"}
        },
        "rootfs": {
            "type": "layers",
            "diff_ids": ["sha256:1111111111111111111111111111111111111111111111111111111111111111"]
        }
    }"#;

    #[test]
    fn test_parse_config_blob() {
        let (id, config, layers) = parse_config_blob(CONFIG_JSON.as_bytes()).unwrap();
        assert!(id.starts_with("sha256:"));
        assert_eq!(id.len(), "sha256:".len() + 64);
        assert_eq!(config.architecture, "amd64");
        assert_eq!(config.os, "linux");
        assert_eq!(config.entrypoint, Some(vec!["/bin/app".to_string()]));
        assert_eq!(config.working_dir.as_deref(), Some("/srv"));
        assert!(config.env.contains(&("MODE".to_string(), "a=b".to_string())));
        assert_eq!(config.exposed_ports, vec!["443/tcp", "8080/tcp"]);
        assert_eq!(
            config.labels.get("org.opencontainers.image.title").map(String::as_str),
            Some("app")
        );
        assert_eq!(layers.len(), 1);
    }

    #[test]
    fn test_id_is_content_digest() {
        let (a, _, _) = parse_config_blob(CONFIG_JSON.as_bytes()).unwrap();
        let (b, _, _) = parse_config_blob(CONFIG_JSON.replace("amd64", "arm64").as_bytes()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_invalid_config() {
        assert!(parse_config_blob(b"not json").is_err());
    }
}
