//! Docker CLI configuration file (`config.json`).
//!
//! Only the static `auths` table is read. Credential helpers
//! (`credsStore`, `credHelpers`) are not executed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use imgsrc_core::error::{ImageError, Result};
use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "config.json";

/// One entry of the `auths` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthEntry {
    /// base64 of `username:password`
    #[serde(default)]
    pub auth: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

/// Resolved username/password for one registry.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AuthConfig {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Parsed docker `config.json`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DockerConfigFile {
    #[serde(default)]
    pub auths: HashMap<String, AuthEntry>,
    #[serde(default, rename = "credsStore")]
    pub creds_store: Option<String>,
    #[serde(default, rename = "credHelpers")]
    pub cred_helpers: HashMap<String, String>,
    #[serde(skip)]
    pub filename: PathBuf,
}

impl DockerConfigFile {
    /// Directory holding `config.json`: `DOCKER_CONFIG`, else `~/.docker`.
    pub fn default_dir() -> Option<PathBuf> {
        match std::env::var_os("DOCKER_CONFIG") {
            Some(dir) if !dir.is_empty() => Some(PathBuf::from(dir)),
            _ => dirs::home_dir().map(|home| home.join(".docker")),
        }
    }

    /// Load `config.json` from `dir` (or the default directory).
    /// A missing file is an empty configuration.
    pub fn load(dir: Option<&Path>) -> Result<Self> {
        let dir = match dir {
            Some(dir) => dir.to_path_buf(),
            None => match Self::default_dir() {
                Some(dir) => dir,
                None => return Ok(Self::default()),
            },
        };
        let filename = dir.join(CONFIG_FILE_NAME);

        let data = match std::fs::read_to_string(&filename) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %filename.display(), "No docker config file");
                return Ok(Self {
                    filename,
                    ..Self::default()
                });
            }
            Err(e) => {
                return Err(ImageError::Config(format!(
                    "failed to read docker config {}: {}",
                    filename.display(),
                    e
                )))
            }
        };

        let mut config: DockerConfigFile = serde_json::from_str(&data).map_err(|e| {
            ImageError::Config(format!(
                "failed to parse docker config {}: {}",
                filename.display(),
                e
            ))
        })?;
        config.filename = filename;
        Ok(config)
    }

    /// Credentials stored for `hostname`, if any.
    pub fn auth_config(&self, hostname: &str) -> Result<Option<AuthConfig>> {
        let wanted = normalize_registry(hostname);

        if self.creds_store.is_some() || self.cred_helpers.contains_key(hostname) {
            tracing::debug!(
                registry = hostname,
                "Docker credential helpers are not supported, using static auths only"
            );
        }

        let Some(entry) = self
            .auths
            .iter()
            .find(|(key, _)| normalize_registry(key) == wanted)
            .map(|(_, entry)| entry)
        else {
            return Ok(None);
        };

        if !entry.auth.is_empty() {
            return decode_auth(hostname, &entry.auth).map(Some);
        }
        if entry.username.is_empty() {
            return Ok(None);
        }
        Ok(Some(AuthConfig {
            username: entry.username.clone(),
            password: entry.password.clone(),
        }))
    }
}

fn decode_auth(hostname: &str, auth: &str) -> Result<AuthConfig> {
    let invalid = |why: String| {
        ImageError::Config(format!("invalid auth entry for '{}': {}", hostname, why))
    };
    let decoded = STANDARD
        .decode(auth.trim())
        .map_err(|e| invalid(e.to_string()))?;
    let decoded = String::from_utf8(decoded).map_err(|e| invalid(e.to_string()))?;
    let (username, password) = decoded
        .split_once(':')
        .ok_or_else(|| invalid("expected username:password".to_string()))?;
    Ok(AuthConfig {
        username: username.to_string(),
        password: password.to_string(),
    })
}

/// Keys may be bare hosts or URLs such as `https://index.docker.io/v1/`.
fn normalize_registry(registry: &str) -> String {
    let r = registry.trim().to_lowercase();
    let r = r
        .strip_prefix("https://")
        .or_else(|| r.strip_prefix("http://"))
        .unwrap_or(r.as_str());
    let host = r.split('/').next().unwrap_or_default();
    if host == "docker.io" || host == "registry-1.docker.io" {
        "index.docker.io".to_string()
    } else {
        host.to_string()
    }
}

#[derive(Serialize)]
struct RegistryAuth<'a> {
    username: &'a str,
    password: &'a str,
}

/// Encode credentials for the `X-Registry-Auth` header.
pub fn encode_credentials(username: &str, password: &str) -> Result<String> {
    let json = serde_json::to_vec(&RegistryAuth { username, password })?;
    Ok(STANDARD.encode(json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, json: &str) {
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), json).unwrap();
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let config = DockerConfigFile::load(Some(dir.path())).unwrap();
        assert!(config.auths.is_empty());
        assert_eq!(config.filename, dir.path().join(CONFIG_FILE_NAME));
        assert_eq!(config.auth_config("ghcr.io").unwrap(), None);
    }

    #[test]
    fn test_plain_username_password() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            r#"{"auths":{"ghcr.io":{"username":"me","password":"secret"}}}"#,
        );
        let config = DockerConfigFile::load(Some(dir.path())).unwrap();
        let auth = config.auth_config("GHCR.io").unwrap().unwrap();
        assert_eq!(auth.username, "me");
        assert_eq!(auth.password, "secret");
    }

    #[test]
    fn test_auth_field_decoding() {
        let dir = TempDir::new().unwrap();
        let encoded = STANDARD.encode("me:pa:ss");
        write_config(
            &dir,
            &format!(
                r#"{{"auths":{{"https://index.docker.io/v1/":{{"auth":"{}"}}}}}}"#,
                encoded
            ),
        );
        let config = DockerConfigFile::load(Some(dir.path())).unwrap();
        let auth = config.auth_config("index.docker.io").unwrap().unwrap();
        assert_eq!(auth.username, "me");
        assert_eq!(auth.password, "pa:ss");
    }

    #[test]
    fn test_bad_auth_field() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, r#"{"auths":{"ghcr.io":{"auth":"!!!"}}}"#);
        let config = DockerConfigFile::load(Some(dir.path())).unwrap();
        assert!(matches!(
            config.auth_config("ghcr.io"),
            Err(ImageError::Config(_))
        ));
    }

    #[test]
    fn test_creds_store_only_is_anonymous() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, r#"{"auths":{"ghcr.io":{}},"credsStore":"desktop"}"#);
        let config = DockerConfigFile::load(Some(dir.path())).unwrap();
        assert_eq!(config.creds_store.as_deref(), Some("desktop"));
        assert_eq!(config.auth_config("ghcr.io").unwrap(), None);
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "{not json");
        assert!(matches!(
            DockerConfigFile::load(Some(dir.path())),
            Err(ImageError::Config(_))
        ));
    }

    #[test]
    fn test_encode_credentials_keeps_html_characters() {
        let encoded = encode_credentials("a<b", "c>d&e").unwrap();
        let decoded = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded, r#"{"username":"a<b","password":"c>d&e"}"#);
    }

    #[test]
    fn test_normalize_registry() {
        assert_eq!(normalize_registry("https://index.docker.io/v1/"), "index.docker.io");
        assert_eq!(normalize_registry("docker.io"), "index.docker.io");
        assert_eq!(normalize_registry("Localhost:5000"), "localhost:5000");
    }
}
