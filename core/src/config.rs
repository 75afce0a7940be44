use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default docker daemon endpoint.
pub const DEFAULT_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// Docker `image save` clocks in at roughly 125 MiB/s on commodity hardware.
pub const DEFAULT_SAVE_THROUGHPUT: u64 = 125 * 1024 * 1024;

/// Image acquisition configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Name prefix of the process-wide temp directory root
    pub tmpdir_prefix: String,

    /// Docker daemon endpoint (`unix://...` or `tcp://...`)
    pub docker_host: String,

    /// Directory holding the docker `config.json` (None = `~/.docker`)
    pub docker_config_dir: Option<PathBuf>,

    /// Deadline for the daemon reachability probe, in seconds
    pub ping_timeout_secs: u64,

    /// Assumed `image save` throughput in bytes per second
    pub save_throughput_bytes: u64,

    /// Options for registry-based acquisition
    pub registry: RegistryOptions,

    /// Log level
    pub log_level: LogLevel,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            tmpdir_prefix: "imgsrc".to_string(),
            docker_host: DEFAULT_DOCKER_HOST.to_string(),
            docker_config_dir: None,
            ping_timeout_secs: 10,
            save_throughput_bytes: DEFAULT_SAVE_THROUGHPUT,
            registry: RegistryOptions::default(),
            log_level: LogLevel::Warn,
        }
    }
}

impl FetchConfig {
    /// Default configuration overlaid with `DOCKER_HOST`, `DOCKER_CONFIG`,
    /// `IMGSRC_TMPDIR_PREFIX` and `IMGSRC_LOG_LEVEL`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(host) = std::env::var("DOCKER_HOST") {
            if !host.is_empty() {
                config.docker_host = host;
            }
        }
        if let Ok(dir) = std::env::var("DOCKER_CONFIG") {
            if !dir.is_empty() {
                config.docker_config_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(prefix) = std::env::var("IMGSRC_TMPDIR_PREFIX") {
            if !prefix.is_empty() {
                config.tmpdir_prefix = prefix;
            }
        }
        if let Ok(level) = std::env::var("IMGSRC_LOG_LEVEL") {
            match LogLevel::parse(&level) {
                Some(level) => config.log_level = level,
                None => tracing::warn!(level = %level, "Ignoring unknown IMGSRC_LOG_LEVEL"),
            }
        }
        config
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.ping_timeout_secs)
    }
}

/// Registry access options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryOptions {
    /// Talk plain HTTP instead of HTTPS
    pub insecure_use_http: bool,

    /// Explicit credentials, matched by registry authority
    pub credentials: Vec<RegistryCredentials>,
}

impl RegistryOptions {
    /// Credentials configured for the given registry authority, if any.
    pub fn credentials_for(&self, authority: &str) -> Option<&RegistryCredentials> {
        self.credentials
            .iter()
            .find(|c| c.authority.eq_ignore_ascii_case(authority))
    }
}

/// Username/password pair for one registry
#[derive(Clone, Serialize, Deserialize)]
pub struct RegistryCredentials {
    /// Registry authority (e.g. "ghcr.io", "localhost:5000")
    pub authority: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("authority", &self.authority)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Some(LogLevel::Debug),
            "info" => Some(LogLevel::Info),
            "warn" | "warning" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }

    /// Directive usable as an `EnvFilter` default.
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FetchConfig::default();
        assert_eq!(config.docker_host, DEFAULT_DOCKER_HOST);
        assert_eq!(config.ping_timeout(), Duration::from_secs(10));
        assert_eq!(config.save_throughput_bytes, 125 * 1024 * 1024);
        assert!(config.docker_config_dir.is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: FetchConfig =
            serde_json::from_str(r#"{"ping_timeout_secs": 3, "log_level": "debug"}"#).unwrap();
        assert_eq!(config.ping_timeout_secs, 3);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.tmpdir_prefix, "imgsrc");
    }

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("INFO"), Some(LogLevel::Info));
        assert_eq!(LogLevel::parse(" warning "), Some(LogLevel::Warn));
        assert_eq!(LogLevel::parse("loud"), None);
        assert_eq!(LogLevel::Debug.as_filter(), "debug");
    }

    #[test]
    fn test_credentials_lookup_is_case_insensitive() {
        let options = RegistryOptions {
            insecure_use_http: false,
            credentials: vec![RegistryCredentials {
                authority: "GHCR.io".to_string(),
                username: "u".to_string(),
                password: "p".to_string(),
            }],
        };
        assert_eq!(options.credentials_for("ghcr.io").unwrap().username, "u");
        assert!(options.credentials_for("quay.io").is_none());
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = RegistryCredentials {
            authority: "ghcr.io".to_string(),
            username: "u".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", creds).contains("hunter2"));
    }
}
