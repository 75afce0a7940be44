//! Container image reference parsing.
//!
//! Parses image references like `ghcr.io/org/image:v1` into structured
//! components. Validation is deliberately weak: only the grammar of each
//! component is checked, nothing is resolved against a registry.

use imgsrc_core::error::{ImageError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Hostname docker uses for credentials of the default registry.
const DEFAULT_REGISTRY_HOST: &str = "index.docker.io";

/// Default tag when none is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// Registry hostname (e.g., "ghcr.io", "docker.io")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "org/code")
    pub repository: String,
    /// Tag (e.g., "latest", "v0.1.0")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `nginx:1.25` → docker.io/library/nginx:1.25
    /// - `myuser/myimage` → docker.io/myuser/myimage:latest
    /// - `ghcr.io/org/image:tag` → ghcr.io/org/image:tag
    /// - `ghcr.io/org/image@sha256:abc...` → ghcr.io/org/image@sha256:abc...
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ImageError::InvalidReference(
                "empty image reference".to_string(),
            ));
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = match reference.split_once('@') {
            Some((name_tag, digest)) => {
                validate_digest(reference, digest)?;
                (name_tag, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        let (name, tag) = split_tag(name_tag);
        if let Some(tag) = tag {
            validate_tag(reference, tag)?;
        }

        let (registry, repository) = split_registry_repository(reference, name)?;

        // Apply default tag if no tag and no digest
        let tag = match (tag, &digest) {
            (Some(tag), _) => Some(tag.to_string()),
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (None, Some(_)) => None,
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Hostname to use when looking up registry credentials.
    pub fn registry_host(&self) -> &str {
        if self.registry == DEFAULT_REGISTRY {
            DEFAULT_REGISTRY_HOST
        } else {
            &self.registry
        }
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = format!("{}/{}", self.registry, self.repository);
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

/// Whether `candidate` is grammatically an image reference.
pub fn is_registry_reference(candidate: &str) -> bool {
    ImageReference::parse(candidate).is_ok()
}

/// Split `name[:tag]`, where the tag colon must come after the last slash.
fn split_tag(name_tag: &str) -> (&str, Option<&str>) {
    let last_slash = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
    match name_tag[last_slash..].rfind(':') {
        Some(colon) => {
            let colon = last_slash + colon;
            (&name_tag[..colon], Some(&name_tag[colon + 1..]))
        }
        None => (name_tag, None),
    }
}

/// Split a name into registry and repository components.
fn split_registry_repository(reference: &str, name: &str) -> Result<(String, String)> {
    // The first component is a registry if it looks like a hostname
    let (registry, repository) = match name.split_once('/') {
        Some((first, rest))
            if first.contains('.') || first.contains(':') || first == "localhost" =>
        {
            validate_registry(reference, first)?;
            (first.to_string(), rest.to_string())
        }
        _ => (DEFAULT_REGISTRY.to_string(), name.to_string()),
    };

    validate_repository(reference, &repository)?;

    // Single name like "nginx" → "library/nginx" for Docker Hub
    let repository = if registry == DEFAULT_REGISTRY && !repository.contains('/') {
        format!("library/{}", repository)
    } else {
        repository
    };

    Ok((registry, repository))
}

fn invalid(reference: &str, what: &str) -> ImageError {
    ImageError::InvalidReference(format!("{} in reference '{}'", what, reference))
}

fn validate_registry(reference: &str, registry: &str) -> Result<()> {
    let (host, port) = match registry.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (registry, None),
    };
    let host_ok = !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
        && !host.starts_with(['.', '-'])
        && !host.ends_with(['.', '-']);
    let port_ok = port.map_or(true, |p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if host_ok && port_ok {
        Ok(())
    } else {
        Err(invalid(reference, "invalid registry"))
    }
}

/// Repositories are lowercase path components of `[a-z0-9]` joined by
/// `.`, `_`, `-` (at least two characters overall).
fn validate_repository(reference: &str, repository: &str) -> Result<()> {
    if repository.len() < 2 || repository.len() > 255 {
        return Err(invalid(reference, "repository must be 2 to 255 characters"));
    }
    for component in repository.split('/') {
        let ok = !component.is_empty()
            && component.chars().all(|c| {
                c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')
            })
            && component.starts_with(|c: char| c.is_ascii_alphanumeric())
            && component.ends_with(|c: char| c.is_ascii_alphanumeric());
        if !ok {
            return Err(invalid(reference, "invalid repository component"));
        }
    }
    Ok(())
}

/// Tags match `[\w][\w.-]{0,127}`.
fn validate_tag(reference: &str, tag: &str) -> Result<()> {
    let word = |c: char| c.is_ascii_alphanumeric() || c == '_';
    let ok = !tag.is_empty()
        && tag.len() <= 128
        && tag.starts_with(word)
        && tag.chars().all(|c| word(c) || c == '.' || c == '-');
    if ok {
        Ok(())
    } else {
        Err(invalid(reference, "invalid tag"))
    }
}

/// Digests are `sha256:` followed by 64 lowercase hex characters.
fn validate_digest(reference: &str, digest: &str) -> Result<()> {
    let ok = digest
        .strip_prefix("sha256:")
        .map_or(false, |hex| {
            hex.len() == 64 && hex.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c))
        });
    if ok {
        Ok(())
    } else {
        Err(invalid(reference, "invalid digest, expected sha256:<64 hex>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:abcdef1234567890abcdef1234567890abcdef1234567890abcdef1234567890";

    #[test]
    fn test_parse_simple_name() {
        let r = ImageReference::parse("nginx").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, Some("latest".to_string()));
        assert_eq!(r.digest, None);
    }

    #[test]
    fn test_parse_name_with_tag() {
        let r = ImageReference::parse("nginx:1.25").unwrap();
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, Some("1.25".to_string()));
    }

    #[test]
    fn test_parse_custom_registry() {
        let r = ImageReference::parse("ghcr.io/org/code:v0.1.0").unwrap();
        assert_eq!(r.registry, "ghcr.io");
        assert_eq!(r.repository, "org/code");
        assert_eq!(r.tag, Some("v0.1.0".to_string()));
        assert_eq!(r.registry_host(), "ghcr.io");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("myregistry.io:5000/myimage:v1").unwrap();
        assert_eq!(r.registry, "myregistry.io:5000");
        assert_eq!(r.repository, "myimage");
        assert_eq!(r.tag, Some("v1".to_string()));
    }

    #[test]
    fn test_parse_localhost_registry() {
        let r = ImageReference::parse("localhost/myimage:test").unwrap();
        assert_eq!(r.registry, "localhost");
        assert_eq!(r.repository, "myimage");
    }

    #[test]
    fn test_parse_digest_only() {
        let r = ImageReference::parse(&format!("ghcr.io/org/code@{}", DIGEST)).unwrap();
        assert_eq!(r.tag, None);
        assert_eq!(r.digest.as_deref(), Some(DIGEST));
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let r = ImageReference::parse(&format!("ghcr.io/org/code:v1@{}", DIGEST)).unwrap();
        assert_eq!(r.tag, Some("v1".to_string()));
        assert_eq!(r.digest.as_deref(), Some(DIGEST));
        assert_eq!(r.full_reference(), format!("ghcr.io/org/code:v1@{}", DIGEST));
    }

    #[test]
    fn test_default_registry_host() {
        let r = ImageReference::parse("alpine").unwrap();
        assert_eq!(r.registry_host(), "index.docker.io");
        assert_eq!(r.to_string(), "docker.io/library/alpine:latest");
    }

    #[test]
    fn test_rejects_malformed() {
        for bad in [
            "",
            "   ",
            "Alpine",
            "a",
            "/tmp/image.tar",
            "./image.tar",
            "~/image.tar",
            "nginx@invaliddigest",
            "nginx@sha256:short",
            "nginx:",
            "nginx:-bad",
            "org//image",
            "ghcr.io/",
        ] {
            assert!(!is_registry_reference(bad), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_accepts_weakly_valid() {
        for good in [
            "alpine",
            "alpine:3.19",
            "bogus:thing",
            "my_org/my-image.v2:1.0_rc",
            "localhost:5000/img",
        ] {
            assert!(is_registry_reference(good), "rejected {:?}", good);
        }
    }
}
