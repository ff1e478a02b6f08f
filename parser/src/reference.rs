//! Image reference parsing.
//!
//! Splits references like `ghcr.io/org/app:v1.2@sha256:abc...` into
//! registry, repository, tag and digest. Nothing is normalised: a missing
//! registry or tag stays missing, since the parser never resolves images.

use dockerfile_core::error::{DockerfileError, Result};
use serde::Serialize;

/// Parsed image reference as written in the Dockerfile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ImageRef {
    /// Registry hostname (e.g., "ghcr.io", "localhost:5000")
    pub registry: Option<String>,
    /// Repository path (e.g., "nginx", "org/app")
    pub repository: String,
    /// Tag (e.g., "1.25")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageRef {
    /// Parse an image reference string.
    ///
    /// Supports formats:
    /// - `nginx`
    /// - `nginx:1.25`
    /// - `myuser/myimage`
    /// - `ghcr.io/org/image:tag`
    /// - `localhost:5000/image@sha256:abc...`
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(DockerfileError::InvalidImageReference("empty image reference".to_string()));
        }
        if reference.chars().any(char::is_whitespace) {
            return Err(DockerfileError::InvalidImageReference(format!(
                "image reference '{}' contains whitespace",
                reference
            )));
        }

        // Split off digest first (@ separator)
        let (name_tag, digest) = match reference.split_once('@') {
            Some((name_tag, digest)) => {
                if !digest.contains(':') {
                    return Err(DockerfileError::InvalidImageReference(format!(
                        "invalid digest in reference '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (name_tag, Some(digest.to_string()))
            }
            None => (reference, None),
        };

        // Tag is after the last colon that follows the last slash
        let tag_start = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (name, tag) = match name_tag[tag_start..].rfind(':') {
            Some(colon) => {
                let colon = tag_start + colon;
                (&name_tag[..colon], Some(name_tag[colon + 1..].to_string()))
            }
            None => (name_tag, None),
        };

        if name.is_empty() {
            return Err(DockerfileError::InvalidImageReference(format!(
                "missing repository in reference '{}'",
                reference
            )));
        }
        if tag.as_deref() == Some("") {
            return Err(DockerfileError::InvalidImageReference(format!(
                "empty tag in reference '{}'",
                reference
            )));
        }

        let (registry, repository) = Self::split_registry_repository(name);
        if repository.is_empty() {
            return Err(DockerfileError::InvalidImageReference(format!(
                "empty repository in reference '{}'",
                reference
            )));
        }

        Ok(ImageRef {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Split a name into registry and repository components.
    fn split_registry_repository(name: &str) -> (Option<String>, String) {
        // The first component is a registry when it looks like a hostname
        // (contains a dot or colon, or is "localhost")
        if let Some((first, rest)) = name.split_once('/') {
            if first.contains('.') || first.contains(':') || first == "localhost" {
                return (Some(first.to_string()), rest.to_string());
            }
        }
        (None, name.to_string())
    }

    /// Repository with its registry prefix, without tag or digest.
    pub fn name(&self) -> String {
        match &self.registry {
            Some(registry) => format!("{}/{}", registry, self.repository),
            None => self.repository.clone(),
        }
    }

    /// True for a bare single-component name, the only shape that can
    /// refer to a build stage.
    pub fn is_bare_name(&self) -> bool {
        self.registry.is_none()
            && self.tag.is_none()
            && self.digest.is_none()
            && !self.repository.contains('/')
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())?;
        if let Some(ref tag) = self.tag {
            write!(f, ":{}", tag)?;
        }
        if let Some(ref digest) = self.digest {
            write!(f, "@{}", digest)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ImageRef {
    type Err = DockerfileError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_name() {
        let r = ImageRef::parse("nginx").unwrap();
        assert_eq!(r.registry, None);
        assert_eq!(r.repository, "nginx");
        assert_eq!(r.tag, None);
        assert_eq!(r.digest, None);
        assert!(r.is_bare_name());
    }

    #[test]
    fn test_parse_name_with_tag() {
        let r = ImageRef::parse("nginx:1.25").unwrap();
        assert_eq!(r.repository, "nginx");
        assert_eq!(r.tag, Some("1.25".to_string()));
        assert!(!r.is_bare_name());
    }

    #[test]
    fn test_parse_user_repo() {
        let r = ImageRef::parse("myuser/myimage").unwrap();
        assert_eq!(r.registry, None);
        assert_eq!(r.repository, "myuser/myimage");
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageRef::parse("localhost:5000/app:dev").unwrap();
        assert_eq!(r.registry, Some("localhost:5000".to_string()));
        assert_eq!(r.repository, "app");
        assert_eq!(r.tag, Some("dev".to_string()));
    }

    #[test]
    fn test_parse_digest() {
        let r = ImageRef::parse("ghcr.io/org/image@sha256:abc123").unwrap();
        assert_eq!(r.registry, Some("ghcr.io".to_string()));
        assert_eq!(r.repository, "org/image");
        assert_eq!(r.tag, None);
        assert_eq!(r.digest, Some("sha256:abc123".to_string()));
    }

    #[test]
    fn test_parse_tag_and_digest() {
        let r = ImageRef::parse("alpine:3.19@sha256:def").unwrap();
        assert_eq!(r.tag, Some("3.19".to_string()));
        assert_eq!(r.digest, Some("sha256:def".to_string()));
        assert_eq!(r.to_string(), "alpine:3.19@sha256:def");
    }

    #[test]
    fn test_parse_invalid() {
        assert!(ImageRef::parse("").is_err());
        assert!(ImageRef::parse("alpine@nocolon").is_err());
        assert!(ImageRef::parse("alpine:").is_err());
        assert!(ImageRef::parse(":tag").is_err());
        assert!(matches!(
            ImageRef::parse("alpine:"),
            Err(DockerfileError::InvalidImageReference(ref reason)) if reason.contains("empty tag")
        ));
    }

    #[test]
    fn test_display_roundtrip() {
        for reference in ["nginx", "golang:1.21-alpine", "registry.example.com/team/app:2"] {
            assert_eq!(ImageRef::parse(reference).unwrap().to_string(), reference);
        }
    }

    #[test]
    fn test_from_str() {
        let r: ImageRef = "busybox:musl".parse().unwrap();
        assert_eq!(r.tag.as_deref(), Some("musl"));
    }
}
