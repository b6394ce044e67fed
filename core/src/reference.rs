//! Registry image locator parsing.
//!
//! Parses locators like `my.registry/namespace/app:v1` or
//! `nginx@sha256:...` into registry, repository, tag and digest.

use crate::error::{CnabError, Result};

/// Default registry when none is specified.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Default tag when neither tag nor digest is specified.
const DEFAULT_TAG: &str = "latest";

/// Parsed image locator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// Registry hostname (e.g., "ghcr.io", "docker.io", "localhost:5000")
    pub registry: String,
    /// Repository path (e.g., "library/nginx", "namespace/my-app")
    pub repository: String,
    /// Tag (e.g., "latest", "v0.1.0")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ImageReference {
    /// Parse an image locator.
    ///
    /// Supports formats:
    /// - `nginx` → docker.io/library/nginx:latest
    /// - `nginx:1.25` → docker.io/library/nginx:1.25
    /// - `myuser/myimage` → docker.io/myuser/myimage:latest
    /// - `ghcr.io/org/image:tag` → ghcr.io/org/image:tag
    /// - `ghcr.io/org/image@sha256:abc...` → ghcr.io/org/image@sha256:abc...
    pub fn parse(reference: &str) -> Result<Self> {
        let trimmed = reference.trim();
        if trimmed.is_empty() {
            return Err(invalid(reference, "empty reference"));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(invalid(reference, "reference contains whitespace"));
        }

        let (name_tag, digest) = match trimmed.rfind('@') {
            Some(at_pos) => {
                let digest = &trimmed[at_pos + 1..];
                validate_digest(reference, digest)?;
                (&trimmed[..at_pos], Some(digest.to_string()))
            }
            None => (trimmed, None),
        };

        // A port only appears in a domain followed by '/', so the colon after
        // the last slash always separates the tag.
        let (name, tag) = match name_tag.rfind('/') {
            Some(slash_pos) => {
                let after_slash = &name_tag[slash_pos + 1..];
                match after_slash.rfind(':') {
                    Some(colon_pos) => (
                        &name_tag[..slash_pos + 1 + colon_pos],
                        Some(&after_slash[colon_pos + 1..]),
                    ),
                    None => (name_tag, None),
                }
            }
            None => match name_tag.rfind(':') {
                Some(colon_pos) => (&name_tag[..colon_pos], Some(&name_tag[colon_pos + 1..])),
                None => (name_tag, None),
            },
        };

        if let Some(tag) = tag {
            if tag.is_empty() {
                return Err(invalid(reference, "empty tag"));
            }
        }

        let (registry, repository) = split_registry_repository(reference, name)?;

        let tag = match (tag, &digest) {
            (None, None) => Some(DEFAULT_TAG.to_string()),
            (tag, _) => tag.map(str::to_string),
        };

        Ok(ImageReference {
            registry,
            repository,
            tag,
            digest,
        })
    }

    /// Whether this locator names immutable content.
    pub fn is_pinned(&self) -> bool {
        self.digest.is_some()
    }

    /// The same repository pinned to `digest`, without a tag.
    pub fn pinned(&self, digest: &str) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: Some(digest.to_string()),
        }
    }

    /// The bare repository, used as the push target for blobs.
    pub fn repository_reference(&self) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag: None,
            digest: None,
        }
    }

    /// Whether both locators address the same repository on the same registry.
    pub fn same_repository(&self, other: &Self) -> bool {
        self.registry == other.registry && self.repository == other.repository
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

impl std::str::FromStr for ImageReference {
    type Err = CnabError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn invalid(reference: &str, message: &str) -> CnabError {
    CnabError::InvalidReference {
        reference: reference.to_string(),
        message: message.to_string(),
    }
}

fn validate_digest(reference: &str, digest: &str) -> Result<()> {
    match digest.split_once(':') {
        Some((algorithm, encoded))
            if !algorithm.is_empty()
                && !encoded.is_empty()
                && encoded.chars().all(|c| c.is_ascii_hexdigit()) =>
        {
            Ok(())
        }
        _ => Err(invalid(reference, "invalid digest, expected algorithm:hex")),
    }
}

/// Split a name into registry and repository components.
fn split_registry_repository(reference: &str, name: &str) -> Result<(String, String)> {
    if name.is_empty() {
        return Err(invalid(reference, "empty repository"));
    }

    // The first component is a registry host if it has a dot, a port, or is localhost
    if let Some(slash_pos) = name.find('/') {
        let first = &name[..slash_pos];
        if first.contains('.') || first.contains(':') || first == "localhost" {
            let repository = &name[slash_pos + 1..];
            validate_repository(reference, repository)?;
            return Ok((first.to_string(), repository.to_string()));
        }
    }

    validate_repository(reference, name)?;
    let repository = if name.contains('/') {
        name.to_string()
    } else {
        format!("library/{}", name)
    };

    Ok((DEFAULT_REGISTRY.to_string(), repository))
}

fn validate_repository(reference: &str, repository: &str) -> Result<()> {
    if repository.is_empty() || repository.split('/').any(str::is_empty) {
        return Err(invalid(reference, "empty repository path component"));
    }
    let allowed = |c: char| c.is_ascii_lowercase() || c.is_ascii_digit() || "._-/".contains(c);
    if !repository.chars().all(allowed) {
        return Err(invalid(
            reference,
            "repository may only contain lowercase letters, digits and separators",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "sha256:d59a1aa7866258751a261bae525a1842c7ff0662d4f34a355d5f36826abc0341";

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
        let r = ImageReference::parse("nginx:2.12").unwrap();
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, Some("2.12".to_string()));

        let r = ImageReference::parse("redis:7").unwrap();
        assert_eq!(r.registry, "docker.io");
        assert_eq!(r.repository, "library/redis");
        assert_eq!(r.tag, Some("7".to_string()));

        let r = ImageReference::parse("postgres:16").unwrap();
        assert_eq!(r.repository, "library/postgres");
        assert_eq!(r.tag, Some("16".to_string()));
    }

    #[test]
    fn test_parse_numeric_tag_with_digest() {
        let r = ImageReference::parse(
            "node:20@sha256:4c510aef87d55a8b5b456a5c82d799472597e3440ea423756c1c2e711c9a1905",
        )
        .unwrap();
        assert_eq!(r.repository, "library/node");
        assert_eq!(r.tag, Some("20".to_string()));
        assert!(r.is_pinned());
    }

    #[test]
    fn test_parse_registry_port_needs_slash() {
        let r = ImageReference::parse("localhost:5000/app").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "app");
        assert_eq!(r.tag, Some("latest".to_string()));
    }

    #[test]
    fn test_parse_custom_registry() {
        let r = ImageReference::parse("my.registry/namespace/my-app:my-tag").unwrap();
        assert_eq!(r.registry, "my.registry");
        assert_eq!(r.repository, "namespace/my-app");
        assert_eq!(r.tag, Some("my-tag".to_string()));
        assert!(!r.is_pinned());
    }

    #[test]
    fn test_parse_digest_only() {
        let r = ImageReference::parse(&format!("my.registry/namespace/my-app@{DIGEST}")).unwrap();
        assert_eq!(r.tag, None);
        assert_eq!(r.digest.as_deref(), Some(DIGEST));
        assert!(r.is_pinned());
    }

    #[test]
    fn test_parse_registry_with_port() {
        let r = ImageReference::parse("localhost:5000/myimage:v1").unwrap();
        assert_eq!(r.registry, "localhost:5000");
        assert_eq!(r.repository, "myimage");
        assert_eq!(r.tag, Some("v1".to_string()));
    }

    #[test]
    fn test_parse_deep_repository_path() {
        let r = ImageReference::parse("ghcr.io/org/sub/image:v1").unwrap();
        assert_eq!(r.repository, "org/sub/image");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "   ", "nginx@invaliddigest", "nginx@sha256:xyz", "nginx:", "ghcr.io//x", "Nginx", "a b"] {
            let err = ImageReference::parse(bad).unwrap_err();
            assert!(
                matches!(err, CnabError::InvalidReference { .. }),
                "expected InvalidReference for {bad:?}"
            );
        }
    }

    #[test]
    fn test_pinned_drops_tag() {
        let r = ImageReference::parse("my.registry/namespace/my-app:my-tag").unwrap();
        assert_eq!(
            r.pinned(DIGEST).full_reference(),
            format!("my.registry/namespace/my-app@{DIGEST}")
        );
    }

    #[test]
    fn test_repository_reference() {
        let r = ImageReference::parse("my.registry/namespace/my-app:my-tag").unwrap();
        assert_eq!(r.repository_reference().to_string(), "my.registry/namespace/my-app");
    }

    #[test]
    fn test_same_repository() {
        let a = ImageReference::parse("my.registry/ns/app:v1").unwrap();
        let b = ImageReference::parse(&format!("my.registry/ns/app@{DIGEST}")).unwrap();
        let c = ImageReference::parse("other.registry/ns/app:v1").unwrap();
        assert!(a.same_repository(&b));
        assert!(!a.same_repository(&c));
    }

    #[test]
    fn test_display_round_trip() {
        let r = ImageReference::parse("nginx:1.25").unwrap();
        assert_eq!(format!("{}", r), "docker.io/library/nginx:1.25");
        let again: ImageReference = r.to_string().parse().unwrap();
        assert_eq!(again, r);
    }
}
