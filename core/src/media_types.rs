//! Media types, annotation keys and the push scheme table.
//!
//! Everything the codec and the pusher need to know about a scheme lives in
//! [`SCHEMES`]; callers look a scheme up instead of branching on it.

use serde::{Deserialize, Serialize};

/// OCI image manifest.
pub const OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// OCI image index.
pub const OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// Docker image manifest, schema 2.
pub const DOCKER_MANIFEST: &str = "application/vnd.docker.distribution.manifest.v2+json";
/// Docker manifest list, schema 2.
pub const DOCKER_MANIFEST_LIST: &str = "application/vnd.docker.distribution.manifest.list.v2+json";
/// CNAB bundle configuration blob.
pub const CNAB_CONFIG: &str = "application/vnd.cnab.config.v1+json";
/// Generic container image configuration blob.
pub const DOCKER_IMAGE_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
/// Artifact type advertised by the full scheme.
pub const CNAB_ARTIFACT_TYPE: &str = "application/vnd.cnab.manifest.v1";

/// Media types an image locator may resolve to.
pub const ACCEPTED_IMAGE_MEDIA_TYPES: [&str; 4] =
    [OCI_MANIFEST, OCI_INDEX, DOCKER_MANIFEST, DOCKER_MANIFEST_LIST];

/// Annotation keys.
pub mod annotations {
    pub const MANIFEST_TYPE: &str = "io.cnab.manifest.type";
    pub const COMPONENT_NAME: &str = "io.cnab.component.name";
    pub const ORIGINAL_NAME: &str = "io.cnab.component.original_name";
    pub const RUNTIME_VERSION: &str = "io.cnab.runtime_version";
    pub const KEYWORDS: &str = "io.cnab.keywords";
    pub const ARTIFACT_TYPE: &str = "org.opencontainers.artifactType";
    pub const TITLE: &str = "org.opencontainers.image.title";
    pub const VERSION: &str = "org.opencontainers.image.version";
    pub const DESCRIPTION: &str = "org.opencontainers.image.description";
    pub const AUTHORS: &str = "org.opencontainers.image.authors";
    pub const APP_FORMAT: &str = "io.docker.app.format";
    pub const APP_TYPE: &str = "io.docker.type";

    /// Provenance markers stamped on every index.
    pub const PROVENANCE: [(&str, &str); 2] = [(APP_FORMAT, "cnab"), (APP_TYPE, "app")];
}

/// Value of the `io.cnab.manifest.type` annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestType {
    Config,
    Invocation,
    Component,
}

impl ManifestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Config => "config",
            Self::Invocation => "invocation",
            Self::Component => "component",
        }
    }
}

impl std::str::FromStr for ManifestType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "config" => Ok(Self::Config),
            "invocation" => Ok(Self::Invocation),
            "component" => Ok(Self::Component),
            _ => Err(format!(
                "unknown manifest type: '{}' (supported: config, invocation, component)",
                s
            )),
        }
    }
}

impl std::fmt::Display for ManifestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Media-type layout used for one push attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Scheme {
    /// Custom CNAB config media type, OCI index, artifact-type annotation.
    Full,
    /// Generic image config and legacy manifest list for older registries.
    Compatible,
}

/// Media types and annotations a scheme emits.
#[derive(Debug, PartialEq, Eq)]
pub struct SchemeMediaTypes {
    pub scheme: Scheme,
    pub config: &'static str,
    pub config_manifest: &'static str,
    pub index: &'static str,
    pub artifact_type: Option<&'static str>,
}

/// The scheme table.
pub static SCHEMES: [SchemeMediaTypes; 2] = [
    SchemeMediaTypes {
        scheme: Scheme::Full,
        config: CNAB_CONFIG,
        config_manifest: OCI_MANIFEST,
        index: OCI_INDEX,
        artifact_type: Some(CNAB_ARTIFACT_TYPE),
    },
    SchemeMediaTypes {
        scheme: Scheme::Compatible,
        config: DOCKER_IMAGE_CONFIG,
        config_manifest: DOCKER_MANIFEST,
        index: DOCKER_MANIFEST_LIST,
        artifact_type: None,
    },
];

impl Scheme {
    /// Look up this scheme's row in [`SCHEMES`].
    pub fn media_types(self) -> &'static SchemeMediaTypes {
        // Rows are laid out in declaration order
        &SCHEMES[self as usize]
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Compatible => write!(f, "compatible"),
        }
    }
}

/// Whether the media type names a manifest rather than a blob.
pub fn is_manifest(media_type: &str) -> bool {
    ACCEPTED_IMAGE_MEDIA_TYPES.contains(&media_type)
}

/// Whether the media type names a multi-manifest document.
pub fn is_index(media_type: &str) -> bool {
    media_type == OCI_INDEX || media_type == DOCKER_MANIFEST_LIST
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_lookup() {
        let full = Scheme::Full.media_types();
        assert_eq!(full.config, CNAB_CONFIG);
        assert_eq!(full.index, OCI_INDEX);
        assert_eq!(full.artifact_type, Some(CNAB_ARTIFACT_TYPE));

        let compatible = Scheme::Compatible.media_types();
        assert_eq!(compatible.config, DOCKER_IMAGE_CONFIG);
        assert_eq!(compatible.config_manifest, DOCKER_MANIFEST);
        assert_eq!(compatible.index, DOCKER_MANIFEST_LIST);
        assert_eq!(compatible.artifact_type, None);
    }

    #[test]
    fn test_scheme_rows_in_declaration_order() {
        for scheme in [Scheme::Full, Scheme::Compatible] {
            assert_eq!(scheme.media_types().scheme, scheme);
        }
    }

    #[test]
    fn test_manifest_type_parse() {
        assert_eq!("config".parse::<ManifestType>().unwrap(), ManifestType::Config);
        assert_eq!(
            "component".parse::<ManifestType>().unwrap(),
            ManifestType::Component
        );
        assert!("layer".parse::<ManifestType>().is_err());
    }

    #[test]
    fn test_is_manifest() {
        assert!(is_manifest(OCI_MANIFEST));
        assert!(is_manifest(DOCKER_MANIFEST_LIST));
        assert!(!is_manifest(CNAB_CONFIG));
        assert!(!is_manifest("application/vnd.oci.image.layer.v1.tar+gzip"));
    }

    #[test]
    fn test_is_index() {
        assert!(is_index(OCI_INDEX));
        assert!(is_index(DOCKER_MANIFEST_LIST));
        assert!(!is_index(OCI_MANIFEST));
    }
}
