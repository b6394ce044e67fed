//! Registry capability consumed by the pusher and puller.
//!
//! The core never talks to the network directly: it is handed something
//! implementing [`Registry`]. [`crate::oci::OciRegistry`] is the real client,
//! [`crate::memory::MemoryRegistry`] the in-memory stand-in used by tests.

use async_trait::async_trait;
use cnab_oci_core::{CnabError, Descriptor, ImageReference};
use thiserror::Error;

/// Failure reported by a registry capability.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// The reference or content does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The registry refused content because of its media type
    #[error("media type rejected: {0}")]
    UnsupportedMediaType(String),

    /// Any other transport or server failure
    #[error("{0}")]
    Transport(String),
}

impl RemoteError {
    /// Attach the reference the failed request was addressed to.
    pub fn into_cnab(self, reference: &ImageReference) -> CnabError {
        match self {
            RemoteError::UnsupportedMediaType(media_type) => CnabError::UnsupportedMediaType {
                reference: reference.to_string(),
                media_type,
            },
            RemoteError::NotFound(message) => CnabError::UnresolvableReference {
                reference: reference.to_string(),
                message,
            },
            RemoteError::Transport(message) => CnabError::RegistryError {
                registry: reference.registry.clone(),
                message,
            },
        }
    }
}

/// What a registry is known to accept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RegistryHint {
    #[default]
    Unknown,
    /// Custom config media types and OCI indexes are accepted
    FullSupport,
    /// Only generic image manifests and manifest lists are accepted
    CompatibleOnly,
}

/// Resolve, fetch and push against a content-addressed registry.
///
/// Pushing content whose digest is already present must succeed without
/// side effects.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Resolve a tag or digest locator to the descriptor of its manifest.
    async fn resolve(&self, reference: &ImageReference) -> Result<Descriptor, RemoteError>;

    /// Fetch the manifest or blob named by `descriptor` from the reference's repository.
    async fn fetch(
        &self,
        reference: &ImageReference,
        descriptor: &Descriptor,
    ) -> Result<Vec<u8>, RemoteError>;

    /// Push `content` into the reference's repository.
    ///
    /// Manifests are tagged with the reference's tag when it has one. The
    /// returned descriptor carries the digest the registry computed.
    async fn push(
        &self,
        reference: &ImageReference,
        descriptor: &Descriptor,
        content: Vec<u8>,
    ) -> Result<Descriptor, RemoteError>;

    /// Capability hint for a registry host.
    fn hint(&self, _registry: &str) -> RegistryHint {
        RegistryHint::Unknown
    }
}

/// Fetch `descriptor` and check the bytes against its digest.
pub(crate) async fn fetch_verified(
    registry: &dyn Registry,
    reference: &ImageReference,
    descriptor: &Descriptor,
) -> cnab_oci_core::Result<Vec<u8>> {
    let content = registry
        .fetch(reference, descriptor)
        .await
        .map_err(|e| e.into_cnab(reference))?;
    descriptor.verify(&reference.to_string(), &content)?;
    tracing::debug!(
        reference = %reference,
        digest = %descriptor.digest,
        size = content.len(),
        "Fetched content"
    );
    Ok(content)
}

/// Push `content` and check that the registry stored it under the digest
/// computed locally.
pub(crate) async fn push_verified(
    registry: &dyn Registry,
    reference: &ImageReference,
    descriptor: &Descriptor,
    content: Vec<u8>,
) -> cnab_oci_core::Result<()> {
    let pushed = registry
        .push(reference, descriptor, content)
        .await
        .map_err(|e| e.into_cnab(reference))?;
    if pushed.digest != descriptor.digest {
        return Err(CnabError::IntegrityViolation {
            reference: reference.to_string(),
            expected: descriptor.digest.clone(),
            actual: pushed.digest,
        });
    }
    tracing::debug!(
        reference = %reference,
        media_type = %descriptor.media_type,
        digest = %descriptor.digest,
        "Pushed content"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_cnab_media_type() {
        let reference = ImageReference::parse("my.registry/ns/app:v1").unwrap();
        let err = RemoteError::UnsupportedMediaType("application/vnd.cnab.config.v1+json".into())
            .into_cnab(&reference);
        assert!(matches!(
            err,
            CnabError::UnsupportedMediaType { ref media_type, .. }
                if media_type == "application/vnd.cnab.config.v1+json"
        ));
    }

    #[test]
    fn test_into_cnab_not_found_names_reference() {
        let reference = ImageReference::parse("nginx:2.12").unwrap();
        let err = RemoteError::NotFound("manifest unknown".into()).into_cnab(&reference);
        assert!(err.to_string().contains("docker.io/library/nginx:2.12"));
    }

    #[test]
    fn test_into_cnab_transport() {
        let reference = ImageReference::parse("ghcr.io/org/app:v1").unwrap();
        let err = RemoteError::Transport("connection reset".into()).into_cnab(&reference);
        assert_eq!(err.to_string(), "Registry error: ghcr.io - connection reset");
    }
}
