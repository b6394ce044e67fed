//! Relocation of bundle image references to digest-pinned locators.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use cnab_oci_core::config::DEFAULT_CONCURRENCY;
use cnab_oci_core::media_types::ACCEPTED_IMAGE_MEDIA_TYPES;
use cnab_oci_core::{Bundle, CnabError, Descriptor, ImageReference, RelocationMap, Result};

use crate::context::Context;
use crate::group::run_bounded;
use crate::registry::{Registry, RemoteError};

/// One resolved image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    /// Where the image currently lives
    pub source: ImageReference,
    /// Where the bundle will reference it from
    pub pinned: ImageReference,
    /// The manifest the source resolved to
    pub descriptor: Descriptor,
}

/// Outcome of resolving every image in a bundle.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    pub map: RelocationMap,
    /// Keyed by the original locator string
    pub images: BTreeMap<String, ResolvedImage>,
}

/// Resolves every image of a bundle to its digest-pinned equivalent.
pub struct RelocationResolver {
    registry: Arc<dyn Registry>,
    ctx: Context,
    concurrency: usize,
    target: Option<ImageReference>,
}

impl RelocationResolver {
    pub fn new(registry: Arc<dyn Registry>, ctx: Context) -> Self {
        Self {
            registry,
            ctx,
            concurrency: DEFAULT_CONCURRENCY,
            target: None,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Pin images into `target`'s repository instead of their source
    /// repository.
    pub fn with_target(mut self, target: ImageReference) -> Self {
        self.target = Some(target);
        self
    }

    /// Resolve every invocation and component image of `bundle`.
    ///
    /// Each distinct locator is resolved exactly once. Any failure fails
    /// the whole call; no partial map is returned.
    pub async fn resolve(&self, bundle: &Bundle) -> Result<Resolution> {
        let mut seen = BTreeSet::new();
        let mut references = Vec::new();
        for (_, image) in bundle.image_slots() {
            if seen.insert(image.image.as_str()) {
                references.push((image.image.clone(), image.reference()?));
            }
        }

        tracing::info!(
            bundle = %bundle.name,
            images = references.len(),
            "Resolving bundle images"
        );

        let resolved = run_bounded(&self.ctx, self.concurrency, references, |(original, source)| {
            let registry = Arc::clone(&self.registry);
            let target = self.target.clone();
            async move { resolve_one(registry.as_ref(), original, source, target.as_ref()).await }
        })
        .await?;

        let mut resolution = Resolution::default();
        let mut entries = BTreeMap::new();
        for (original, image) in resolved {
            entries.insert(original.clone(), image.pinned.to_string());
            resolution.images.insert(original, image);
        }
        resolution.map = RelocationMap::from(entries);
        Ok(resolution)
    }
}

async fn resolve_one(
    registry: &dyn Registry,
    original: String,
    source: ImageReference,
    target: Option<&ImageReference>,
) -> Result<(String, ResolvedImage)> {
    let descriptor = registry.resolve(&source).await.map_err(|e| match e {
        RemoteError::Transport(_) => e.into_cnab(&source),
        other => CnabError::UnresolvableReference {
            reference: original.clone(),
            message: other.to_string(),
        },
    })?;

    if !ACCEPTED_IMAGE_MEDIA_TYPES.contains(&descriptor.media_type.as_str()) {
        return Err(CnabError::UnresolvableReference {
            reference: original,
            message: format!("unsupported media type {}", descriptor.media_type),
        });
    }
    if let Some(digest) = &source.digest {
        if *digest != descriptor.digest {
            return Err(CnabError::IntegrityViolation {
                reference: original,
                expected: digest.clone(),
                actual: descriptor.digest,
            });
        }
    }

    let pinned = target.unwrap_or(&source).pinned(&descriptor.digest);
    tracing::debug!(
        reference = %original,
        pinned = %pinned,
        media_type = %descriptor.media_type,
        "Resolved image"
    );
    Ok((
        original,
        ResolvedImage {
            source,
            pinned,
            descriptor,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryRegistry;
    use cnab_oci_core::media_types::{CNAB_CONFIG, DOCKER_MANIFEST, OCI_MANIFEST};
    use cnab_oci_core::{Image, ImageType};

    fn bundle_with(invocation: &str, components: &[(&str, &str)]) -> Bundle {
        let mut bundle = Bundle {
            schema_version: "v1.0.0".to_string(),
            name: "app".to_string(),
            version: "0.1.0".to_string(),
            ..Default::default()
        };
        bundle
            .invocation_images
            .push(Image::new(invocation, ImageType::Docker));
        for (name, locator) in components {
            bundle
                .images
                .insert(name.to_string(), Image::new(*locator, ImageType::Oci));
        }
        bundle
    }

    #[tokio::test]
    async fn test_resolve_pins_into_target() {
        let registry = Arc::new(MemoryRegistry::new());
        let invoc = registry
            .seed_image("my.registry/ns/app-invoc:0.1.0", DOCKER_MANIFEST)
            .unwrap();
        let nginx = registry.seed_image("nginx:2.12", OCI_MANIFEST).unwrap();

        let bundle = bundle_with(
            "my.registry/ns/app-invoc:0.1.0",
            &[("web", "nginx:2.12")],
        );
        let target = ImageReference::parse("my.registry/ns/app:0.1.0").unwrap();
        let resolution = RelocationResolver::new(registry, Context::background())
            .with_target(target)
            .resolve(&bundle)
            .await
            .unwrap();

        assert_eq!(
            resolution.map.get("my.registry/ns/app-invoc:0.1.0"),
            Some(format!("my.registry/ns/app@{}", invoc.digest).as_str())
        );
        assert_eq!(
            resolution.map.get("nginx:2.12"),
            Some(format!("my.registry/ns/app@{}", nginx.digest).as_str())
        );
        assert_eq!(resolution.images["nginx:2.12"].descriptor.media_type, OCI_MANIFEST);
    }

    #[tokio::test]
    async fn test_resolve_without_target_pins_in_place() {
        let registry = Arc::new(MemoryRegistry::new());
        let invoc = registry.seed_image("ghcr.io/org/invoc:v1", OCI_MANIFEST).unwrap();
        let bundle = bundle_with("ghcr.io/org/invoc:v1", &[]);
        let resolution = RelocationResolver::new(registry, Context::background())
            .resolve(&bundle)
            .await
            .unwrap();
        assert_eq!(
            resolution.map.get("ghcr.io/org/invoc:v1"),
            Some(format!("ghcr.io/org/invoc@{}", invoc.digest).as_str())
        );
    }

    #[tokio::test]
    async fn test_shared_reference_resolved_once() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.seed_image("redis:7", OCI_MANIFEST).unwrap();
        let bundle = bundle_with("redis:7", &[("a", "redis:7"), ("b", "redis:7")]);
        let resolution = RelocationResolver::new(registry.clone(), Context::background())
            .with_concurrency(1)
            .resolve(&bundle)
            .await
            .unwrap();
        assert_eq!(resolution.map.len(), 1);
        assert_eq!(registry.resolve_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_reference_fails_whole_call() {
        let registry = Arc::new(MemoryRegistry::new());
        registry.seed_image("ghcr.io/org/invoc:v1", OCI_MANIFEST).unwrap();
        let bundle = bundle_with("ghcr.io/org/invoc:v1", &[("db", "postgres:16")]);
        let err = RelocationResolver::new(registry, Context::background())
            .resolve(&bundle)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CnabError::UnresolvableReference { ref reference, .. } if reference == "postgres:16"
        ));
    }

    #[tokio::test]
    async fn test_unaccepted_media_type() {
        let registry = Arc::new(MemoryRegistry::new());
        registry
            .seed_raw_manifest("ghcr.io/org/odd:v1", CNAB_CONFIG, b"{}".to_vec())
            .unwrap();
        let bundle = bundle_with("ghcr.io/org/odd:v1", &[]);
        let err = RelocationResolver::new(registry, Context::background())
            .resolve(&bundle)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported media type"));
    }

    #[tokio::test]
    async fn test_pinned_reference_must_match() {
        let registry = Arc::new(MemoryRegistry::new());
        let seeded = registry.seed_image("ghcr.io/org/invoc:v1", OCI_MANIFEST).unwrap();
        let pinned = format!("ghcr.io/org/invoc@{}", seeded.digest);
        let bundle = bundle_with(&pinned, &[]);
        let resolution = RelocationResolver::new(registry, Context::background())
            .resolve(&bundle)
            .await
            .unwrap();
        assert_eq!(resolution.map.get(&pinned), Some(pinned.as_str()));
    }
}
