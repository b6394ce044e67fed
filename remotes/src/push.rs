//! Bundle push orchestration.

use std::collections::BTreeMap;
use std::sync::Arc;

use cnab_oci_core::media_types;
use cnab_oci_core::{
    Bundle, CnabError, Descriptor, ImageReference, Index, Manifest, RelocationMap, RemotesConfig,
    Result, Scheme,
};

use crate::codec;
use crate::context::Context;
use crate::fallback::FallbackNegotiator;
use crate::group::run_bounded;
use crate::registry::{fetch_verified, push_verified, Registry};
use crate::resolver::{RelocationResolver, Resolution, ResolvedImage};

/// Outcome of a successful push.
#[derive(Debug, Clone)]
pub struct PushResult {
    /// The pushed index
    pub descriptor: Descriptor,
    pub relocation_map: RelocationMap,
    /// Scheme the registry accepted
    pub scheme: Scheme,
}

/// Pushes bundles to a registry.
pub struct Pusher {
    registry: Arc<dyn Registry>,
    ctx: Context,
    config: RemotesConfig,
}

impl Pusher {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            ctx: Context::background(),
            config: RemotesConfig::default(),
        }
    }

    pub fn with_context(mut self, ctx: Context) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn with_config(mut self, config: RemotesConfig) -> Self {
        self.config = config;
        self
    }

    /// Push `bundle` and tag its index as `target`.
    ///
    /// Images are resolved and copied into the target repository, then the
    /// config, its manifest and the index are pushed under the selected
    /// scheme. A media-type rejection is retried once under the compatible
    /// scheme when fallback is allowed.
    pub async fn push(&self, bundle: &Bundle, target: &ImageReference) -> Result<PushResult> {
        bundle.validate()?;
        if target.is_pinned() {
            return Err(CnabError::InvalidReference {
                reference: target.to_string(),
                message: "push target must be a tag, not a digest".to_string(),
            });
        }

        tracing::info!(
            bundle = %bundle.name,
            target = %target,
            "Pushing bundle"
        );

        let resolution = RelocationResolver::new(Arc::clone(&self.registry), self.ctx.clone())
            .with_concurrency(self.config.concurrency)
            .with_target(target.clone())
            .resolve(bundle)
            .await?;
        let bundle = fixup(bundle, &resolution);

        let negotiator = FallbackNegotiator::new(self.config.allow_fallback);
        let mut scheme = negotiator.select_scheme(self.registry.hint(&target.registry));

        loop {
            match self.push_with_scheme(&bundle, &resolution, target, scheme).await {
                Ok(descriptor) => {
                    tracing::info!(
                        target = %target,
                        digest = %descriptor.digest,
                        scheme = ?scheme,
                        "Bundle pushed"
                    );
                    return Ok(PushResult {
                        descriptor,
                        relocation_map: resolution.map,
                        scheme,
                    });
                }
                Err(CnabError::UnsupportedMediaType {
                    reference,
                    media_type,
                }) => match negotiator.after_rejection(scheme) {
                    Some(next) => {
                        tracing::warn!(
                            target = %target,
                            media_type = %media_type,
                            from = ?scheme,
                            to = ?next,
                            "Registry rejected media type, retrying with fallback scheme"
                        );
                        scheme = next;
                    }
                    None => {
                        return Err(CnabError::UnsupportedMediaType {
                            reference,
                            media_type,
                        })
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn push_with_scheme(
        &self,
        bundle: &Bundle,
        resolution: &Resolution,
        target: &ImageReference,
        scheme: Scheme,
    ) -> Result<Descriptor> {
        let encoded = codec::encode(bundle, &resolution.map, scheme)?;
        let registry = self.registry.as_ref();

        tracing::debug!(
            target = %target,
            scheme = ?scheme,
            config = %encoded.config_descriptor.digest,
            "Pushing bundle config"
        );
        self.ctx
            .run(push_verified(
                registry,
                &target.repository_reference(),
                &encoded.config_descriptor,
                encoded.config.clone(),
            ))
            .await?;
        self.ctx
            .run(push_verified(
                registry,
                &target.pinned(&encoded.config_manifest_descriptor.digest),
                &encoded.config_manifest_descriptor.without_annotations(),
                encoded.config_manifest.clone(),
            ))
            .await?;

        self.copy_images(resolution, target).await?;

        self.ctx
            .run(push_verified(
                registry,
                target,
                &encoded.index_descriptor,
                encoded.index_bytes.clone(),
            ))
            .await?;
        Ok(encoded.index_descriptor)
    }

    /// Copy every image that lives outside the target repository into it.
    async fn copy_images(&self, resolution: &Resolution, target: &ImageReference) -> Result<()> {
        let mut copies = BTreeMap::new();
        for image in resolution.images.values() {
            if !image.source.same_repository(target) {
                copies
                    .entry(image.pinned.to_string())
                    .or_insert_with(|| image.clone());
            }
        }
        if copies.is_empty() {
            return Ok(());
        }

        tracing::debug!(target = %target, images = copies.len(), "Copying images");
        let copies: Vec<ResolvedImage> = copies.into_values().collect();
        run_bounded(&self.ctx, self.config.concurrency, copies, |image| {
            let registry = Arc::clone(&self.registry);
            async move { copy_image(registry.as_ref(), &image).await }
        })
        .await?;
        Ok(())
    }
}

/// The bundle with every image's media type and size taken from the
/// registry.
fn fixup(bundle: &Bundle, resolution: &Resolution) -> Bundle {
    let mut bundle = bundle.clone();
    for image in bundle.images_mut() {
        if let Some(resolved) = resolution.images.get(&image.image) {
            image.media_type = Some(resolved.descriptor.media_type.clone());
            image.size = Some(resolved.descriptor.size);
        }
    }
    bundle
}

/// Copy one image, its child manifests and their blobs. Manifests are
/// pushed after everything they reference.
async fn copy_image(registry: &dyn Registry, image: &ResolvedImage) -> Result<()> {
    let source = &image.source;
    let repository = image.pinned.repository_reference();

    let mut manifests = Vec::new();
    let mut pending = vec![image.descriptor.without_annotations()];
    while let Some(descriptor) = pending.pop() {
        let content = fetch_verified(registry, source, &descriptor).await?;
        if media_types::is_index(&descriptor.media_type) {
            let index = Index::from_slice(&content)?;
            pending.extend(index.manifests.iter().map(Descriptor::without_annotations));
        } else {
            let manifest = Manifest::from_slice(&content)?;
            for blob in manifest.blobs() {
                let data = fetch_verified(registry, source, blob).await?;
                push_verified(registry, &repository, blob, data).await?;
            }
        }
        manifests.push((descriptor, content));
    }

    for (descriptor, content) in manifests.into_iter().rev() {
        push_verified(
            registry,
            &repository.pinned(&descriptor.digest),
            &descriptor,
            content,
        )
        .await?;
    }
    tracing::debug!(source = %source, pinned = %image.pinned, "Copied image");
    Ok(())
}
