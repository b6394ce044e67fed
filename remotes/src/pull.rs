//! Bundle pull orchestration.

use std::sync::Arc;

use cnab_oci_core::media_types;
use cnab_oci_core::{Bundle, CnabError, ImageReference, Index, Manifest, RelocationMap, Result};

use crate::codec;
use crate::context::Context;
use crate::registry::{fetch_verified, Registry};

/// Pulls bundles from a registry.
pub struct Puller {
    registry: Arc<dyn Registry>,
    ctx: Context,
}

impl Puller {
    pub fn new(registry: Arc<dyn Registry>) -> Self {
        Self {
            registry,
            ctx: Context::background(),
        }
    }

    pub fn with_context(mut self, ctx: Context) -> Self {
        self.ctx = ctx;
        self
    }

    /// Fetch the bundle indexed at `source`.
    ///
    /// The returned bundle references its images by their digest-pinned
    /// locators, with the pre-relocation locator kept in `originalImage`.
    pub async fn pull(&self, source: &ImageReference) -> Result<(Bundle, RelocationMap)> {
        self.ctx.run(self.pull_inner(source)).await
    }

    async fn pull_inner(&self, source: &ImageReference) -> Result<(Bundle, RelocationMap)> {
        let registry = self.registry.as_ref();
        tracing::info!(reference = %source, "Pulling bundle");

        let descriptor = registry
            .resolve(source)
            .await
            .map_err(|e| e.into_cnab(source))?;
        if !media_types::is_index(&descriptor.media_type) {
            return Err(CnabError::MalformedArtifact(format!(
                "{} is a {}, not an image index",
                source, descriptor.media_type
            )));
        }

        let index = Index::from_slice(&fetch_verified(registry, source, &descriptor).await?)?;
        let config_manifest = codec::config_descriptor(&index)?.without_annotations();
        let manifest = Manifest::from_slice(&fetch_verified(registry, source, &config_manifest).await?)?;
        let config = fetch_verified(registry, source, &manifest.config).await?;

        let (bundle, map) = codec::decode(&index, &config)?;
        tracing::info!(
            reference = %source,
            digest = %descriptor.digest,
            bundle = %bundle.name,
            images = map.len(),
            "Bundle pulled"
        );
        Ok((bundle.relocated(&map), map))
    }
}
