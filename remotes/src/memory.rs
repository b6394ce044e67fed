//! In-memory registry.
//!
//! Content-addressed manifests and blobs per repository, plus tags. Used as
//! the test double for push and pull, and configurable to misbehave the
//! ways real registries do: rejecting media types, reporting the wrong
//! digest, or answering slowly.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use cnab_oci_core::media_types;
use cnab_oci_core::{digest_of, Descriptor, ImageReference, Manifest, Result};
use parking_lot::Mutex;

use crate::registry::{Registry, RegistryHint, RemoteError};

#[derive(Debug, Default)]
struct Repository {
    /// digest → (media type, content)
    manifests: HashMap<String, (String, Vec<u8>)>,
    blobs: HashMap<String, Vec<u8>>,
    tags: HashMap<String, String>,
}

/// One accepted push, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushRecord {
    /// `registry/repository`
    pub repository: String,
    pub tag: Option<String>,
    pub media_type: String,
    pub digest: String,
}

/// Registry held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    repositories: Mutex<HashMap<String, Repository>>,
    rejected: Mutex<HashSet<String>>,
    corrupted: Mutex<HashSet<String>>,
    hints: Mutex<HashMap<String, RegistryHint>>,
    pushes: Mutex<Vec<PushRecord>>,
    resolves: Mutex<usize>,
    latency: Option<Duration>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every request by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Refuse content of `media_type`, and manifests whose config has it.
    pub fn reject_media_type(&self, media_type: &str) {
        self.rejected.lock().insert(media_type.to_string());
    }

    /// Store content of `media_type` but report a wrong digest for it.
    pub fn corrupt_media_type(&self, media_type: &str) {
        self.corrupted.lock().insert(media_type.to_string());
    }

    pub fn set_hint(&self, registry: &str, hint: RegistryHint) {
        self.hints.lock().insert(registry.to_string(), hint);
    }

    /// Every accepted push so far.
    pub fn pushes(&self) -> Vec<PushRecord> {
        self.pushes.lock().clone()
    }

    /// Number of resolve requests served.
    pub fn resolve_count(&self) -> usize {
        *self.resolves.lock()
    }

    /// Whether a manifest or blob with `digest` is stored in `reference`'s repository.
    pub fn contains(&self, reference: &ImageReference, digest: &str) -> bool {
        self.repositories
            .lock()
            .get(&repository_key(reference))
            .is_some_and(|repo| repo.manifests.contains_key(digest) || repo.blobs.contains_key(digest))
    }

    /// Store a small single-layer image manifest under `reference` and
    /// return its descriptor.
    pub fn seed_image(&self, reference: &str, media_type: &str) -> Result<Descriptor> {
        let reference = ImageReference::parse(reference)?;
        let config = format!(r#"{{"architecture":"amd64","os":"linux","image":"{}"}}"#, reference);
        let layer = format!("layer of {}", reference).into_bytes();

        let config_media_type = match media_type {
            media_types::DOCKER_MANIFEST => media_types::DOCKER_IMAGE_CONFIG,
            _ => "application/vnd.oci.image.config.v1+json",
        };
        let manifest = Manifest {
            schema_version: 2,
            media_type: Some(media_type.to_string()),
            config: Descriptor::for_content(config_media_type, config.as_bytes()),
            layers: vec![Descriptor::for_content(
                "application/vnd.oci.image.layer.v1.tar+gzip",
                &layer,
            )],
            annotations: Default::default(),
        };
        let content = serde_json::to_vec(&manifest)?;

        let mut repositories = self.repositories.lock();
        let repo = repositories.entry(repository_key(&reference)).or_default();
        repo.blobs.insert(manifest.config.digest.clone(), config.into_bytes());
        repo.blobs.insert(manifest.layers[0].digest.clone(), layer);
        Ok(store_manifest(repo, &reference, media_type, content))
    }

    /// Store arbitrary bytes as a manifest under `reference`.
    pub fn seed_raw_manifest(
        &self,
        reference: &str,
        media_type: &str,
        content: Vec<u8>,
    ) -> Result<Descriptor> {
        let reference = ImageReference::parse(reference)?;
        let mut repositories = self.repositories.lock();
        let repo = repositories.entry(repository_key(&reference)).or_default();
        Ok(store_manifest(repo, &reference, media_type, content))
    }

    /// Store a blob in `reference`'s repository.
    pub fn seed_blob(&self, reference: &str, content: Vec<u8>) -> Result<String> {
        let reference = ImageReference::parse(reference)?;
        let digest = digest_of(&content);
        self.repositories
            .lock()
            .entry(repository_key(&reference))
            .or_default()
            .blobs
            .insert(digest.clone(), content);
        Ok(digest)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_media_type(&self, descriptor: &Descriptor, content: &[u8]) -> std::result::Result<(), RemoteError> {
        let rejected = self.rejected.lock();
        if rejected.contains(&descriptor.media_type) {
            return Err(RemoteError::UnsupportedMediaType(descriptor.media_type.clone()));
        }
        if media_types::is_manifest(&descriptor.media_type) && !media_types::is_index(&descriptor.media_type) {
            if let Ok(manifest) = Manifest::from_slice(content) {
                if rejected.contains(&manifest.config.media_type) {
                    return Err(RemoteError::UnsupportedMediaType(manifest.config.media_type));
                }
            }
        }
        Ok(())
    }
}

fn repository_key(reference: &ImageReference) -> String {
    format!("{}/{}", reference.registry, reference.repository)
}

fn store_manifest(
    repo: &mut Repository,
    reference: &ImageReference,
    media_type: &str,
    content: Vec<u8>,
) -> Descriptor {
    let descriptor = Descriptor::for_content(media_type, &content);
    if let Some(tag) = &reference.tag {
        repo.tags.insert(tag.clone(), descriptor.digest.clone());
    }
    repo.manifests
        .insert(descriptor.digest.clone(), (media_type.to_string(), content));
    descriptor
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn resolve(&self, reference: &ImageReference) -> std::result::Result<Descriptor, RemoteError> {
        self.delay().await;
        *self.resolves.lock() += 1;

        let repositories = self.repositories.lock();
        let repo = repositories
            .get(&repository_key(reference))
            .ok_or_else(|| RemoteError::NotFound(format!("repository {}", repository_key(reference))))?;
        let digest = match (&reference.digest, &reference.tag) {
            (Some(digest), _) => digest.clone(),
            (None, Some(tag)) => repo
                .tags
                .get(tag)
                .cloned()
                .ok_or_else(|| RemoteError::NotFound(format!("tag {}", tag)))?,
            (None, None) => return Err(RemoteError::NotFound(reference.to_string())),
        };
        let (media_type, content) = repo
            .manifests
            .get(&digest)
            .ok_or_else(|| RemoteError::NotFound(format!("manifest {}", digest)))?;
        Ok(Descriptor {
            media_type: media_type.clone(),
            digest,
            size: content.len() as u64,
            annotations: Default::default(),
        })
    }

    async fn fetch(
        &self,
        reference: &ImageReference,
        descriptor: &Descriptor,
    ) -> std::result::Result<Vec<u8>, RemoteError> {
        self.delay().await;

        let repositories = self.repositories.lock();
        let repo = repositories
            .get(&repository_key(reference))
            .ok_or_else(|| RemoteError::NotFound(format!("repository {}", repository_key(reference))))?;
        repo.manifests
            .get(&descriptor.digest)
            .map(|(_, content)| content.clone())
            .or_else(|| repo.blobs.get(&descriptor.digest).cloned())
            .ok_or_else(|| RemoteError::NotFound(format!("content {}", descriptor.digest)))
    }

    async fn push(
        &self,
        reference: &ImageReference,
        descriptor: &Descriptor,
        content: Vec<u8>,
    ) -> std::result::Result<Descriptor, RemoteError> {
        self.delay().await;
        self.check_media_type(descriptor, &content)?;

        let mut stored = if media_types::is_manifest(&descriptor.media_type) {
            let mut repositories = self.repositories.lock();
            let repo = repositories.entry(repository_key(reference)).or_default();
            store_manifest(repo, reference, &descriptor.media_type, content)
        } else {
            let stored = Descriptor::for_content(&descriptor.media_type, &content);
            self.repositories
                .lock()
                .entry(repository_key(reference))
                .or_default()
                .blobs
                .insert(stored.digest.clone(), content);
            stored
        };

        if self.corrupted.lock().contains(&descriptor.media_type) {
            stored.digest = digest_of(stored.digest.as_bytes());
        }

        self.pushes.lock().push(PushRecord {
            repository: repository_key(reference),
            tag: reference.tag.clone(),
            media_type: descriptor.media_type.clone(),
            digest: stored.digest.clone(),
        });
        Ok(stored)
    }

    fn hint(&self, registry: &str) -> RegistryHint {
        self.hints.lock().get(registry).copied().unwrap_or_default()
    }
}
