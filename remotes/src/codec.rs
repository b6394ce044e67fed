//! Bundle ⇄ index conversion.
//!
//! [`encode`] turns a bundle and its relocation map into a config blob, the
//! image manifest wrapping it, and the index listing that manifest plus one
//! entry per invocation and component image. [`decode`] is its left inverse.
//! Neither performs I/O.

use std::collections::{BTreeMap, BTreeSet};

use cnab_oci_core::media_types::{annotations, SchemeMediaTypes};
use cnab_oci_core::{
    Bundle, CnabError, Descriptor, Image, ImageReference, ImageSlot, Index, ManifestType,
    Manifest, RelocationMap, Result, Scheme,
};

/// Everything one push writes, computed up front.
#[derive(Debug, Clone)]
pub struct EncodedBundle {
    pub scheme: Scheme,
    /// Canonical bundle JSON with digest-pinned image locators
    pub config: Vec<u8>,
    pub config_descriptor: Descriptor,
    pub config_manifest: Vec<u8>,
    /// As listed in the index, annotations included
    pub config_manifest_descriptor: Descriptor,
    pub index: Index,
    pub index_bytes: Vec<u8>,
    pub index_descriptor: Descriptor,
}

/// Encode `bundle` under `scheme`, replacing each image locator with its
/// entry in `relocation`.
///
/// Every image must end up digest-pinned and must carry a media type and
/// size; the pusher fills those in from the registry before encoding.
pub fn encode(bundle: &Bundle, relocation: &RelocationMap, scheme: Scheme) -> Result<EncodedBundle> {
    bundle.validate()?;
    let media = scheme.media_types();

    let mut image_descriptors = Vec::new();
    for (slot, image) in bundle.image_slots() {
        image_descriptors.push(image_descriptor(&slot, image, relocation)?);
    }

    let mut config_bundle = bundle.clone();
    for image in config_bundle.images_mut() {
        if let Some(pinned) = relocation.get(&image.image) {
            image.image = pinned.to_string();
        }
    }
    let config = config_bundle.to_canonical_json()?;
    let config_descriptor = Descriptor::for_content(media.config, &config);

    let manifest = Manifest {
        schema_version: 2,
        media_type: Some(media.config_manifest.to_string()),
        config: config_descriptor.clone(),
        layers: Vec::new(),
        annotations: BTreeMap::new(),
    };
    let config_manifest = serde_json::to_vec(&manifest)?;
    let config_manifest_descriptor =
        Descriptor::for_content(media.config_manifest, &config_manifest)
            .with_annotation(annotations::MANIFEST_TYPE, ManifestType::Config.as_str());

    let mut manifests = Vec::with_capacity(image_descriptors.len() + 1);
    manifests.push(config_manifest_descriptor.clone());
    manifests.extend(image_descriptors);

    let index = Index {
        schema_version: 2,
        media_type: Some(media.index.to_string()),
        manifests,
        annotations: index_annotations(bundle, media)?,
    };
    let index_bytes = serde_json::to_vec(&index)?;
    let index_descriptor = Descriptor::for_content(media.index, &index_bytes);

    Ok(EncodedBundle {
        scheme,
        config,
        config_descriptor,
        config_manifest,
        config_manifest_descriptor,
        index,
        index_bytes,
        index_descriptor,
    })
}

/// Rebuild the bundle and relocation map from an index and its config blob.
///
/// Images come back with their pre-relocation locators; the map carries
/// the digest-pinned ones.
pub fn decode(index: &Index, config: &[u8]) -> Result<(Bundle, RelocationMap)> {
    config_descriptor(index)?;

    let mut bundle: Bundle = serde_json::from_slice(config)
        .map_err(|e| CnabError::MalformedArtifact(format!("invalid bundle config: {}", e)))?;

    let mut entries = BTreeMap::new();
    let mut invocation_count = 0;
    let mut components = BTreeSet::new();

    for descriptor in &index.manifests {
        let image = match manifest_type(descriptor)? {
            Some(ManifestType::Invocation) => {
                let image = bundle
                    .invocation_images
                    .get_mut(invocation_count)
                    .ok_or_else(|| {
                        CnabError::MalformedArtifact(
                            "index lists more invocation images than the bundle declares"
                                .to_string(),
                        )
                    })?;
                invocation_count += 1;
                image
            }
            Some(ManifestType::Component) => {
                let name = descriptor
                    .annotation(annotations::COMPONENT_NAME)
                    .ok_or_else(|| {
                        CnabError::MalformedArtifact(format!(
                            "component manifest {} has no {} annotation",
                            descriptor.digest,
                            annotations::COMPONENT_NAME
                        ))
                    })?;
                if !components.insert(name.to_string()) {
                    return Err(CnabError::MalformedArtifact(format!(
                        "component '{}' is listed twice",
                        name
                    )));
                }
                bundle.images.get_mut(name).ok_or_else(|| {
                    CnabError::MalformedArtifact(format!(
                        "component '{}' is not declared by the bundle",
                        name
                    ))
                })?
            }
            Some(ManifestType::Config) | None => continue,
        };
        restore_image(image, descriptor, &mut entries)?;
    }

    if invocation_count != bundle.invocation_images.len() {
        return Err(CnabError::MalformedArtifact(format!(
            "bundle declares {} invocation images, index lists {}",
            bundle.invocation_images.len(),
            invocation_count
        )));
    }
    if components.len() != bundle.images.len() {
        return Err(CnabError::MalformedArtifact(format!(
            "bundle declares {} components, index lists {}",
            bundle.images.len(),
            components.len()
        )));
    }

    Ok((bundle, RelocationMap::from(entries)))
}

/// The unique manifest annotated as the bundle config.
pub fn config_descriptor(index: &Index) -> Result<&Descriptor> {
    let mut configs = index
        .manifests
        .iter()
        .filter(|d| d.annotation(annotations::MANIFEST_TYPE) == Some(ManifestType::Config.as_str()));
    match (configs.next(), configs.next()) {
        (Some(descriptor), None) => Ok(descriptor),
        (None, _) => Err(CnabError::MalformedArtifact(
            "index has no config manifest".to_string(),
        )),
        (Some(_), Some(_)) => Err(CnabError::MalformedArtifact(
            "index has more than one config manifest".to_string(),
        )),
    }
}

fn image_descriptor(slot: &ImageSlot, image: &Image, relocation: &RelocationMap) -> Result<Descriptor> {
    let pinned = relocation.get(&image.image).unwrap_or(&image.image);
    let reference = ImageReference::parse(pinned)?;
    let digest = reference.digest.ok_or_else(|| CnabError::UnresolvableReference {
        reference: image.image.clone(),
        message: format!("{} has no digest-pinned relocation", slot),
    })?;

    let media_type = image.media_type.clone().ok_or_else(|| {
        CnabError::MalformedArtifact(format!("{} ({}) has no media type", slot, image.image))
    })?;
    let size = image.size.ok_or_else(|| {
        CnabError::MalformedArtifact(format!("{} ({}) has no size", slot, image.image))
    })?;

    let mut descriptor = Descriptor {
        media_type,
        digest,
        size,
        annotations: BTreeMap::new(),
    };
    descriptor = match slot {
        ImageSlot::Invocation(_) => descriptor
            .with_annotation(annotations::MANIFEST_TYPE, ManifestType::Invocation.as_str()),
        ImageSlot::Component(name) => descriptor
            .with_annotation(annotations::MANIFEST_TYPE, ManifestType::Component.as_str())
            .with_annotation(annotations::COMPONENT_NAME, name.as_str()),
    };
    if pinned != image.image {
        descriptor = descriptor.with_annotation(annotations::ORIGINAL_NAME, image.image.as_str());
    }
    Ok(descriptor)
}

fn index_annotations(bundle: &Bundle, media: &SchemeMediaTypes) -> Result<BTreeMap<String, String>> {
    let mut map = BTreeMap::new();
    map.insert(annotations::TITLE.to_string(), bundle.name.clone());
    map.insert(annotations::VERSION.to_string(), bundle.version.clone());
    map.insert(
        annotations::RUNTIME_VERSION.to_string(),
        bundle.schema_version.clone(),
    );
    if let Some(description) = &bundle.description {
        map.insert(annotations::DESCRIPTION.to_string(), description.clone());
    }
    if !bundle.keywords.is_empty() {
        map.insert(
            annotations::KEYWORDS.to_string(),
            serde_json::to_string(&bundle.keywords)?,
        );
    }
    if !bundle.maintainers.is_empty() {
        map.insert(
            annotations::AUTHORS.to_string(),
            serde_json::to_string(&bundle.maintainers)?,
        );
    }
    for (key, value) in annotations::PROVENANCE {
        map.insert(key.to_string(), value.to_string());
    }
    if let Some(artifact_type) = media.artifact_type {
        map.insert(annotations::ARTIFACT_TYPE.to_string(), artifact_type.to_string());
    }
    Ok(map)
}

fn manifest_type(descriptor: &Descriptor) -> Result<Option<ManifestType>> {
    let value = descriptor
        .annotation(annotations::MANIFEST_TYPE)
        .ok_or_else(|| {
            CnabError::MalformedArtifact(format!(
                "manifest {} has no {} annotation",
                descriptor.digest,
                annotations::MANIFEST_TYPE
            ))
        })?;
    match value.parse() {
        Ok(kind) => Ok(Some(kind)),
        Err(reason) => {
            tracing::debug!(digest = %descriptor.digest, %reason, "Skipping manifest");
            Ok(None)
        }
    }
}

fn restore_image(
    image: &mut Image,
    descriptor: &Descriptor,
    entries: &mut BTreeMap<String, String>,
) -> Result<()> {
    let pinned = std::mem::take(&mut image.image);
    let reference = ImageReference::parse(&pinned)?;
    if reference.digest.as_deref() != Some(descriptor.digest.as_str()) {
        return Err(CnabError::MalformedArtifact(format!(
            "image '{}' does not match manifest digest {}",
            pinned, descriptor.digest
        )));
    }

    let original = descriptor
        .annotation(annotations::ORIGINAL_NAME)
        .map(str::to_string)
        .unwrap_or_else(|| pinned.clone());
    image.image = original.clone();
    entries.insert(original, pinned);
    Ok(())
}
