//! CNAB bundle descriptor.
//!
//! Only the parts of the bundle schema that matter for packaging are typed
//! precisely (images, parameters, credentials). Definitions and custom
//! extensions are carried as opaque JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CnabError, Result};
use crate::reference::ImageReference;
use crate::relocation::RelocationMap;

/// Application descriptor being packaged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bundle {
    pub schema_version: String,
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub maintainers: Vec<Maintainer>,
    #[serde(default)]
    pub invocation_images: Vec<Image>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub images: BTreeMap<String, Image>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub actions: BTreeMap<String, Action>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub parameters: BTreeMap<String, Parameter>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub credentials: BTreeMap<String, Credential>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub definitions: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Maintainer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Kind of runtime an image targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Docker,
    #[default]
    Oci,
}

/// An invocation image or a component image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    /// Registry locator, by tag or by digest
    pub image: String,
    #[serde(default)]
    pub image_type: ImageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Locator before relocation, kept for audit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_image: Option<String>,
}

impl Image {
    pub fn new(image: impl Into<String>, image_type: ImageType) -> Self {
        Self {
            image: image.into(),
            image_type,
            ..Default::default()
        }
    }

    pub fn reference(&self) -> Result<ImageReference> {
        ImageReference::parse(&self.image)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default)]
    pub modifies: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub stateless: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    /// Key into [`Bundle::definitions`]
    pub definition: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<Destination>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apply_to: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
}

/// Position of an image within a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSlot {
    Invocation(usize),
    Component(String),
}

impl std::fmt::Display for ImageSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invocation(i) => write!(f, "invocation image #{}", i),
            Self::Component(name) => write!(f, "component '{}'", name),
        }
    }
}

impl Bundle {
    /// Parse a bundle from JSON.
    pub fn from_slice(content: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(content)?)
    }

    /// Sorted-key, whitespace-free JSON.
    pub fn to_canonical_json(&self) -> Result<Vec<u8>> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_vec(&value)?)
    }

    /// Every image slot: invocation images in declaration order, then
    /// components in name order.
    pub fn image_slots(&self) -> Vec<(ImageSlot, &Image)> {
        let invocation = self
            .invocation_images
            .iter()
            .enumerate()
            .map(|(i, image)| (ImageSlot::Invocation(i), image));
        let components = self
            .images
            .iter()
            .map(|(name, image)| (ImageSlot::Component(name.clone()), image));
        invocation.chain(components).collect()
    }

    /// Mutable access to every image, in slot order.
    pub fn images_mut(&mut self) -> impl Iterator<Item = &mut Image> {
        self.invocation_images
            .iter_mut()
            .chain(self.images.values_mut())
    }

    /// Check the bundle's own invariants.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CnabError::InvalidBundle("bundle name is empty".to_string()));
        }
        if self.version.trim().is_empty() {
            return Err(CnabError::InvalidBundle(format!(
                "bundle '{}' has no version",
                self.name
            )));
        }
        if self.schema_version.trim().is_empty() {
            return Err(CnabError::InvalidBundle(format!(
                "bundle '{}' has no schema version",
                self.name
            )));
        }

        for (name, parameter) in &self.parameters {
            if !self.definitions.contains_key(&parameter.definition) {
                return Err(CnabError::InvalidBundle(format!(
                    "parameter '{}' refers to unknown definition '{}'",
                    name, parameter.definition
                )));
            }
        }

        for (slot, image) in self.image_slots() {
            if let ImageSlot::Component(name) = &slot {
                if name.trim().is_empty() {
                    return Err(CnabError::InvalidBundle(
                        "component image with empty name".to_string(),
                    ));
                }
            }
            image.reference()?;
        }

        Ok(())
    }

    /// The bundle with every image locator replaced by its digest-pinned
    /// form. The pre-relocation locator is recorded in `original_image`
    /// unless one was already recorded.
    pub fn relocated(&self, relocation: &RelocationMap) -> Self {
        let mut bundle = self.clone();
        for image in bundle.images_mut() {
            if let Some(pinned) = relocation.get(&image.image) {
                if pinned != image.image {
                    if image.original_image.is_none() {
                        image.original_image = Some(image.image.clone());
                    }
                    image.image = pinned.to_string();
                }
            }
        }
        bundle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Bundle {
        let mut bundle = Bundle {
            schema_version: "v1.0.0-WD".to_string(),
            name: "my-app".to_string(),
            version: "0.1.0".to_string(),
            ..Default::default()
        };
        bundle
            .invocation_images
            .push(Image::new("my.registry/namespace/my-app:invoc", ImageType::Docker));
        bundle
            .images
            .insert("image-1".to_string(), Image::new("nginx:2.12", ImageType::Oci));
        bundle
            .definitions
            .insert("param1Type".to_string(), serde_json::json!({"type": "string"}));
        bundle.parameters.insert(
            "param1".to_string(),
            Parameter {
                definition: "param1Type".to_string(),
                ..Default::default()
            },
        );
        bundle
    }

    #[test]
    fn test_validate_ok() {
        assert!(sample().validate().is_ok());
    }

    #[test]
    fn test_validate_unknown_definition() {
        let mut bundle = sample();
        bundle.parameters.get_mut("param1").unwrap().definition = "missing".to_string();
        let err = bundle.validate().unwrap_err();
        assert!(matches!(err, CnabError::InvalidBundle(_)));
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_validate_bad_image() {
        let mut bundle = sample();
        bundle.images.get_mut("image-1").unwrap().image = "nginx@nope".to_string();
        assert!(matches!(
            bundle.validate().unwrap_err(),
            CnabError::InvalidReference { .. }
        ));
    }

    #[test]
    fn test_validate_empty_name() {
        let mut bundle = sample();
        bundle.name = " ".to_string();
        assert!(bundle.validate().is_err());
    }

    #[test]
    fn test_image_slots_order() {
        let mut bundle = sample();
        bundle
            .images
            .insert("a-first".to_string(), Image::new("redis:7", ImageType::Oci));
        let slots: Vec<ImageSlot> = bundle.image_slots().into_iter().map(|(s, _)| s).collect();
        assert_eq!(
            slots,
            vec![
                ImageSlot::Invocation(0),
                ImageSlot::Component("a-first".to_string()),
                ImageSlot::Component("image-1".to_string()),
            ]
        );
    }

    #[test]
    fn test_canonical_json_sorted_and_compact() {
        let json = String::from_utf8(sample().to_canonical_json().unwrap()).unwrap();
        assert!(!json.contains(' '));
        let definitions = json.find("\"definitions\"").unwrap();
        let name = json.find("\"name\"").unwrap();
        let version = json.find("\"version\"").unwrap();
        assert!(definitions < name && name < version);
    }

    #[test]
    fn test_canonical_json_round_trip() {
        let bundle = sample();
        let parsed = Bundle::from_slice(&bundle.to_canonical_json().unwrap()).unwrap();
        assert_eq!(parsed, bundle);
    }

    #[test]
    fn test_relocated_records_original() {
        let bundle = sample();
        let map: RelocationMap = [(
            "nginx:2.12".to_string(),
            "my.registry/namespace/my-app@sha256:abc".to_string(),
        )]
        .into_iter()
        .collect();
        let relocated = bundle.relocated(&map);
        let image = &relocated.images["image-1"];
        assert_eq!(image.image, "my.registry/namespace/my-app@sha256:abc");
        assert_eq!(image.original_image.as_deref(), Some("nginx:2.12"));
        // Unmapped images are left alone
        assert_eq!(relocated.invocation_images, bundle.invocation_images);
    }
}
