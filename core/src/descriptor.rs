//! OCI content descriptors and the documents built from them.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{CnabError, Result};

/// Compute the `sha256:<hex>` digest of `content`.
pub fn digest_of(content: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(content)))
}

/// Media type, digest and size identifying one piece of registry content.
///
/// Once pushed, none of these fields may change without changing the
/// content's identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType")]
    pub media_type: String,
    pub digest: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Descriptor {
    /// Describe `content` under `media_type`.
    pub fn for_content(media_type: &str, content: &[u8]) -> Self {
        Self {
            media_type: media_type.to_string(),
            digest: digest_of(content),
            size: content.len() as u64,
            annotations: BTreeMap::new(),
        }
    }

    pub fn with_annotation(mut self, key: &str, value: impl Into<String>) -> Self {
        self.annotations.insert(key.to_string(), value.into());
        self
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// The same descriptor with annotations removed.
    pub fn without_annotations(&self) -> Self {
        Self {
            annotations: BTreeMap::new(),
            ..self.clone()
        }
    }

    /// Check that `content` is what this descriptor names.
    pub fn verify(&self, reference: &str, content: &[u8]) -> Result<()> {
        let actual = digest_of(content);
        if actual != self.digest {
            return Err(CnabError::IntegrityViolation {
                reference: reference.to_string(),
                expected: self.digest.clone(),
                actual,
            });
        }
        Ok(())
    }
}

/// Image index (or manifest list) listing the manifests of one bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub manifests: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Index {
    pub fn from_slice(content: &[u8]) -> Result<Self> {
        serde_json::from_slice(content)
            .map_err(|e| CnabError::MalformedArtifact(format!("invalid index: {}", e)))
    }
}

/// Image manifest: one config blob and its layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "schemaVersion")]
    pub schema_version: u32,
    #[serde(rename = "mediaType", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl Manifest {
    pub fn from_slice(content: &[u8]) -> Result<Self> {
        serde_json::from_slice(content)
            .map_err(|e| CnabError::MalformedArtifact(format!("invalid manifest: {}", e)))
    }

    /// Every blob this manifest references, config first.
    pub fn blobs(&self) -> impl Iterator<Item = &Descriptor> {
        std::iter::once(&self.config).chain(self.layers.iter())
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<Descriptor>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<Descriptor>>::deserialize(deserializer)?.unwrap_or_default())
}
