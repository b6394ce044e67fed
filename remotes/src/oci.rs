//! OCI distribution client.
//!
//! Implements [`Registry`] on top of the `oci-distribution` crate. Only
//! forwards credentials; token negotiation is the client's business.

use std::collections::HashSet;

use async_trait::async_trait;
use cnab_oci_core::media_types::{self, ACCEPTED_IMAGE_MEDIA_TYPES, OCI_INDEX, OCI_MANIFEST};
use cnab_oci_core::{digest_of, Descriptor, ImageReference};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::{OciDistributionError, OciErrorCode};
use oci_distribution::manifest::OciDescriptor;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::registry::{Registry, RemoteError};

/// Authentication credentials for a container registry.
#[derive(Debug, Clone)]
pub struct RegistryAuth {
    username: Option<String>,
    password: Option<String>,
}

impl RegistryAuth {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    /// Create authentication from environment variables.
    ///
    /// Reads `REGISTRY_USERNAME` and `REGISTRY_PASSWORD`.
    /// Falls back to anonymous if not set.
    pub fn from_env() -> Self {
        let username = std::env::var("REGISTRY_USERNAME").ok();
        let password = std::env::var("REGISTRY_PASSWORD").ok();

        if username.is_some() && password.is_some() {
            Self { username, password }
        } else {
            Self::anonymous()
        }
    }

    fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// The `mediaType` field every manifest document may carry.
#[derive(Deserialize)]
struct MediaTypeProbe {
    #[serde(rename = "mediaType")]
    media_type: Option<String>,
    manifests: Option<serde_json::Value>,
}

/// Registry reached over the OCI distribution API.
pub struct OciRegistry {
    client: Client,
    auth: RegistryAuth,
    /// (repository, push?) pairs already authenticated
    authenticated: Mutex<HashSet<(String, bool)>>,
}

impl OciRegistry {
    pub fn new(auth: RegistryAuth) -> Self {
        Self::with_insecure(auth, Vec::new())
    }

    /// Reach `insecure_registries` over plain HTTP.
    pub fn with_insecure(auth: RegistryAuth, insecure_registries: Vec<String>) -> Self {
        let protocol = if insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(insecure_registries)
        };
        let config = ClientConfig {
            protocol,
            ..Default::default()
        };
        Self {
            client: Client::new(config),
            auth,
            authenticated: Mutex::new(HashSet::new()),
        }
    }

    async fn authenticate(&self, reference: &Reference, push: bool) -> Result<(), RemoteError> {
        let key = (format!("{}/{}", reference.registry(), reference.repository()), push);
        if self.authenticated.lock().contains(&key) {
            return Ok(());
        }
        let operation = if push {
            RegistryOperation::Push
        } else {
            RegistryOperation::Pull
        };
        self.client
            .auth(reference, &self.auth.to_oci_auth(), operation)
            .await
            .map_err(|e| classify(&e))?;
        self.authenticated.lock().insert(key);
        Ok(())
    }
}

fn to_oci_reference(reference: &ImageReference) -> Reference {
    let registry = reference.registry.clone();
    let repository = reference.repository.clone();
    match (&reference.digest, &reference.tag) {
        (Some(digest), _) => Reference::with_digest(registry, repository, digest.clone()),
        (None, Some(tag)) => Reference::with_tag(registry, repository, tag.clone()),
        (None, None) => Reference::with_tag(registry, repository, "latest".to_string()),
    }
}

fn to_oci_descriptor(descriptor: &Descriptor) -> OciDescriptor {
    OciDescriptor {
        media_type: descriptor.media_type.clone(),
        digest: descriptor.digest.clone(),
        size: descriptor.size as i64,
        ..Default::default()
    }
}

/// Sort a client error into the three failures the pusher distinguishes.
fn classify(error: &OciDistributionError) -> RemoteError {
    let message = error.to_string();
    match error {
        OciDistributionError::ServerError { code: 415, .. } => {
            RemoteError::UnsupportedMediaType(message)
        }
        OciDistributionError::ServerError { code: 404, .. } => RemoteError::NotFound(message),
        OciDistributionError::RegistryError { envelope, .. } => {
            let codes = || envelope.errors.iter().map(|e| &e.code);
            if codes().any(|c| matches!(c, OciErrorCode::ManifestInvalid | OciErrorCode::Unsupported)) {
                RemoteError::UnsupportedMediaType(message)
            } else if codes().any(|c| {
                matches!(
                    c,
                    OciErrorCode::ManifestUnknown
                        | OciErrorCode::BlobUnknown
                        | OciErrorCode::NameUnknown
                )
            }) {
                RemoteError::NotFound(message)
            } else {
                RemoteError::Transport(message)
            }
        }
        _ => RemoteError::Transport(message),
    }
}

/// Media type of a fetched manifest, from its own `mediaType` field or
/// its shape.
fn sniff_media_type(content: &[u8]) -> String {
    match serde_json::from_slice::<MediaTypeProbe>(content) {
        Ok(MediaTypeProbe {
            media_type: Some(media_type),
            ..
        }) => media_type,
        Ok(MediaTypeProbe {
            manifests: Some(_), ..
        }) => OCI_INDEX.to_string(),
        _ => OCI_MANIFEST.to_string(),
    }
}

/// Digest the registry reported in the content URL, if it names one.
fn digest_from_url(url: &str) -> Option<String> {
    url.rsplit('/')
        .next()
        .filter(|last| last.starts_with("sha256:"))
        .map(str::to_string)
}

#[async_trait]
impl Registry for OciRegistry {
    async fn resolve(&self, reference: &ImageReference) -> Result<Descriptor, RemoteError> {
        let oci_ref = to_oci_reference(reference);
        let (content, digest) = self
            .client
            .pull_manifest_raw(&oci_ref, &self.auth.to_oci_auth(), &ACCEPTED_IMAGE_MEDIA_TYPES)
            .await
            .map_err(|e| classify(&e))?;

        tracing::debug!(reference = %reference, digest = %digest, "Resolved manifest");
        Ok(Descriptor {
            media_type: sniff_media_type(&content),
            digest,
            size: content.len() as u64,
            annotations: Default::default(),
        })
    }

    async fn fetch(
        &self,
        reference: &ImageReference,
        descriptor: &Descriptor,
    ) -> Result<Vec<u8>, RemoteError> {
        if media_types::is_manifest(&descriptor.media_type) {
            let pinned = reference.pinned(&descriptor.digest);
            let (content, _) = self
                .client
                .pull_manifest_raw(
                    &to_oci_reference(&pinned),
                    &self.auth.to_oci_auth(),
                    &[descriptor.media_type.as_str()],
                )
                .await
                .map_err(|e| classify(&e))?;
            return Ok(content);
        }

        let oci_ref = to_oci_reference(reference);
        self.authenticate(&oci_ref, false).await?;
        let mut content = Vec::new();
        self.client
            .pull_blob(&oci_ref, &to_oci_descriptor(descriptor), &mut content)
            .await
            .map_err(|e| classify(&e))?;
        Ok(content)
    }

    async fn push(
        &self,
        reference: &ImageReference,
        descriptor: &Descriptor,
        content: Vec<u8>,
    ) -> Result<Descriptor, RemoteError> {
        let oci_ref = to_oci_reference(reference);
        self.authenticate(&oci_ref, true).await?;
        let local = digest_of(&content);

        let url = if media_types::is_manifest(&descriptor.media_type) {
            let content_type = http::HeaderValue::from_str(&descriptor.media_type)
                .map_err(|e| RemoteError::UnsupportedMediaType(format!("{}: {}", descriptor.media_type, e)))?;
            self.client
                .push_manifest_raw(&oci_ref, content.clone(), content_type)
                .await
        } else {
            self.client
                .push_blob(&oci_ref, &content, &descriptor.digest)
                .await
        }
        .map_err(|e| match classify(&e) {
            RemoteError::UnsupportedMediaType(_) => {
                RemoteError::UnsupportedMediaType(descriptor.media_type.clone())
            }
            other => other,
        })?;

        tracing::debug!(reference = %reference, url = %url, "Pushed to registry");
        Ok(Descriptor {
            media_type: descriptor.media_type.clone(),
            digest: digest_from_url(&url).unwrap_or(local),
            size: content.len() as u64,
            annotations: Default::default(),
        })
    }
}
