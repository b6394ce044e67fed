//! CNAB OCI Remotes - push and pull bundles through OCI registries.
//!
//! A bundle is stored as an image index: one manifest wrapping the bundle
//! config, plus one entry per invocation and component image, all pinned
//! by digest into the target repository.

pub mod codec;
pub mod context;
pub mod fallback;
mod group;
pub mod memory;
pub mod oci;
pub mod pull;
pub mod push;
pub mod registry;
pub mod resolver;

// Re-export common types
pub use codec::{config_descriptor, decode, encode, EncodedBundle};
pub use context::{CancelHandle, Context};
pub use fallback::FallbackNegotiator;
pub use memory::{MemoryRegistry, PushRecord};
pub use oci::{OciRegistry, RegistryAuth};
pub use pull::Puller;
pub use push::{PushResult, Pusher};
pub use registry::{Registry, RegistryHint, RemoteError};
pub use resolver::{RelocationResolver, Resolution, ResolvedImage};

/// CNAB OCI Remotes version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
