//! CNAB OCI Core - bundle model and registry document types.
//!
//! Pure data: the bundle descriptor, image locators, OCI descriptors,
//! indexes and manifests, the media-type/scheme table and the relocation
//! map. Nothing in this crate performs I/O.

pub mod bundle;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod media_types;
pub mod reference;
pub mod relocation;

// Re-export commonly used types
pub use bundle::{Action, Bundle, Credential, Destination, Image, ImageSlot, ImageType, Maintainer, Parameter};
pub use config::RemotesConfig;
pub use descriptor::{digest_of, Descriptor, Index, Manifest};
pub use error::{CnabError, Result};
pub use media_types::{ManifestType, Scheme};
pub use reference::ImageReference;
pub use relocation::RelocationMap;

/// CNAB OCI version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
