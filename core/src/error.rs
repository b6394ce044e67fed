use thiserror::Error;

/// CNAB OCI error types
#[derive(Error, Debug)]
pub enum CnabError {
    /// Malformed registry reference string
    #[error("Invalid reference '{reference}': {message}")]
    InvalidReference { reference: String, message: String },

    /// Reference could not be resolved or resolved to an unacceptable media type
    #[error("Unresolvable reference '{reference}': {message}")]
    UnresolvableReference { reference: String, message: String },

    /// Index, manifest or config failed to parse, or a required annotation is missing
    #[error("Malformed artifact: {0}")]
    MalformedArtifact(String),

    /// Digest reported by the registry differs from the locally computed one
    #[error("Integrity violation for '{reference}': expected {expected}, got {actual}")]
    IntegrityViolation {
        reference: String,
        expected: String,
        actual: String,
    },

    /// Registry rejected a media type and no further fallback is available
    #[error("Unsupported media type '{media_type}' for '{reference}'")]
    UnsupportedMediaType {
        reference: String,
        media_type: String,
    },

    /// Cancellation or timeout
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Bundle violates one of its own invariants
    #[error("Invalid bundle: {0}")]
    InvalidBundle(String),

    /// Container registry error
    #[error("Registry error: {registry} - {message}")]
    RegistryError { registry: String, message: String },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<serde_json::Error> for CnabError {
    fn from(err: serde_json::Error) -> Self {
        CnabError::SerializationError(err.to_string())
    }
}

/// Result type alias for CNAB OCI operations
pub type Result<T> = std::result::Result<T, CnabError>;
