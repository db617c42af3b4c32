use thiserror::Error;

use crate::credentials::KeychainError;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Digest mismatch for {expected}: registry sent {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("Blob {digest} has unsupported size {size} (limit {limit} bytes)")]
    BlobTooLarge { digest: String, size: i64, limit: i64 },

    #[error(transparent)]
    Credentials(#[from] KeychainError),

    #[error("Operation cancelled")]
    Cancelled,
}

impl RegistryError {
    /// Classify a client error by the status it carries
    pub(crate) fn classify(err: oci_distribution::errors::OciDistributionError, target: &str) -> Self {
        let error_string = err.to_string();

        if error_string.contains("404")
            || error_string.contains("not found")
            || error_string.contains("NAME_UNKNOWN")
            || error_string.contains("MANIFEST_UNKNOWN")
        {
            RegistryError::NotFound(format!("{}: {}", target, error_string))
        } else if error_string.contains("401")
            || error_string.contains("403")
            || error_string.to_lowercase().contains("unauthorized")
            || error_string.contains("DENIED")
        {
            RegistryError::Unauthorized(format!("{}: {}", target, error_string))
        } else {
            RegistryError::Registry(format!("{}: {}", target, error_string))
        }
    }
}

impl From<reqwest::Error> for RegistryError {
    fn from(err: reqwest::Error) -> Self {
        RegistryError::Network(err.to_string())
    }
}
