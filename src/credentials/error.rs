use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScopeError {
    #[error("Unable to create directory for Docker config {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("Unable to create temporary file for Docker config {}: {source}", path.display())]
    WriteFile { path: PathBuf, source: io::Error },

    #[error("Unable to remove temporary Docker config {}: {source}", path.display())]
    Remove { path: PathBuf, source: io::Error },
}

#[derive(Debug, Error)]
pub enum KeychainError {
    #[error("Invalid Docker config JSON: {0}")]
    InvalidConfig(#[from] serde_json::Error),

    #[error("Unable to read Docker config {}: {source}", path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("Invalid auth entry for {registry}: {reason}")]
    InvalidAuth { registry: String, reason: String },

    #[error("Credential helper docker-credential-{helper} failed: {reason}")]
    Helper { helper: String, reason: String },
}
