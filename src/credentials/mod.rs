mod error;
pub mod keychain;
pub mod scope;

pub use error::{KeychainError, ScopeError};
pub use keychain::{normalize_host, Credential, DockerConfig, Keychain};
pub use scope::{CredentialScope, ScopeGuard, ScopeStats, DOCKER_CONFIG_ENV};
