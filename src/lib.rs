//! Terraform provider for gcrane
//!
//! Exposes a `gcrane_copy` resource that copies images or whole repositories
//! between container registries and a `gcrane_list` data source that lists a
//! repository. Registry credentials come from a Docker config supplied in
//! the provider block; see [`credentials::CredentialScope`].

pub mod credentials;
pub mod framework;
pub mod provider;
pub mod registry;
pub mod settings;

pub use provider::GcraneProvider;
