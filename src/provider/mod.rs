//! The `gcrane` provider: configuration, `gcrane_copy` and `gcrane_list`

mod copy;
mod list;

pub use copy::{CopyResource, CopyResourceModel};
pub use list::{ImageModel, ImagesModel, ListDataSource, ListDataSourceModel};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::trace;

use crate::credentials::{CredentialScope, DockerConfig, ScopeGuard};
use crate::framework::{
    decode, Attribute, DataSourceFactory, Diagnostics, Provider, ProviderMetadata,
    RequestContext, ResourceFactory, Schema,
};
use crate::registry::{OciRegistry, RegistryClient, RegistryError};

pub const PROVIDER_TYPE_NAME: &str = "gcrane";

/// Provider configuration block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderModel {
    /// Contents of a Docker `config.json`
    #[serde(default)]
    pub docker_config: Option<String>,
    /// Directory to materialize the Docker config in instead of the system temp dir
    #[serde(default)]
    pub temporary_directory: Option<String>,
}

/// Shared state handed to every resource and data source
pub struct ProviderData {
    pub scope: Arc<CredentialScope>,
    pub registry: Arc<dyn RegistryClient>,
}

impl ProviderData {
    /// Enter the credential scope, recording a diagnostic on failure
    pub(crate) fn enter(&self, diagnostics: &mut Diagnostics) -> Option<ScopeGuard> {
        match self.scope.enter() {
            Ok(guard) => Some(guard),
            Err(e) => {
                diagnostics.add_error("Could not setup provider", e.to_string());
                None
            }
        }
    }

    /// Leave the credential scope; cleanup problems never fail the request
    pub(crate) fn exit(&self, guard: ScopeGuard, diagnostics: &mut Diagnostics) {
        if let Err(e) = guard.release() {
            diagnostics.add_warning("Could not clean up provider", e.to_string());
        }
    }
}

/// Run a registry call until it finishes or the request is cancelled
pub(crate) async fn cancellable<T, F>(ctx: &RequestContext, operation: F) -> Result<T, RegistryError>
where
    F: Future<Output = Result<T, RegistryError>>,
{
    tokio::select! {
        result = operation => result,
        _ = ctx.cancellation().cancelled() => Err(RegistryError::Cancelled),
    }
}

pub struct GcraneProvider {
    /// "dev" for local builds, the release version otherwise
    version: String,
    registry: Option<Arc<dyn RegistryClient>>,
}

impl GcraneProvider {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            registry: None,
        }
    }

    /// Use `registry` instead of building an [`OciRegistry`] at configure time
    pub fn with_registry(mut self, registry: Arc<dyn RegistryClient>) -> Self {
        self.registry = Some(registry);
        self
    }
}

#[async_trait]
impl Provider for GcraneProvider {
    type Data = ProviderData;

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            type_name: PROVIDER_TYPE_NAME.to_string(),
            version: self.version.clone(),
        }
    }

    fn schema(&self) -> Schema {
        Schema::new()
            .description("Terraform provider for gcrane.")
            .markdown(
                "Terraform provider for [gcrane](https://github.com/google/go-containerregistry/blob/main/cmd/gcrane/README.md).\n\n\
                 Copies images between container registries and fetches repository details \
                 (images, tags, child repositories). Neither gcrane nor Docker needs to be \
                 installed. A Docker config JSON given as a string in the provider block is \
                 used to authenticate all operations.",
            )
            .attribute(
                "docker_config",
                Attribute::string()
                    .optional()
                    .markdown("Contents of Docker config file (JSON)"),
            )
            .attribute(
                "temporary_directory",
                Attribute::string().optional().markdown(
                    "Directory for the temporary Docker config (defaults to the system temp directory)",
                ),
            )
    }

    async fn configure(&self, config: Value, diagnostics: &mut Diagnostics) -> Option<ProviderData> {
        let model: ProviderModel = if config.is_null() {
            ProviderModel::default()
        } else {
            decode(config, diagnostics)?
        };

        let docker_config = model.docker_config.filter(|c| !c.is_empty());
        match &docker_config {
            Some(contents) => {
                if let Err(e) = DockerConfig::parse(contents) {
                    diagnostics.add_error(
                        "Invalid Docker config",
                        format!("Unable to parse docker_config: {}", e),
                    );
                    return None;
                }
                trace!("Docker config supplied, materialized on first use");
            }
            None => trace!("No docker_config specified"),
        }

        let temporary_directory = model
            .temporary_directory
            .filter(|d| !d.is_empty())
            .map(PathBuf::from);
        if let Some(dir) = &temporary_directory {
            if !dir.is_dir() {
                diagnostics.add_error(
                    "Invalid temporary directory",
                    format!("{} is not an existing directory", dir.display()),
                );
                return None;
            }
        }

        let registry: Arc<dyn RegistryClient> = match &self.registry {
            Some(registry) => Arc::clone(registry),
            None => match OciRegistry::new() {
                Ok(registry) => Arc::new(registry),
                Err(e) => {
                    diagnostics.add_error("Unable to create registry client", e.to_string());
                    return None;
                }
            },
        };

        Some(ProviderData {
            scope: Arc::new(CredentialScope::new(docker_config, temporary_directory)),
            registry,
        })
    }

    fn resources(&self) -> Vec<ResourceFactory<ProviderData>> {
        vec![ResourceFactory {
            name: "copy",
            schema: CopyResource::schema,
            build: CopyResource::build,
        }]
    }

    fn data_sources(&self) -> Vec<DataSourceFactory<ProviderData>> {
        vec![DataSourceFactory {
            name: "list",
            schema: ListDataSource::schema,
            build: ListDataSource::build,
        }]
    }
}
