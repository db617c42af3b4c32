use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

use super::{
    plan_resource, DataSource, Diagnostics, PlanAction, PlannedChange, Provider,
    ProviderMetadata, RequestContext, Resource, Response, Schema,
};

struct Entry<T: ?Sized> {
    schema: Schema,
    instance: Option<Arc<T>>,
}

/// Full schema set of a provider, as exposed to the host runtime
#[derive(Debug, Clone, Serialize)]
pub struct ProviderSchemas {
    pub metadata: ProviderMetadata,
    pub provider: Schema,
    pub resource_schemas: BTreeMap<String, Schema>,
    pub data_source_schemas: BTreeMap<String, Schema>,
}

/// In-process dispatcher for a provider
///
/// Holds the provider, its registered resource and data source types, and
/// the instances built once `configure` has produced provider data. All
/// request methods take `&self` so one host can serve concurrent requests.
pub struct Host<P: Provider> {
    provider: P,
    metadata: ProviderMetadata,
    resources: BTreeMap<String, Entry<dyn Resource>>,
    data_sources: BTreeMap<String, Entry<dyn DataSource>>,
}

impl<P: Provider> Host<P> {
    pub fn new(provider: P) -> Self {
        let metadata = provider.metadata();

        let resources = provider
            .resources()
            .into_iter()
            .map(|f| {
                let name = format!("{}_{}", metadata.type_name, f.name);
                let entry = Entry {
                    schema: (f.schema)(),
                    instance: None,
                };
                (name, entry)
            })
            .collect();

        let data_sources = provider
            .data_sources()
            .into_iter()
            .map(|f| {
                let name = format!("{}_{}", metadata.type_name, f.name);
                let entry = Entry {
                    schema: (f.schema)(),
                    instance: None,
                };
                (name, entry)
            })
            .collect();

        Self {
            provider,
            metadata,
            resources,
            data_sources,
        }
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    pub fn schemas(&self) -> ProviderSchemas {
        ProviderSchemas {
            metadata: self.metadata.clone(),
            provider: self.provider.schema(),
            resource_schemas: self
                .resources
                .iter()
                .map(|(name, e)| (name.clone(), e.schema.clone()))
                .collect(),
            data_source_schemas: self
                .data_sources
                .iter()
                .map(|(name, e)| (name.clone(), e.schema.clone()))
                .collect(),
        }
    }

    /// Configure the provider and build resource and data source instances
    pub async fn configure(&mut self, config: Value) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        let Some(data) = self.provider.configure(config, &mut diagnostics).await else {
            return diagnostics;
        };
        if diagnostics.has_error() {
            return diagnostics;
        }

        let data = Arc::new(data);
        let type_name = &self.metadata.type_name;

        for factory in self.provider.resources() {
            let name = format!("{}_{}", type_name, factory.name);
            if let Some(entry) = self.resources.get_mut(&name) {
                entry.instance = Some((factory.build)(data.clone()));
            }
        }
        for factory in self.provider.data_sources() {
            let name = format!("{}_{}", type_name, factory.name);
            if let Some(entry) = self.data_sources.get_mut(&name) {
                entry.instance = Some((factory.build)(data.clone()));
            }
        }

        trace!("Provider {} configured", type_name);
        diagnostics
    }

    fn resource(&self, type_name: &str) -> Result<(&Schema, &Arc<dyn Resource>), Response> {
        let entry = self.resources.get(type_name).ok_or_else(|| {
            Response::error(
                "Unknown resource type",
                format!("Resource type {} is not provided by this provider", type_name),
            )
        })?;
        let instance = entry.instance.as_ref().ok_or_else(|| {
            Response::error(
                "Provider not configured",
                format!("Configure the provider before using {}", type_name),
            )
        })?;
        Ok((&entry.schema, instance))
    }

    fn data_source(&self, type_name: &str) -> Result<&Arc<dyn DataSource>, Response> {
        let entry = self.data_sources.get(type_name).ok_or_else(|| {
            Response::error(
                "Unknown data source type",
                format!(
                    "Data source type {} is not provided by this provider",
                    type_name
                ),
            )
        })?;
        entry.instance.as_ref().ok_or_else(|| {
            Response::error(
                "Provider not configured",
                format!("Configure the provider before using {}", type_name),
            )
        })
    }

    /// Plan the change for one resource instance
    pub fn plan_resource(
        &self,
        type_name: &str,
        prior: Option<&Value>,
        proposed: Option<&Value>,
    ) -> Result<PlannedChange, Diagnostics> {
        let (schema, resource) = self.resource(type_name).map_err(|r| r.diagnostics)?;

        let mut change = plan_resource(schema, prior, proposed);
        if !matches!(change.action, PlanAction::Delete | PlanAction::NoOp) {
            resource.modify_plan(&mut change);
        }

        debug!(
            "Planned {:?} for {} (replace: {:?})",
            change.action, type_name, change.requires_replace
        );
        Ok(change)
    }

    /// Apply a previously planned change
    pub async fn apply_resource(
        &self,
        ctx: &RequestContext,
        type_name: &str,
        prior: Option<Value>,
        change: PlannedChange,
    ) -> Response {
        let (_, resource) = match self.resource(type_name) {
            Ok(r) => r,
            Err(response) => return response,
        };

        match (change.action, prior) {
            (PlanAction::Create, _) => resource.create(ctx, change.planned_state).await,
            (PlanAction::Update, Some(prior)) => {
                resource.update(ctx, prior, change.planned_state).await
            }
            (PlanAction::Replace, Some(prior)) => {
                let diagnostics = resource.delete(ctx, prior).await;
                if diagnostics.has_error() {
                    return Response::from_diagnostics(diagnostics);
                }
                let mut response = resource.create(ctx, change.planned_state).await;
                let mut all = diagnostics;
                all.append(response.diagnostics);
                response.diagnostics = all;
                response
            }
            (PlanAction::Delete, Some(prior)) => {
                Response::from_diagnostics(resource.delete(ctx, prior).await)
            }
            (PlanAction::NoOp, prior) => Response {
                state: prior,
                diagnostics: Diagnostics::new(),
            },
            (action, None) => Response::error(
                "Missing prior state",
                format!("Cannot apply {:?} to {} without prior state", action, type_name),
            ),
        }
    }

    pub async fn read_resource(
        &self,
        ctx: &RequestContext,
        type_name: &str,
        state: Value,
    ) -> Response {
        match self.resource(type_name) {
            Ok((_, resource)) => resource.read(ctx, state).await,
            Err(response) => response,
        }
    }

    pub fn import_resource(&self, type_name: &str, id: &str) -> Response {
        match self.resource(type_name) {
            Ok((_, resource)) => resource.import_state(id),
            Err(response) => response,
        }
    }

    pub async fn read_data_source(
        &self,
        ctx: &RequestContext,
        type_name: &str,
        config: Value,
    ) -> Response {
        match self.data_source(type_name) {
            Ok(data_source) => data_source.read(ctx, config).await,
            Err(response) => response,
        }
    }
}
