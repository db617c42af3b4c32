use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use super::{cancellable, ProviderData};
use crate::framework::{
    decode, Attribute, Diagnostics, PlanModifier, PlannedChange, RequestContext, Resource,
    Response, Schema,
};
use crate::registry::RegistryError;

/// State of a `gcrane_copy` resource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CopyResourceModel {
    #[serde(default)]
    pub recursive: Option<bool>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default)]
    pub id: Option<String>,
}

impl CopyResourceModel {
    pub fn is_recursive(&self) -> bool {
        self.recursive.unwrap_or(false)
    }
}

/// `gcrane_copy`: copies an image, or a whole repository, between registries
pub struct CopyResource {
    data: Arc<ProviderData>,
}

impl CopyResource {
    pub fn new(data: Arc<ProviderData>) -> Self {
        Self { data }
    }

    pub fn build(data: Arc<ProviderData>) -> Arc<dyn Resource> {
        Arc::new(Self::new(data))
    }

    pub fn schema() -> Schema {
        Schema::new()
            .description("Copies an image or repository with gcrane.")
            .markdown(
                "Performs a gcrane copy between registries. Changing `destination` copies \
                 again, changing `source` or `recursive` replaces the resource. Removing \
                 the resource leaves the copied images in place.",
            )
            .attribute(
                "id",
                Attribute::string()
                    .computed()
                    .markdown("Destination of the copy")
                    .plan_modifier(PlanModifier::UseStateForUnknown),
            )
            .attribute(
                "recursive",
                Attribute::bool()
                    .optional()
                    .markdown("Whether to copy the whole repository, including nested repositories")
                    .plan_modifier(PlanModifier::RequiresReplace),
            )
            .attribute(
                "source",
                Attribute::string()
                    .required()
                    .markdown("Image or repository to copy from")
                    .plan_modifier(PlanModifier::RequiresReplace),
            )
            .attribute(
                "destination",
                Attribute::string()
                    .required()
                    .markdown("Image or repository to copy to"),
            )
    }

    async fn run_copy(
        &self,
        ctx: &RequestContext,
        model: &CopyResourceModel,
        diagnostics: &mut Diagnostics,
    ) {
        let Some(guard) = self.data.enter(diagnostics) else {
            return;
        };

        let result: Result<(), RegistryError> = async {
            let keychain = guard.keychain()?;
            let registry = &self.data.registry;
            let operation = if model.is_recursive() {
                registry.copy_repository(&keychain, &model.source, &model.destination)
            } else {
                registry.copy(&keychain, &model.source, &model.destination)
            };
            cancellable(ctx, operation).await
        }
        .await;

        match result {
            Ok(()) => info!(
                "Performed a copy using gcrane (recursive: {}): {} -> {}",
                model.is_recursive(),
                model.source,
                model.destination
            ),
            Err(e) => diagnostics.add_error(
                "Could not perform gcrane copy",
                format!("Error when copying using gcrane: {}", e),
            ),
        }

        self.data.exit(guard, diagnostics);
    }

    /// Copy `model` and answer with its new state
    async fn apply(&self, ctx: &RequestContext, mut model: CopyResourceModel) -> Response {
        let mut response = Response::default();
        if model.source.is_empty() || model.destination.is_empty() {
            response
                .diagnostics
                .add_error("Missing attribute", "Both source and destination must be set");
            return response;
        }

        self.run_copy(ctx, &model, &mut response.diagnostics).await;
        if response.diagnostics.has_error() {
            return response;
        }

        model.id = Some(model.destination.clone());
        response.set_state(&model);
        response
    }
}

#[async_trait]
impl Resource for CopyResource {
    fn modify_plan(&self, change: &mut PlannedChange) {
        // The id is always the destination, so it is known at plan time
        if let Some(destination) = change.get("destination").cloned() {
            if destination.is_string() {
                change.set("id", destination);
            }
        }
    }

    async fn create(&self, ctx: &RequestContext, planned: Value) -> Response {
        let mut diagnostics = Diagnostics::new();
        let Some(model) = decode::<CopyResourceModel>(planned, &mut diagnostics) else {
            return Response::from_diagnostics(diagnostics);
        };
        self.apply(ctx, model).await
    }

    async fn read(&self, _ctx: &RequestContext, state: Value) -> Response {
        // Copied images are not tracked, the stored state is authoritative
        let mut response = Response::default();
        if let Some(model) = decode::<CopyResourceModel>(state, &mut response.diagnostics) {
            response.set_state(&model);
        }
        response
    }

    async fn update(&self, ctx: &RequestContext, prior: Value, planned: Value) -> Response {
        let mut diagnostics = Diagnostics::new();
        let prior = decode::<CopyResourceModel>(prior, &mut diagnostics);
        let planned = decode::<CopyResourceModel>(planned, &mut diagnostics);
        let (Some(prior), Some(planned)) = (prior, planned) else {
            return Response::from_diagnostics(diagnostics);
        };

        if prior.destination == planned.destination && prior.id.is_some() {
            debug!("Destination of {} unchanged, skipping copy", planned.destination);
            let mut response = Response::default();
            let mut model = planned;
            model.id = prior.id;
            response.set_state(&model);
            return response;
        }
        self.apply(ctx, planned).await
    }

    async fn delete(&self, _ctx: &RequestContext, state: Value) -> Diagnostics {
        let id = state.get("id").and_then(serde_json::Value::as_str).unwrap_or_default();
        debug!("Removing gcrane_copy {} from state, images are left in place", id);
        Diagnostics::new()
    }

    fn import_state(&self, id: &str) -> Response {
        let mut response = Response::default();
        response.set_state(&CopyResourceModel {
            recursive: None,
            source: String::new(),
            destination: id.to_string(),
            id: Some(id.to_string()),
        });
        response
    }
}
