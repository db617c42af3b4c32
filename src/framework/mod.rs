//! Provider framework vocabulary
//!
//! The host runtime talks to providers over its own plugin protocol. This
//! module models what a provider sees of that protocol: schemas, plans,
//! diagnostics and the resource/data source lifecycle. [`host::Host`] drives
//! these traits in-process.

pub mod diagnostics;
pub mod host;
pub mod plan;
pub mod schema;

pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use host::Host;
pub use plan::{plan_resource, PlanAction, PlannedChange};
pub use schema::{Attribute, AttributeType, NestingMode, PlanModifier, Schema};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Per-request context handed to every operation
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cancellation(cancellation: CancellationToken) -> Self {
        Self { cancellation }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

/// Result of a state-producing operation
///
/// A response may carry a state and diagnostics at the same time, e.g. a
/// successful read with a cleanup warning attached.
#[derive(Debug, Default)]
pub struct Response {
    pub state: Option<Value>,
    pub diagnostics: Diagnostics,
}

impl Response {
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        let mut diagnostics = Diagnostics::new();
        diagnostics.add_error(summary, detail);
        Self {
            state: None,
            diagnostics,
        }
    }

    pub fn from_diagnostics(diagnostics: Diagnostics) -> Self {
        Self {
            state: None,
            diagnostics,
        }
    }

    /// Serialize `model` into the response state, recording a diagnostic on failure
    pub fn set_state<T: Serialize>(&mut self, model: &T) {
        match serde_json::to_value(model) {
            Ok(state) => self.state = Some(state),
            Err(e) => self.diagnostics.add_error(
                "Unable to save state",
                format!("Failed to encode state: {}", e),
            ),
        }
    }
}

/// Decode a plan/state/config value into a typed model
pub fn decode<T: DeserializeOwned>(value: Value, diagnostics: &mut Diagnostics) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(model) => Some(model),
        Err(e) => {
            diagnostics.add_error(
                "Invalid configuration value",
                format!("Failed to decode value: {}", e),
            );
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderMetadata {
    pub type_name: String,
    pub version: String,
}

/// Managed resource lifecycle
#[async_trait]
pub trait Resource: Send + Sync {
    /// Adjust a computed plan before it is shown to the operator
    fn modify_plan(&self, _change: &mut PlannedChange) {}

    async fn create(&self, ctx: &RequestContext, planned: Value) -> Response;

    async fn read(&self, ctx: &RequestContext, state: Value) -> Response;

    async fn update(&self, ctx: &RequestContext, prior: Value, planned: Value) -> Response;

    async fn delete(&self, ctx: &RequestContext, state: Value) -> Diagnostics;

    /// Build the state for an existing object identified by `id`
    fn import_state(&self, id: &str) -> Response {
        Response::error(
            "Resource import not supported",
            format!("Cannot import {}", id),
        )
    }
}

/// Read-only data source
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn read(&self, ctx: &RequestContext, config: Value) -> Response;
}

/// Registration entry for a resource type
///
/// `name` is appended to the provider type name (`copy` becomes
/// `gcrane_copy`). Construction happens after the provider is configured so
/// that each instance holds the typed provider data.
pub struct ResourceFactory<D> {
    pub name: &'static str,
    pub schema: fn() -> Schema,
    pub build: fn(Arc<D>) -> Arc<dyn Resource>,
}

pub struct DataSourceFactory<D> {
    pub name: &'static str,
    pub schema: fn() -> Schema,
    pub build: fn(Arc<D>) -> Arc<dyn DataSource>,
}

#[async_trait]
pub trait Provider: Send + Sync {
    /// Shared data produced by `configure` and handed to every resource
    type Data: Send + Sync + 'static;

    fn metadata(&self) -> ProviderMetadata;

    fn schema(&self) -> Schema;

    async fn configure(&self, config: Value, diagnostics: &mut Diagnostics)
        -> Option<Self::Data>;

    fn resources(&self) -> Vec<ResourceFactory<Self::Data>>;

    fn data_sources(&self) -> Vec<DataSourceFactory<Self::Data>>;
}
