use anyhow::{Context, Result};
use serde_json::Value;
use std::path::Path;
use terraform_provider_gcrane::settings::Settings;

use super::{configured_host, report};

const RESOURCE_TYPE: &str = "gcrane_copy";

fn read_json(path: &Path) -> Result<Value> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Invalid JSON in {}", path.display()))
}

/// Plan a `gcrane_copy` change between two states without touching any registry
///
/// A missing `prior` plans a create, a missing `proposed` plans a delete.
pub async fn handle_plan_copy(
    settings: &Settings,
    prior: Option<&Path>,
    proposed: Option<&Path>,
) -> Result<()> {
    let prior = prior.map(read_json).transpose()?;
    let proposed = proposed.map(read_json).transpose()?;

    let host = configured_host(settings).await?;
    let change = match host.plan_resource(RESOURCE_TYPE, prior.as_ref(), proposed.as_ref()) {
        Ok(change) => change,
        Err(diagnostics) => return report(&diagnostics),
    };

    println!("{}", serde_json::to_string_pretty(&change)?);
    Ok(())
}
