use anyhow::Result;
use serde_json::json;
use terraform_provider_gcrane::settings::Settings;
use tracing::info;

use super::{configured_host, interruptible_context, report};

const RESOURCE_TYPE: &str = "gcrane_copy";

/// Copy an image, or a whole repository with `recursive`, like applying a new `gcrane_copy`
pub async fn handle_copy(
    settings: &Settings,
    source: &str,
    destination: &str,
    recursive: bool,
) -> Result<()> {
    let host = configured_host(settings).await?;

    let proposed = json!({
        "source": source,
        "destination": destination,
        "recursive": recursive.then_some(true),
        "id": null,
    });
    let change = match host.plan_resource(RESOURCE_TYPE, None, Some(&proposed)) {
        Ok(change) => change,
        Err(diagnostics) => return report(&diagnostics),
    };

    let response = host
        .apply_resource(&interruptible_context(), RESOURCE_TYPE, None, change)
        .await;
    report(&response.diagnostics)?;

    if let Some(state) = response.state {
        info!("Copied {} to {}", source, destination);
        println!("{}", serde_json::to_string_pretty(&state)?);
    }
    Ok(())
}
