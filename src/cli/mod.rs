pub mod copy;
pub mod list;
pub mod plan;

use anyhow::{Context, Result};
use terraform_provider_gcrane::framework::{Diagnostics, Host, RequestContext, Severity};
use terraform_provider_gcrane::settings::Settings;
use terraform_provider_gcrane::GcraneProvider;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Print diagnostics to stderr, failing when any of them is an error
pub fn report(diagnostics: &Diagnostics) -> Result<()> {
    for diagnostic in diagnostics.iter() {
        eprintln!("{}", diagnostic);
    }

    let errors = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("{} error(s) reported", errors);
    }
    Ok(())
}

/// Host with the provider configured from `settings`
pub async fn configured_host(settings: &Settings) -> Result<Host<GcraneProvider>> {
    let config = settings
        .provider_config()
        .context("Failed to build provider configuration")?;

    let mut host = Host::new(GcraneProvider::new(env!("CARGO_PKG_VERSION")));
    report(&host.configure(config).await)?;
    debug!("Configured provider {}", host.metadata().type_name);
    Ok(host)
}

/// Request context that is cancelled on Ctrl-C
pub fn interruptible_context() -> RequestContext {
    let token = CancellationToken::new();
    let cancel = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, cancelling...");
            cancel.cancel();
        }
    });
    RequestContext::with_cancellation(token)
}

/// Print provider, resource and data source schemas as JSON
pub fn print_schemas() -> Result<()> {
    let host = Host::new(GcraneProvider::new(env!("CARGO_PKG_VERSION")));
    let schemas = serde_json::to_string_pretty(&host.schemas())?;
    println!("{}", schemas);
    Ok(())
}
