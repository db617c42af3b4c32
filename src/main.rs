use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use terraform_provider_gcrane::settings::Settings;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Docker config JSON file to authenticate with
    #[arg(long, global = true)]
    docker_config_file: Option<PathBuf>,
    /// Directory for the temporary Docker config
    #[arg(long, global = true)]
    temporary_directory: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Settings from the environment and settings file, with flags applied
    fn settings(&self) -> Result<Settings> {
        Ok(Settings::load()
            .context("Failed to load settings")?
            .with_overrides(self.docker_config_file.clone(), self.temporary_directory.clone()))
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Copy an image or repository between registries
    Copy {
        /// Image or repository to copy from (e.g., gcr.io/my-project/app:v1)
        source: String,
        /// Image or repository to copy to
        destination: String,
        /// Copy every image in the repository, including nested repositories
        #[arg(long, short = 'r')]
        recursive: bool,
    },
    /// List images, tags and child repositories of a repository
    #[command(visible_alias = "ls")]
    List {
        /// Repository to list (e.g., gcr.io/my-project/app)
        repository: String,
        /// Print the data source state as JSON
        #[arg(long)]
        json: bool,
    },
    /// Plan a gcrane_copy change between a prior and a proposed state
    PlanCopy {
        /// JSON file with the prior state; omit to plan a create
        #[arg(long)]
        prior: Option<PathBuf>,
        /// JSON file with the proposed state; omit to plan a delete
        #[arg(long)]
        proposed: Option<PathBuf>,
    },
    /// Print provider, resource and data source schemas as JSON
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr, stdout is reserved for command output
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    run(Cli::parse()).await
}

async fn run(cli: Cli) -> Result<()> {
    match &cli.command {
        Commands::Copy {
            source,
            destination,
            recursive,
        } => cli::copy::handle_copy(&cli.settings()?, source, destination, *recursive).await,
        Commands::List { repository, json } => {
            cli::list::handle_list(&cli.settings()?, repository, *json).await
        }
        Commands::PlanCopy { prior, proposed } => {
            cli::plan::handle_plan_copy(&cli.settings()?, prior.as_deref(), proposed.as_deref())
                .await
        }
        // Schemas never depend on settings
        Commands::Schema => cli::print_schemas(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use terraform_provider_gcrane::settings::CONFIG_FILE_ENV;

    #[tokio::test]
    #[serial]
    async fn test_schema_ignores_broken_settings() {
        let temp = tempfile::TempDir::new().unwrap();
        let previous = std::env::var_os(CONFIG_FILE_ENV);
        std::env::set_var(CONFIG_FILE_ENV, temp.path().join("missing.toml"));

        let schema = run(Cli::try_parse_from(["terraform-provider-gcrane", "schema"]).unwrap()).await;
        let list = run(
            Cli::try_parse_from(["terraform-provider-gcrane", "list", "gcr.io/p/app"]).unwrap(),
        )
        .await;

        match previous {
            Some(value) => std::env::set_var(CONFIG_FILE_ENV, value),
            None => std::env::remove_var(CONFIG_FILE_ENV),
        }

        assert!(schema.is_ok());
        let err = list.unwrap_err();
        assert!(err.to_string().contains("Failed to load settings"));
    }
}
