//! Settings for running the provider outside of the host
//!
//! Values are layered: an optional settings file named by `GCRANE_CONFIG_FILE`,
//! then `GCRANE_*` environment variables, then command line flags.

use config::{Config, Environment, File};
use serde::Deserialize;
use serde_json::{json, Value};
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const CONFIG_FILE_ENV: &str = "GCRANE_CONFIG_FILE";
const ENV_PREFIX: &str = "GCRANE";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load settings: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Unable to read Docker config {}: {source}", path.display())]
    ReadDockerConfig {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Settings {
    /// Settings file the values were loaded from
    #[serde(default)]
    pub config_file: Option<PathBuf>,
    /// Inline Docker config JSON
    #[serde(default)]
    pub docker_config: Option<String>,
    /// Docker config JSON read from a file, used when `docker_config` is unset
    #[serde(default)]
    pub docker_config_file: Option<PathBuf>,
    #[serde(default)]
    pub temporary_directory: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the file named by `GCRANE_CONFIG_FILE` and the environment
    pub fn load() -> Result<Self, SettingsError> {
        let file = env::var_os(CONFIG_FILE_ENV)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        Self::from_sources(file.as_deref(), None)
    }

    /// Load settings from `file` and environment variables
    ///
    /// `environment` replaces the process environment when set.
    pub fn from_sources(
        file: Option<&Path>,
        environment: Option<config::Map<String, String>>,
    ) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(file) = file {
            builder = builder.add_source(File::from(file).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .ignore_empty(true)
                .source(environment),
        );

        let value: Value = builder.build()?.try_deserialize()?;

        let mut unused_fields = Vec::new();
        let settings: Settings = serde_ignored::deserialize(value, |path| {
            unused_fields.push(path.to_string());
        })
        .map_err(|e| {
            config::ConfigError::Message(format!("Failed to deserialize settings: {}", e))
        })?;

        for field in &unused_fields {
            tracing::warn!("Unknown configuration field in gcrane settings: {}", field);
        }

        Ok(settings)
    }

    /// Apply command line flags on top of the loaded values
    pub fn with_overrides(
        mut self,
        docker_config_file: Option<PathBuf>,
        temporary_directory: Option<PathBuf>,
    ) -> Self {
        if let Some(path) = docker_config_file {
            // An explicit file wins over anything inline
            self.docker_config = None;
            self.docker_config_file = Some(path);
        }
        if temporary_directory.is_some() {
            self.temporary_directory = temporary_directory;
        }
        self
    }

    /// Docker config contents, inline or read from `docker_config_file`
    pub fn docker_config_contents(&self) -> Result<Option<String>, SettingsError> {
        if let Some(contents) = self.docker_config.as_ref().filter(|c| !c.is_empty()) {
            return Ok(Some(contents.clone()));
        }
        match &self.docker_config_file {
            Some(path) => std::fs::read_to_string(path)
                .map(Some)
                .map_err(|source| SettingsError::ReadDockerConfig {
                    path: path.clone(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Provider configuration block equivalent to these settings
    pub fn provider_config(&self) -> Result<Value, SettingsError> {
        Ok(json!({
            "docker_config": self.docker_config_contents()?,
            "temporary_directory": self
                .temporary_directory
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        }))
    }
}
