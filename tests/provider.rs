//! End-to-end provider behavior through the in-process host

use async_trait::async_trait;
use serde_json::{json, Value};
use serial_test::serial;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use terraform_provider_gcrane::credentials::{Credential, Keychain};
use terraform_provider_gcrane::framework::{Host, PlanAction, RequestContext};
use terraform_provider_gcrane::registry::{RegistryClient, RegistryError, RepositoryRef, Tags};
use terraform_provider_gcrane::GcraneProvider;

/// What the registry saw when it was called
#[derive(Debug, Clone)]
struct Observed {
    operation: String,
    docker_config_env: Option<PathBuf>,
    config_contents: Option<String>,
    credential: Credential,
}

#[derive(Default)]
struct RecordingRegistry {
    observed: Mutex<Vec<Observed>>,
    tags: Tags,
    /// Delete the temporary Docker config while the operation runs
    remove_config: bool,
}

impl RecordingRegistry {
    async fn observe(&self, operation: String, keychain: &Keychain, registry: &str) {
        let docker_config_env = std::env::var_os("DOCKER_CONFIG").map(PathBuf::from);
        let config_contents = docker_config_env
            .as_ref()
            .and_then(|dir| std::fs::read_to_string(dir.join("config.json")).ok());
        let credential = keychain.resolve(registry).await.unwrap();

        if self.remove_config {
            if let Some(dir) = &docker_config_env {
                std::fs::remove_dir_all(dir).unwrap();
            }
        }

        self.observed.lock().unwrap().push(Observed {
            operation,
            docker_config_env,
            config_contents,
            credential,
        });
    }

    fn observed(&self) -> Vec<Observed> {
        self.observed.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegistryClient for RecordingRegistry {
    async fn copy(
        &self,
        keychain: &Keychain,
        source: &str,
        destination: &str,
    ) -> Result<(), RegistryError> {
        self.observe(format!("copy {} {}", source, destination), keychain, "gcr.io")
            .await;
        Ok(())
    }

    async fn copy_repository(
        &self,
        keychain: &Keychain,
        source: &str,
        destination: &str,
    ) -> Result<(), RegistryError> {
        self.observe(
            format!("copy -r {} {}", source, destination),
            keychain,
            "gcr.io",
        )
        .await;
        Ok(())
    }

    async fn list(
        &self,
        keychain: &Keychain,
        repository: &RepositoryRef,
    ) -> Result<Tags, RegistryError> {
        self.observe(format!("ls {}", repository), keychain, repository.registry())
            .await;
        Ok(self.tags.clone())
    }
}

// base64("user:secret")
const DOCKER_CONFIG: &str = r#"{"auths": {"gcr.io": {"auth": "dXNlcjpzZWNyZXQ="}}}"#;

async fn host(
    registry: Arc<RecordingRegistry>,
    temp: &TempDir,
) -> Host<GcraneProvider> {
    let mut host = Host::new(GcraneProvider::new("test").with_registry(registry));
    let diagnostics = host
        .configure(json!({
            "docker_config": DOCKER_CONFIG,
            "temporary_directory": temp.path().to_str().unwrap(),
        }))
        .await;
    assert!(diagnostics.is_empty(), "{:?}", diagnostics);
    host
}

fn copy_config(source: &str, destination: &str) -> Value {
    json!({"source": source, "destination": destination, "recursive": null, "id": null})
}

#[test]
fn test_registered_type_names() {
    let host = Host::new(GcraneProvider::new("test"));
    let schemas = host.schemas();

    assert_eq!(schemas.metadata.type_name, "gcrane");
    assert!(schemas.resource_schemas.contains_key("gcrane_copy"));
    assert!(schemas.data_source_schemas.contains_key("gcrane_list"));
    assert_eq!(schemas.resource_schemas.len(), 1);
    assert_eq!(schemas.data_source_schemas.len(), 1);
}

#[tokio::test]
async fn test_requests_before_configure_fail() {
    let host = Host::new(GcraneProvider::new("test"));
    let response = host
        .read_data_source(
            &RequestContext::new(),
            "gcrane_list",
            json!({"repository": "gcr.io/p/app"}),
        )
        .await;

    assert_eq!(
        response.diagnostics.errors().next().unwrap().summary,
        "Provider not configured"
    );
}

#[tokio::test]
#[serial]
async fn test_copy_runs_inside_credential_scope() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(RecordingRegistry::default());
    let host = host(registry.clone(), &temp).await;
    let before = std::env::var_os("DOCKER_CONFIG");

    let proposed = copy_config("gcr.io/p/app:v1", "gcr.io/q/app");
    let change = host.plan_resource("gcrane_copy", None, Some(&proposed)).unwrap();
    assert_eq!(change.action, PlanAction::Create);
    assert_eq!(change.get("id").unwrap(), "gcr.io/q/app");

    let response = host
        .apply_resource(&RequestContext::new(), "gcrane_copy", None, change)
        .await;
    assert!(response.diagnostics.is_empty(), "{:?}", response.diagnostics);
    assert_eq!(response.state.unwrap()["id"], "gcr.io/q/app");

    let observed = registry.observed();
    assert_eq!(observed.len(), 1);
    assert_eq!(observed[0].operation, "copy gcr.io/p/app:v1 gcr.io/q/app");
    let dir = observed[0].docker_config_env.clone().unwrap();
    assert!(dir.starts_with(temp.path()));
    assert_eq!(observed[0].config_contents.as_deref(), Some(DOCKER_CONFIG));
    assert_eq!(
        observed[0].credential,
        Credential::Basic {
            username: "user".to_string(),
            password: "secret".to_string(),
        }
    );

    // Last user out removes the file and restores the environment
    assert!(!dir.exists());
    assert_eq!(std::env::var_os("DOCKER_CONFIG"), before);
}

#[tokio::test]
#[serial]
async fn test_destination_change_updates_in_place() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(RecordingRegistry::default());
    let host = host(registry.clone(), &temp).await;

    let prior = json!({
        "source": "gcr.io/p/app:v1",
        "destination": "gcr.io/q/app",
        "recursive": null,
        "id": "gcr.io/q/app",
    });
    let proposed = copy_config("gcr.io/p/app:v1", "gcr.io/r/app");

    let change = host
        .plan_resource("gcrane_copy", Some(&prior), Some(&proposed))
        .unwrap();
    assert_eq!(change.action, PlanAction::Update);
    assert!(change.requires_replace.is_empty());

    let response = host
        .apply_resource(&RequestContext::new(), "gcrane_copy", Some(prior), change)
        .await;
    assert_eq!(response.state.unwrap()["id"], "gcr.io/r/app");
    assert_eq!(
        registry.observed()[0].operation,
        "copy gcr.io/p/app:v1 gcr.io/r/app"
    );
}

#[tokio::test]
#[serial]
async fn test_source_change_replaces() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(RecordingRegistry::default());
    let host = host(registry.clone(), &temp).await;

    let prior = json!({
        "source": "gcr.io/p/app:v1",
        "destination": "gcr.io/q/app",
        "recursive": null,
        "id": "gcr.io/q/app",
    });
    let proposed = json!({
        "source": "gcr.io/p",
        "destination": "gcr.io/q/app",
        "recursive": true,
        "id": null,
    });

    let change = host
        .plan_resource("gcrane_copy", Some(&prior), Some(&proposed))
        .unwrap();
    assert_eq!(change.action, PlanAction::Replace);
    assert_eq!(change.requires_replace, vec!["recursive", "source"]);

    let response = host
        .apply_resource(&RequestContext::new(), "gcrane_copy", Some(prior), change)
        .await;
    assert!(!response.diagnostics.has_error());
    assert_eq!(
        registry.observed()[0].operation,
        "copy -r gcr.io/p gcr.io/q/app"
    );
}

#[tokio::test]
#[serial]
async fn test_delete_leaves_registry_alone() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(RecordingRegistry::default());
    let host = host(registry.clone(), &temp).await;

    let prior = json!({
        "source": "gcr.io/p/app:v1",
        "destination": "gcr.io/q/app",
        "recursive": null,
        "id": "gcr.io/q/app",
    });
    let change = host.plan_resource("gcrane_copy", Some(&prior), None).unwrap();
    assert_eq!(change.action, PlanAction::Delete);

    let response = host
        .apply_resource(&RequestContext::new(), "gcrane_copy", Some(prior), change)
        .await;
    assert!(response.diagnostics.is_empty());
    assert!(response.state.is_none());
    assert!(registry.observed().is_empty());
}

#[tokio::test]
#[serial]
async fn test_list_through_host() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(RecordingRegistry {
        tags: Tags {
            name: "p/app".to_string(),
            tags: vec!["latest".to_string()],
            ..Default::default()
        },
        ..Default::default()
    });
    let host = host(registry.clone(), &temp).await;

    let response = host
        .read_data_source(
            &RequestContext::new(),
            "gcrane_list",
            json!({"repository": "gcr.io/p/app"}),
        )
        .await;

    assert!(response.diagnostics.is_empty(), "{:?}", response.diagnostics);
    assert_eq!(
        response.state.unwrap(),
        json!({
            "repository": "gcr.io/p/app",
            "id": "gcr.io/p/app",
            "images": [{"manifests": {}, "tags": ["latest"], "children": []}],
        })
    );
    assert_eq!(registry.observed()[0].operation, "ls gcr.io/p/app");
}

#[tokio::test]
#[serial]
async fn test_copy_succeeds_when_cleanup_fails() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(RecordingRegistry {
        remove_config: true,
        ..Default::default()
    });
    let host = host(registry.clone(), &temp).await;

    let proposed = copy_config("gcr.io/p/app:v1", "gcr.io/q/app");
    let change = host.plan_resource("gcrane_copy", None, Some(&proposed)).unwrap();
    let response = host
        .apply_resource(&RequestContext::new(), "gcrane_copy", None, change)
        .await;

    assert!(!response.diagnostics.has_error(), "{:?}", response.diagnostics);
    let warnings: Vec<_> = response.diagnostics.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].summary, "Could not clean up provider");
    assert_eq!(response.state.unwrap()["id"], "gcr.io/q/app");
    assert_eq!(registry.observed().len(), 1);
}

#[tokio::test]
#[serial]
async fn test_list_succeeds_when_cleanup_fails() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(RecordingRegistry {
        tags: Tags {
            name: "p/app".to_string(),
            tags: vec!["latest".to_string()],
            ..Default::default()
        },
        remove_config: true,
        ..Default::default()
    });
    let host = host(registry.clone(), &temp).await;

    let response = host
        .read_data_source(
            &RequestContext::new(),
            "gcrane_list",
            json!({"repository": "gcr.io/p/app"}),
        )
        .await;

    assert!(!response.diagnostics.has_error(), "{:?}", response.diagnostics);
    let warnings: Vec<_> = response.diagnostics.warnings().collect();
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].summary, "Could not clean up provider");
    let state = response.state.unwrap();
    assert_eq!(state["id"], "gcr.io/p/app");
    assert_eq!(state["images"][0]["tags"], json!(["latest"]));
}

#[tokio::test]
#[serial]
async fn test_concurrent_requests_share_one_config_file() {
    let temp = TempDir::new().unwrap();
    let registry = Arc::new(RecordingRegistry::default());
    let host = Arc::new(host(registry.clone(), &temp).await);

    let mut handles = Vec::new();
    for i in 0..8 {
        let host = Arc::clone(&host);
        handles.push(tokio::spawn(async move {
            let proposed = copy_config("gcr.io/p/app:v1", &format!("gcr.io/q/app{}", i));
            let change = host.plan_resource("gcrane_copy", None, Some(&proposed)).unwrap();
            host.apply_resource(&RequestContext::new(), "gcrane_copy", None, change)
                .await
        }));
    }
    for handle in handles {
        let response = handle.await.unwrap();
        assert!(!response.diagnostics.has_error());
    }

    let observed = registry.observed();
    assert_eq!(observed.len(), 8);
    for o in &observed {
        assert_eq!(o.config_contents.as_deref(), Some(DOCKER_CONFIG));
    }
    // Everything was torn down once the last request finished
    assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
}

#[test]
fn test_import_requires_configured_provider() {
    let host = Host::new(GcraneProvider::new("test"));
    let response = host.import_resource("gcrane_copy", "gcr.io/q/app");
    assert!(response.diagnostics.has_error());
}

#[tokio::test]
#[serial]
async fn test_import_copy() {
    let temp = TempDir::new().unwrap();
    let host = host(Arc::new(RecordingRegistry::default()), &temp).await;

    let response = host.import_resource("gcrane_copy", "gcr.io/q/app");
    let state = response.state.unwrap();
    assert_eq!(state["id"], "gcr.io/q/app");
    assert_eq!(state["destination"], "gcr.io/q/app");
}
