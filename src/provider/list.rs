use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, trace};

use super::{cancellable, ProviderData};
use crate::framework::{
    decode, Attribute, AttributeType, DataSource, NestingMode, RequestContext, Response, Schema,
};
use crate::registry::{ManifestInfo, RegistryError, RepositoryRef, Tags};

/// One manifest of a listed repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageModel {
    pub image_size_bytes: i64,
    pub media_type: String,
    pub time_created_ms: i64,
    pub time_uploaded_ms: i64,
    pub tags: BTreeSet<String>,
}

impl From<&ManifestInfo> for ImageModel {
    fn from(info: &ManifestInfo) -> Self {
        Self {
            image_size_bytes: i64::try_from(info.size).unwrap_or(i64::MAX),
            media_type: info.media_type.clone(),
            time_created_ms: info.created.timestamp_millis(),
            time_uploaded_ms: info.uploaded.timestamp_millis(),
            tags: info.tags.iter().cloned().collect(),
        }
    }
}

/// Everything a listing reports about a repository
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagesModel {
    pub manifests: BTreeMap<String, ImageModel>,
    pub tags: BTreeSet<String>,
    pub children: BTreeSet<String>,
}

impl From<&Tags> for ImagesModel {
    fn from(tags: &Tags) -> Self {
        Self {
            manifests: tags
                .manifests
                .iter()
                .map(|(digest, info)| (digest.clone(), ImageModel::from(info)))
                .collect(),
            tags: tags.tags.iter().cloned().collect(),
            children: tags.children.iter().cloned().collect(),
        }
    }
}

/// State of a `gcrane_list` data source
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDataSourceModel {
    #[serde(default)]
    pub repository: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub images: Vec<ImagesModel>,
}

/// `gcrane_list`: images, tags and child repositories of a repository
pub struct ListDataSource {
    data: Arc<ProviderData>,
}

fn tag_set() -> Attribute {
    Attribute::set_of(AttributeType::String).computed()
}

impl ListDataSource {
    pub fn new(data: Arc<ProviderData>) -> Self {
        Self { data }
    }

    pub fn build(data: Arc<ProviderData>) -> Arc<dyn DataSource> {
        Arc::new(Self::new(data))
    }

    pub fn schema() -> Schema {
        let manifest = BTreeMap::from([
            (
                "image_size_bytes".to_string(),
                Attribute::int64().computed().markdown("Size of the image in bytes"),
            ),
            (
                "media_type".to_string(),
                Attribute::string().computed().markdown("Media type of the manifest"),
            ),
            (
                "time_created_ms".to_string(),
                Attribute::int64()
                    .computed()
                    .markdown("Creation time in milliseconds since the epoch"),
            ),
            (
                "time_uploaded_ms".to_string(),
                Attribute::int64()
                    .computed()
                    .markdown("Upload time in milliseconds since the epoch"),
            ),
            (
                "tags".to_string(),
                tag_set().markdown("Tags pointing at the manifest"),
            ),
        ]);

        let images = BTreeMap::from([
            (
                "manifests".to_string(),
                Attribute::nested(NestingMode::Map, manifest)
                    .computed()
                    .markdown("Manifests keyed by digest"),
            ),
            (
                "tags".to_string(),
                tag_set().markdown("Tags in the repository"),
            ),
            (
                "children".to_string(),
                tag_set().markdown("Nested repositories"),
            ),
        ]);

        Schema::new()
            .description("Lists a repository with gcrane.")
            .markdown("Lists images, tags and child repositories of a repository.")
            .attribute(
                "repository",
                Attribute::string()
                    .optional()
                    .markdown("Repository to list, e.g. `gcr.io/my-project/app`"),
            )
            .attribute(
                "id",
                Attribute::string().computed().markdown("Repository that was listed"),
            )
            .attribute(
                "images",
                Attribute::nested(NestingMode::Set, images)
                    .computed()
                    .markdown("Contents of the repository"),
            )
    }
}

#[async_trait]
impl DataSource for ListDataSource {
    async fn read(&self, ctx: &RequestContext, config: Value) -> Response {
        let mut response = Response::default();
        let Some(mut model) = decode::<ListDataSourceModel>(config, &mut response.diagnostics)
        else {
            return response;
        };

        let name = model.repository.clone().unwrap_or_default();
        let repository = match RepositoryRef::parse(&name) {
            Ok(repository) => repository,
            Err(e) => {
                response.diagnostics.add_error(
                    "Failed to read repository",
                    format!("Failed to read repository {}: {}", name, e),
                );
                return response;
            }
        };

        let Some(guard) = self.data.enter(&mut response.diagnostics) else {
            return response;
        };

        let result: Result<Tags, RegistryError> = async {
            let keychain = guard.keychain()?;
            cancellable(ctx, self.data.registry.list(&keychain, &repository)).await
        }
        .await;

        match result {
            Ok(tags) => {
                trace!(
                    "Listed {}: {} manifests, {} tags, {} children",
                    repository,
                    tags.manifests.len(),
                    tags.tags.len(),
                    tags.children.len()
                );
                model.id = Some(name);
                model.images = vec![ImagesModel::from(&tags)];
            }
            Err(e) => response.diagnostics.add_error(
                "Failed to list repository",
                format!("Failed to list repository {}: {}", name, e),
            ),
        }

        self.data.exit(guard, &mut response.diagnostics);
        if !response.diagnostics.has_error() {
            debug!("Read gcrane_list for {}", repository);
            response.set_state(&model);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::{provider_data, Call, StubRegistry};
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use serial_test::serial;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_list_tags_only() {
        let registry = Arc::new(StubRegistry {
            tags: Tags {
                name: "library/busybox".to_string(),
                tags: vec!["latest".to_string()],
                ..Default::default()
            },
            ..Default::default()
        });
        let data_source = ListDataSource::new(provider_data(registry.clone()));

        let response = data_source
            .read(&RequestContext::new(), json!({"repository": "busybox"}))
            .await;

        assert!(response.diagnostics.is_empty());
        assert_eq!(
            response.state.unwrap(),
            json!({
                "repository": "busybox",
                "id": "busybox",
                "images": [{"manifests": {}, "tags": ["latest"], "children": []}],
            })
        );
        assert_eq!(
            registry.calls(),
            vec![Call::List {
                repository: "docker.io/library/busybox".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_list_manifests_and_children() {
        let mut manifests = BTreeMap::new();
        manifests.insert(
            "sha256:aaa".to_string(),
            ManifestInfo {
                size: 2048,
                media_type: "application/vnd.oci.image.manifest.v1+json".to_string(),
                created: DateTime::<Utc>::from_timestamp_millis(1_700_000_000_000).unwrap(),
                uploaded: DateTime::<Utc>::from_timestamp_millis(1_700_000_005_000).unwrap(),
                tags: vec!["v1".to_string(), "latest".to_string()],
            },
        );
        let registry = Arc::new(StubRegistry {
            tags: Tags {
                name: "p/app".to_string(),
                children: vec!["cache".to_string()],
                manifests,
                tags: vec!["latest".to_string(), "v1".to_string()],
            },
            ..Default::default()
        });
        let data_source = ListDataSource::new(provider_data(registry));

        let response = data_source
            .read(&RequestContext::new(), json!({"repository": "gcr.io/p/app"}))
            .await;
        let state: ListDataSourceModel = serde_json::from_value(response.state.unwrap()).unwrap();

        assert_eq!(state.id.as_deref(), Some("gcr.io/p/app"));
        let images = &state.images[0];
        assert_eq!(images.children, BTreeSet::from(["cache".to_string()]));
        let image = &images.manifests["sha256:aaa"];
        assert_eq!(image.image_size_bytes, 2048);
        assert_eq!(image.time_created_ms, 1_700_000_000_000);
        assert_eq!(image.time_uploaded_ms, 1_700_000_005_000);
        assert_eq!(
            image.tags,
            BTreeSet::from(["latest".to_string(), "v1".to_string()])
        );
    }

    #[tokio::test]
    async fn test_list_invalid_repository() {
        let registry = Arc::new(StubRegistry::default());
        let data_source = ListDataSource::new(provider_data(registry.clone()));

        let response = data_source
            .read(&RequestContext::new(), json!({"repository": "gcr.io/p/app:latest"}))
            .await;

        assert!(response.state.is_none());
        assert_eq!(
            response.diagnostics.errors().next().unwrap().summary,
            "Failed to read repository"
        );
        assert!(registry.calls().is_empty());
    }

    #[tokio::test]
    async fn test_list_registry_failure() {
        let registry = Arc::new(StubRegistry {
            fail_with: Some("NAME_UNKNOWN".to_string()),
            ..Default::default()
        });
        let data_source = ListDataSource::new(provider_data(registry));

        let response = data_source
            .read(&RequestContext::new(), json!({"repository": "gcr.io/p/missing"}))
            .await;

        let error = response.diagnostics.errors().next().unwrap();
        assert_eq!(error.summary, "Failed to list repository");
        assert!(error
            .detail
            .starts_with("Failed to list repository gcr.io/p/missing: "));
    }

    #[test]
    fn test_schema_is_read_only_except_repository() {
        let schema = ListDataSource::schema();
        assert!(schema.get("repository").unwrap().optional);
        assert!(schema.get("id").unwrap().computed);
        assert!(schema.get("images").unwrap().computed);
    }

    #[tokio::test]
    #[serial]
    async fn test_list_ignores_ambient_docker_config() {
        let ambient = TempDir::new().unwrap();
        std::fs::write(ambient.path().join("config.json"), "{not json").unwrap();
        let previous = std::env::var_os("DOCKER_CONFIG");
        std::env::set_var("DOCKER_CONFIG", ambient.path());

        let registry = Arc::new(StubRegistry::default());
        let data_source = ListDataSource::new(provider_data(registry.clone()));
        let response = data_source
            .read(&RequestContext::new(), json!({"repository": "gcr.io/p/app"}))
            .await;

        match previous {
            Some(value) => std::env::set_var("DOCKER_CONFIG", value),
            None => std::env::remove_var("DOCKER_CONFIG"),
        }

        assert!(response.diagnostics.is_empty(), "{:?}", response.diagnostics);
        assert_eq!(registry.calls().len(), 1);
    }
}
