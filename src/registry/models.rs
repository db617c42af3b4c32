use chrono::{DateTime, Utc};
use oci_distribution::manifest::OciDescriptor;
use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, HashMap};

use super::error::RegistryError;

/// Details of one manifest in a repository listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestInfo {
    pub size: u64,
    pub media_type: String,
    pub created: DateTime<Utc>,
    pub uploaded: DateTime<Utc>,
    pub tags: Vec<String>,
}

/// Result of listing a repository
///
/// Plain registries only return `tags`; Google-style registries also report
/// every manifest (tagged or not) and nested child repositories.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    pub name: String,
    pub children: Vec<String>,
    pub manifests: BTreeMap<String, ManifestInfo>,
    pub tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(u64),
}

fn string_or_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<StringOrNumber>::deserialize(deserializer)? {
        None => Ok(0),
        Some(StringOrNumber::Number(n)) => Ok(n),
        Some(StringOrNumber::String(s)) if s.is_empty() => Ok(0),
        Some(StringOrNumber::String(s)) => s.parse().map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifestInfo {
    #[serde(default, deserialize_with = "string_or_number")]
    image_size_bytes: u64,
    #[serde(default)]
    media_type: String,
    #[serde(default, deserialize_with = "string_or_number")]
    time_created_ms: u64,
    #[serde(default, deserialize_with = "string_or_number")]
    time_uploaded_ms: u64,
    #[serde(default, rename = "tag")]
    tags: Option<Vec<String>>,
}

/// Body of `GET /v2/<name>/tags/list`
#[derive(Debug, Deserialize)]
pub(crate) struct RawTags {
    #[serde(default)]
    name: String,
    #[serde(default)]
    tags: Option<Vec<String>>,
    #[serde(default, rename = "manifest")]
    manifests: Option<HashMap<String, RawManifestInfo>>,
    #[serde(default, rename = "child")]
    children: Option<Vec<String>>,
}

fn millis(value: u64, field: &str, digest: &str) -> Result<DateTime<Utc>, RegistryError> {
    i64::try_from(value)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .ok_or_else(|| {
            RegistryError::Registry(format!("{} of {} out of range: {}", field, digest, value))
        })
}

impl TryFrom<RawTags> for Tags {
    type Error = RegistryError;

    fn try_from(raw: RawTags) -> Result<Self, Self::Error> {
        let mut manifests = BTreeMap::new();
        for (digest, info) in raw.manifests.unwrap_or_default() {
            let manifest = ManifestInfo {
                size: info.image_size_bytes,
                media_type: info.media_type,
                created: millis(info.time_created_ms, "timeCreatedMs", &digest)?,
                uploaded: millis(info.time_uploaded_ms, "timeUploadedMs", &digest)?,
                tags: info.tags.unwrap_or_default(),
            };
            manifests.insert(digest, manifest);
        }

        Ok(Tags {
            name: raw.name,
            children: raw.children.unwrap_or_default(),
            manifests,
            tags: raw.tags.unwrap_or_default(),
        })
    }
}

/// Just enough of an image manifest or index to walk its references
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawManifest {
    #[serde(default)]
    pub media_type: Option<String>,
    #[serde(default)]
    pub config: Option<OciDescriptor>,
    #[serde(default)]
    pub layers: Vec<OciDescriptor>,
    #[serde(default)]
    pub manifests: Vec<OciDescriptor>,
}

impl RawManifest {
    pub fn is_index(&self) -> bool {
        !self.manifests.is_empty()
            || matches!(
                self.media_type.as_deref(),
                Some(super::OCI_INDEX_MEDIA_TYPE) | Some(super::DOCKER_MANIFEST_LIST_MEDIA_TYPE)
            )
    }

    /// Media type to push the manifest with
    pub fn content_type(&self) -> &str {
        match self.media_type.as_deref() {
            Some(media_type) => media_type,
            None if self.is_index() => super::OCI_INDEX_MEDIA_TYPE,
            None => super::OCI_MANIFEST_MEDIA_TYPE,
        }
    }

    /// Blobs referenced by an image manifest, config first
    pub fn blobs(&self) -> impl Iterator<Item = &OciDescriptor> {
        self.config.iter().chain(self.layers.iter())
    }
}
