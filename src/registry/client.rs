use async_trait::async_trait;
use futures::future::BoxFuture;
use oci_distribution::{
    client::{ClientConfig, ClientProtocol},
    manifest::OciDescriptor,
    secrets::RegistryAuth,
    Client, Reference, RegistryOperation,
};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use std::str::FromStr;
use tracing::{debug, info};

use super::error::RegistryError;
use super::models::{RawManifest, RawTags, Tags};
use super::reference::{is_insecure_registry, parse_image, resolve_destination, RepositoryRef};
use super::MANIFEST_MEDIA_TYPES;
use crate::credentials::{Credential, Keychain};

const USER_AGENT: &str = concat!("terraform-provider-gcrane/", env!("CARGO_PKG_VERSION"));

/// Largest blob copied; blobs are buffered in memory for digest verification
pub const MAX_BLOB_SIZE: i64 = 10 * 1024 * 1024 * 1024;

/// Upper bound on the up-front buffer allocation for one blob
const MAX_BLOB_PREALLOCATION: usize = 64 * 1024 * 1024;

/// Registry operations the provider relies on
///
/// Every call takes the keychain to authenticate with, so credentials flow
/// explicitly from the caller's credential scope.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Copy one image or index from `source` to `destination`
    async fn copy(
        &self,
        keychain: &Keychain,
        source: &str,
        destination: &str,
    ) -> Result<(), RegistryError>;

    /// Copy every manifest of a repository, including nested repositories
    async fn copy_repository(
        &self,
        keychain: &Keychain,
        source: &str,
        destination: &str,
    ) -> Result<(), RegistryError>;

    /// List tags, manifests and child repositories of `repository`
    async fn list(
        &self,
        keychain: &Keychain,
        repository: &RepositoryRef,
    ) -> Result<Tags, RegistryError>;
}

/// [`RegistryClient`] backed by the OCI distribution API
///
/// Local registries (see [`is_insecure_registry`]) are spoken to over plain
/// HTTP, everything else over HTTPS.
pub struct OciRegistry {
    secure: Client,
    plain: Client,
    http: reqwest::Client,
}

async fn registry_auth(keychain: &Keychain, registry: &str) -> Result<RegistryAuth, RegistryError> {
    Ok(match keychain.resolve(registry).await? {
        Credential::Anonymous => RegistryAuth::Anonymous,
        Credential::Basic { username, password } => RegistryAuth::Basic(username, password),
    })
}

/// Parse a header value for whichever `http` version the client is built on
fn header_value<T>(value: &str) -> Result<T, RegistryError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| RegistryError::Registry(format!("Invalid media type {}: {}", value, e)))
}

fn verify_digest(expected: &str, data: &[u8]) -> Result<(), RegistryError> {
    let Some(expected_hex) = expected.strip_prefix("sha256:") else {
        // Other algorithms are verified by the registry on push
        return Ok(());
    };

    let actual = hex::encode(Sha256::digest(data));
    if actual != expected_hex {
        return Err(RegistryError::DigestMismatch {
            expected: expected.to_string(),
            actual: format!("sha256:{}", actual),
        });
    }
    Ok(())
}

/// Buffer for a blob, rejecting sizes outside `0..=MAX_BLOB_SIZE`
fn blob_buffer(blob: &OciDescriptor) -> Result<Vec<u8>, RegistryError> {
    if !(0..=MAX_BLOB_SIZE).contains(&blob.size) {
        return Err(RegistryError::BlobTooLarge {
            digest: blob.digest.clone(),
            size: blob.size,
            limit: MAX_BLOB_SIZE,
        });
    }
    let size = usize::try_from(blob.size).unwrap_or(MAX_BLOB_PREALLOCATION);
    Ok(Vec::with_capacity(size.min(MAX_BLOB_PREALLOCATION)))
}

fn scheme_for(registry: &str) -> &'static str {
    if is_insecure_registry(registry) {
        "http"
    } else {
        "https"
    }
}

/// Manifests of one repository level to copy, as (source, destination) pairs
///
/// Tagged manifests are copied once per tag, untagged ones by digest. A
/// registry without the manifest listing only yields its tags.
fn manifest_copies(
    tags: &Tags,
    source: &RepositoryRef,
    destination: &RepositoryRef,
) -> Vec<(Reference, Reference)> {
    let mut copies = Vec::new();
    if tags.manifests.is_empty() {
        for tag in &tags.tags {
            copies.push((source.tagged(tag), destination.tagged(tag)));
        }
        return copies;
    }

    for (digest, manifest) in &tags.manifests {
        if manifest.tags.is_empty() {
            copies.push((source.digested(digest), destination.digested(digest)));
        }
        for tag in &manifest.tags {
            copies.push((source.tagged(tag), destination.tagged(tag)));
        }
    }
    copies
}

impl OciRegistry {
    pub fn new() -> Result<Self, RegistryError> {
        let secure = Client::new(ClientConfig::default());
        let plain = Client::new(ClientConfig {
            protocol: ClientProtocol::Http,
            ..Default::default()
        });
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            secure,
            plain,
            http,
        })
    }

    /// Client speaking the right protocol for the registry of `reference`
    fn client_for(&self, reference: &Reference) -> &Client {
        if is_insecure_registry(reference.resolve_registry()) {
            &self.plain
        } else {
            &self.secure
        }
    }

    /// Authenticate for pushing to `destination`; the token is cached by the client
    async fn authorize_push(
        &self,
        keychain: &Keychain,
        destination: &Reference,
    ) -> Result<(), RegistryError> {
        let auth = registry_auth(keychain, destination.resolve_registry()).await?;
        self.client_for(destination)
            .auth(destination, &auth, RegistryOperation::Push)
            .await
            .map_err(|e| RegistryError::classify(e, &destination.whole()))?;
        Ok(())
    }

    fn copy_manifest<'a>(
        &'a self,
        source: &'a Reference,
        auth: &'a RegistryAuth,
        destination: &'a Reference,
    ) -> BoxFuture<'a, Result<(), RegistryError>> {
        Box::pin(async move {
            let (body, digest) = self
                .client_for(source)
                .pull_manifest_raw(source, auth, MANIFEST_MEDIA_TYPES)
                .await
                .map_err(|e| RegistryError::classify(e, &source.whole()))?;
            debug!("Pulled manifest {} ({})", source.whole(), digest);

            let manifest: RawManifest = serde_json::from_slice(&body).map_err(|e| {
                RegistryError::Registry(format!("Invalid manifest {}: {}", source.whole(), e))
            })?;

            if manifest.is_index() {
                // Children have to exist at the destination before the index
                for child in &manifest.manifests {
                    let child_source = Reference::with_digest(
                        source.registry().to_string(),
                        source.repository().to_string(),
                        child.digest.clone(),
                    );
                    let child_destination = Reference::with_digest(
                        destination.registry().to_string(),
                        destination.repository().to_string(),
                        child.digest.clone(),
                    );
                    self.copy_manifest(&child_source, auth, &child_destination)
                        .await?;
                }
            } else {
                for blob in manifest.blobs() {
                    self.copy_blob(source, destination, blob).await?;
                }
            }

            let content_type = manifest.content_type().to_string();
            self.client_for(destination)
                .push_manifest_raw(destination, body, header_value(&content_type)?)
                .await
                .map_err(|e| RegistryError::classify(e, &destination.whole()))?;

            debug!("Pushed manifest {} ({})", destination.whole(), content_type);
            Ok(())
        })
    }

    async fn copy_blob(
        &self,
        source: &Reference,
        destination: &Reference,
        blob: &OciDescriptor,
    ) -> Result<(), RegistryError> {
        let mut data = blob_buffer(blob)?;
        self.client_for(source)
            .pull_blob(source, blob, &mut data)
            .await
            .map_err(|e| RegistryError::classify(e, &blob.digest))?;

        verify_digest(&blob.digest, &data)?;

        self.client_for(destination)
            .push_blob(destination, &data, &blob.digest)
            .await
            .map_err(|e| RegistryError::classify(e, &blob.digest))?;

        debug!("Copied blob {} ({} bytes)", blob.digest, data.len());
        Ok(())
    }

    async fn fetch_tags(
        &self,
        repository: &RepositoryRef,
        auth: &RegistryAuth,
    ) -> Result<Tags, RegistryError> {
        // Any tag will do, the token is scoped to the repository
        let reference = repository.tagged("latest");
        let token = self
            .client_for(&reference)
            .auth(&reference, auth, RegistryOperation::Pull)
            .await
            .map_err(|e| RegistryError::classify(e, &repository.to_string()))?;

        let url = format!(
            "{}://{}/v2/{}/tags/list",
            scheme_for(repository.resolve_registry()),
            repository.resolve_registry(),
            repository.repository()
        );
        debug!("Listing {}", url);

        let request = self.http.get(&url);
        let request = match (token, auth) {
            (Some(token), _) => request.bearer_auth(token),
            (None, RegistryAuth::Basic(username, password)) => {
                request.basic_auth(username, Some(password))
            }
            (None, _) => request,
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let target = format!("{}: {} {}", repository, status, body.trim());
            return Err(match status {
                StatusCode::NOT_FOUND => RegistryError::NotFound(target),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    RegistryError::Unauthorized(target)
                }
                _ => RegistryError::Registry(target),
            });
        }

        let raw: RawTags = response.json().await?;
        Tags::try_from(raw)
    }
}

#[async_trait]
impl RegistryClient for OciRegistry {
    async fn copy(
        &self,
        keychain: &Keychain,
        source: &str,
        destination: &str,
    ) -> Result<(), RegistryError> {
        let source = parse_image(source)?;
        let destination = resolve_destination(&source, destination)?;
        let source_auth = registry_auth(keychain, source.resolve_registry()).await?;

        self.authorize_push(keychain, &destination).await?;
        self.copy_manifest(&source, &source_auth, &destination)
            .await?;

        info!("Copied {} to {}", source.whole(), destination.whole());
        Ok(())
    }

    async fn copy_repository(
        &self,
        keychain: &Keychain,
        source: &str,
        destination: &str,
    ) -> Result<(), RegistryError> {
        let source_repo = RepositoryRef::parse(source)?;
        let destination_repo = RepositoryRef::parse(destination)?;
        let source_auth = registry_auth(keychain, source_repo.resolve_registry()).await?;

        let tags = self.fetch_tags(&source_repo, &source_auth).await?;
        if tags.manifests.is_empty() && tags.tags.is_empty() && tags.children.is_empty() {
            return Err(RegistryError::NotFound(format!(
                "{}: repository has no images",
                source_repo
            )));
        }

        let copies = manifest_copies(&tags, &source_repo, &destination_repo);

        if let Some((_, first)) = copies.first() {
            self.authorize_push(keychain, first).await?;
        }
        for (from, to) in &copies {
            self.copy_manifest(from, &source_auth, to).await?;
        }
        info!(
            "Copied {} manifests from {} to {}",
            copies.len(),
            source_repo,
            destination_repo
        );

        for child in &tags.children {
            let child_source = source_repo.child(child).to_string();
            let child_destination = destination_repo.child(child).to_string();
            self.copy_repository(keychain, &child_source, &child_destination)
                .await?;
        }

        Ok(())
    }

    async fn list(
        &self,
        keychain: &Keychain,
        repository: &RepositoryRef,
    ) -> Result<Tags, RegistryError> {
        let auth = registry_auth(keychain, repository.resolve_registry()).await?;
        self.fetch_tags(repository, &auth).await
    }
}
