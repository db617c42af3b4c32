use oci_distribution::Reference;
use std::fmt;
use std::net::IpAddr;

use super::error::RegistryError;

/// Parse an image reference, applying Docker Hub defaults
pub fn parse_image(image: &str) -> Result<Reference, RegistryError> {
    Reference::try_from(image.trim())
        .map_err(|e| RegistryError::InvalidReference(format!("{}: {}", image, e)))
}

/// Whether the reference names an explicit tag or digest
///
/// Only the last path component can carry a tag; a colon earlier on is a
/// registry port (`localhost:5000/app`).
pub fn has_explicit_version(image: &str) -> bool {
    image.contains('@') || image.rsplit('/').next().is_some_and(|c| c.contains(':'))
}

/// Destination reference for a single-image copy
///
/// A destination without tag or digest inherits the source tag, or the
/// source digest when the source was pinned by digest only.
pub fn resolve_destination(source: &Reference, destination: &str) -> Result<Reference, RegistryError> {
    let parsed = parse_image(destination)?;
    if has_explicit_version(destination) {
        return Ok(parsed);
    }

    let registry = parsed.registry().to_string();
    let repository = parsed.repository().to_string();
    Ok(match (source.tag(), source.digest()) {
        (Some(tag), _) => Reference::with_tag(registry, repository, tag.to_string()),
        (None, Some(digest)) => Reference::with_digest(registry, repository, digest.to_string()),
        (None, None) => parsed,
    })
}

/// Whether `registry` is served over plain HTTP
///
/// Matches the hosts Docker and gcrane treat as local: `localhost`, `*.local`,
/// loopback addresses and RFC 1918 IPv4 ranges, with or without a port.
pub fn is_insecure_registry(registry: &str) -> bool {
    if let Ok(ip) = registry.parse::<IpAddr>() {
        return is_local_ip(ip);
    }

    let host = match registry.strip_prefix('[') {
        Some(rest) => rest.split_once(']').map_or(rest, |(host, _)| host),
        None => registry.rsplit_once(':').map_or(registry, |(host, _)| host),
    };

    host == "localhost"
        || host.ends_with(".localhost")
        || host.ends_with(".local")
        || host.parse::<IpAddr>().is_ok_and(is_local_ip)
}

fn is_local_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(ip) => ip.is_loopback() || ip.is_private(),
        IpAddr::V6(ip) => ip.is_loopback(),
    }
}

/// A repository at a registry, without tag or digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    registry: String,
    repository: String,
}

impl RepositoryRef {
    pub fn parse(name: &str) -> Result<Self, RegistryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::InvalidReference(
                "repository name is empty".to_string(),
            ));
        }
        if has_explicit_version(name) {
            return Err(RegistryError::InvalidReference(format!(
                "{}: a repository must not include a tag or digest",
                name
            )));
        }

        let reference = parse_image(name)?;
        Ok(Self {
            registry: reference.registry().to_string(),
            repository: reference.repository().to_string(),
        })
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Registry host the API is served from
    pub fn resolve_registry(&self) -> &str {
        match self.registry.as_str() {
            "docker.io" => "index.docker.io",
            other => other,
        }
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tagged(&self, tag: &str) -> Reference {
        Reference::with_tag(
            self.registry.clone(),
            self.repository.clone(),
            tag.to_string(),
        )
    }

    pub fn digested(&self, digest: &str) -> Reference {
        Reference::with_digest(
            self.registry.clone(),
            self.repository.clone(),
            digest.to_string(),
        )
    }

    /// Nested repository `<self>/<name>`
    pub fn child(&self, name: &str) -> Self {
        Self {
            registry: self.registry.clone(),
            repository: format!("{}/{}", self.repository, name),
        }
    }
}

impl fmt::Display for RepositoryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.registry, self.repository)
    }
}
