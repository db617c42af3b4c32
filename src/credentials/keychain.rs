use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::error::KeychainError;
use super::scope::{CONFIG_FILE_NAME, DOCKER_CONFIG_ENV};

/// Canonical host for Docker Hub, as the Docker CLI stores it
const DOCKER_HUB_HOST: &str = "index.docker.io";
const DOCKER_HUB_AUTH_KEY: &str = "https://index.docker.io/v1/";

/// Credentials resolved for a single registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Anonymous,
    Basic { username: String, password: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthEntry {
    /// base64("username:password")
    #[serde(default)]
    pub auth: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default, rename = "identitytoken")]
    pub identity_token: Option<String>,
}

/// The parts of a Docker `config.json` that carry registry credentials
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DockerConfig {
    #[serde(default)]
    pub auths: HashMap<String, AuthEntry>,
    #[serde(default, rename = "credHelpers")]
    pub cred_helpers: HashMap<String, String>,
    #[serde(default, rename = "credsStore")]
    pub creds_store: Option<String>,
}

impl DockerConfig {
    pub fn parse(contents: &str) -> Result<Self, KeychainError> {
        Ok(serde_json::from_str(contents)?)
    }
}

#[derive(Debug, Deserialize)]
struct HelperResponse {
    #[serde(rename = "Username")]
    username: String,
    #[serde(rename = "Secret")]
    secret: String,
}

/// Normalize a registry host or Docker config key to a comparable host name
///
/// Strips scheme and path, and folds the Docker Hub aliases together.
pub fn normalize_host(key: &str) -> String {
    let host = key
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .split('/')
        .next()
        .unwrap_or(key);

    match host {
        "docker.io" | "index.docker.io" | "registry-1.docker.io" => DOCKER_HUB_HOST.to_string(),
        other => other.to_string(),
    }
}

/// Selects credentials by registry host name from a Docker config
#[derive(Debug, Clone, Default)]
pub struct Keychain {
    config: DockerConfig,
    source: Option<PathBuf>,
}

impl Keychain {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn from_config(config: DockerConfig) -> Self {
        Self {
            config,
            source: None,
        }
    }

    /// Load `<dir>/config.json`; a missing file yields an anonymous keychain
    pub fn load_dir(dir: &Path) -> Result<Self, KeychainError> {
        let path = dir.join(CONFIG_FILE_NAME);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No Docker config at {}", path.display());
                return Ok(Self::anonymous());
            }
            Err(source) => return Err(KeychainError::Read { path, source }),
        };

        Ok(Self {
            config: DockerConfig::parse(&contents)?,
            source: Some(path),
        })
    }

    /// Locate the Docker config the same way the Docker CLI does
    ///
    /// `$DOCKER_CONFIG/config.json` first, then `~/.docker/config.json`.
    pub fn discover() -> Result<Self, KeychainError> {
        if let Some(dir) = env::var_os(DOCKER_CONFIG_ENV).filter(|v| !v.is_empty()) {
            return Self::load_dir(Path::new(&dir));
        }
        match dirs::home_dir() {
            Some(home) => Self::load_dir(&home.join(".docker")),
            None => Ok(Self::anonymous()),
        }
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Directory holding the config file this keychain was loaded from
    fn config_dir(&self) -> Option<&Path> {
        self.source.as_deref().and_then(Path::parent)
    }

    /// Resolve credentials for `registry`
    ///
    /// Order: per-registry credential helper, inline `auths` entry, default
    /// credential store, anonymous.
    pub async fn resolve(&self, registry: &str) -> Result<Credential, KeychainError> {
        let host = normalize_host(registry);

        if let Some((_, helper)) = self
            .config
            .cred_helpers
            .iter()
            .find(|(key, _)| normalize_host(key) == host)
        {
            return run_helper(helper, &host, self.config_dir()).await;
        }

        if let Some((key, entry)) = self
            .config
            .auths
            .iter()
            .find(|(key, _)| normalize_host(key) == host)
        {
            if let Some(credential) = decode_entry(key, entry)? {
                return Ok(credential);
            }
        }

        if let Some(store) = &self.config.creds_store {
            return run_helper(store, &host, self.config_dir()).await;
        }

        Ok(Credential::Anonymous)
    }
}

fn decode_entry(key: &str, entry: &AuthEntry) -> Result<Option<Credential>, KeychainError> {
    if let Some(auth) = entry.auth.as_deref().filter(|a| !a.is_empty()) {
        let invalid = |reason: String| KeychainError::InvalidAuth {
            registry: key.to_string(),
            reason,
        };

        let decoded = STANDARD
            .decode(auth)
            .map_err(|e| invalid(format!("auth is not base64: {}", e)))?;
        let decoded =
            String::from_utf8(decoded).map_err(|_| invalid("auth is not UTF-8".to_string()))?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| invalid("auth must be username:password".to_string()))?;

        return Ok(Some(Credential::Basic {
            username: username.to_string(),
            password: password.to_string(),
        }));
    }

    if let (Some(username), Some(password)) = (&entry.username, &entry.password) {
        return Ok(Some(Credential::Basic {
            username: username.clone(),
            password: password.clone(),
        }));
    }

    if entry.identity_token.is_some() {
        debug!("Ignoring identity token for {}, token exchange is not supported", key);
    }

    Ok(None)
}

/// Ask `docker-credential-<helper>` for the credentials of `host`
///
/// The helper sees `DOCKER_CONFIG` pointing at `config_dir` when the keychain
/// was loaded from disk, independent of the process environment.
async fn run_helper(
    helper: &str,
    host: &str,
    config_dir: Option<&Path>,
) -> Result<Credential, KeychainError> {
    let program = format!("docker-credential-{}", helper);
    let server_url = if host == DOCKER_HUB_HOST {
        DOCKER_HUB_AUTH_KEY
    } else {
        host
    };
    let failed = |reason: String| KeychainError::Helper {
        helper: helper.to_string(),
        reason,
    };

    debug!("Executing: {} get ({})", program, server_url);

    let mut command = Command::new(&program);
    command
        .arg("get")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = config_dir {
        command.env(DOCKER_CONFIG_ENV, dir);
    }

    let mut child = command.spawn().map_err(|e| failed(e.to_string()))?;
    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(server_url.as_bytes())
            .await
            .map_err(|e| failed(e.to_string()))?;
    }
    let output = child
        .wait_with_output()
        .await
        .map_err(|e| failed(e.to_string()))?;

    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.contains("credentials not found") {
            return Ok(Credential::Anonymous);
        }
        return Err(failed(format!(
            "exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    let response: HelperResponse =
        serde_json::from_slice(&output.stdout).map_err(|e| failed(e.to_string()))?;

    Ok(Credential::Basic {
        username: response.username,
        password: response.secret,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn basic(username: &str, password: &str) -> Credential {
        Credential::Basic {
            username: username.to_string(),
            password: password.to_string(),
        }
    }

    #[test]
    fn test_normalize_host() {
        assert_eq!(normalize_host("https://index.docker.io/v1/"), "index.docker.io");
        assert_eq!(normalize_host("docker.io"), "index.docker.io");
        assert_eq!(normalize_host("registry-1.docker.io"), "index.docker.io");
        assert_eq!(normalize_host("http://localhost:5000"), "localhost:5000");
        assert_eq!(normalize_host("gcr.io/my-project"), "gcr.io");
    }

    #[tokio::test]
    async fn test_resolve_inline_auth() {
        let config = DockerConfig::parse(
            r#"{"auths": {
                "https://index.docker.io/v1/": {"auth": "aHViOnNlY3JldA=="},
                "gcr.io": {"username": "_json_key", "password": "{}"}
            }}"#,
        )
        .unwrap();
        let keychain = Keychain::from_config(config);

        assert_eq!(keychain.resolve("docker.io").await.unwrap(), basic("hub", "secret"));
        assert_eq!(keychain.resolve("gcr.io").await.unwrap(), basic("_json_key", "{}"));
        assert_eq!(
            keychain.resolve("quay.io").await.unwrap(),
            Credential::Anonymous
        );
    }

    #[tokio::test]
    async fn test_password_may_contain_colons() {
        // base64("user:pa:ss")
        let config =
            DockerConfig::parse(r#"{"auths": {"r.example": {"auth": "dXNlcjpwYTpzcw=="}}}"#)
                .unwrap();
        let keychain = Keychain::from_config(config);
        assert_eq!(keychain.resolve("r.example").await.unwrap(), basic("user", "pa:ss"));
    }

    #[tokio::test]
    async fn test_invalid_auth_entry() {
        let config =
            DockerConfig::parse(r#"{"auths": {"r.example": {"auth": "bm9jb2xvbg=="}}}"#).unwrap();
        let err = Keychain::from_config(config).resolve("r.example").await.unwrap_err();
        assert!(matches!(err, KeychainError::InvalidAuth { .. }));
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(matches!(
            DockerConfig::parse("{not json"),
            Err(KeychainError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_helper_reports_error() {
        let config = DockerConfig::parse(
            r#"{"credHelpers": {"r.example": "definitely-not-installed-helper"}}"#,
        )
        .unwrap();
        let err = Keychain::from_config(config).resolve("r.example").await.unwrap_err();
        assert!(matches!(err, KeychainError::Helper { .. }));
    }

    #[tokio::test]
    async fn test_load_dir_without_config_is_anonymous() {
        let temp = TempDir::new().unwrap();
        let keychain = Keychain::load_dir(temp.path()).unwrap();
        assert!(keychain.source().is_none());
        assert_eq!(keychain.resolve("gcr.io").await.unwrap(), Credential::Anonymous);
    }

    #[tokio::test]
    #[serial]
    async fn test_discover_follows_docker_config_env() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(CONFIG_FILE_NAME),
            r#"{"auths": {"ghcr.io": {"auth": "Z2g6dG9rZW4="}}}"#,
        )
        .unwrap();

        env::set_var(DOCKER_CONFIG_ENV, temp.path());
        let keychain = Keychain::discover();
        env::remove_var(DOCKER_CONFIG_ENV);

        let keychain = keychain.unwrap();
        assert_eq!(keychain.source(), Some(temp.path().join(CONFIG_FILE_NAME).as_path()));
        assert_eq!(keychain.resolve("ghcr.io").await.unwrap(), basic("gh", "token"));
    }

    /// Install `docker-credential-<name>` scripts and put them first on PATH
    #[cfg(unix)]
    fn install_helpers(bin: &Path, helpers: &[(&str, &str)]) -> Option<std::ffi::OsString> {
        use std::os::unix::fs::PermissionsExt;

        for (name, script) in helpers {
            let path = bin.join(format!("docker-credential-{}", name));
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", script)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let previous = env::var_os("PATH");
        let mut paths = vec![bin.to_path_buf()];
        if let Some(previous) = &previous {
            paths.extend(env::split_paths(previous));
        }
        env::set_var("PATH", env::join_paths(paths).unwrap());
        previous
    }

    #[cfg(unix)]
    fn restore_path(previous: Option<std::ffi::OsString>) {
        match previous {
            Some(value) => env::set_var("PATH", value),
            None => env::remove_var("PATH"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_helper_sees_keychain_config_dir() {
        let bin = TempDir::new().unwrap();
        let config_dir = TempDir::new().unwrap();
        std::fs::write(
            config_dir.path().join(CONFIG_FILE_NAME),
            r#"{"credHelpers": {"r.example": "envecho"}}"#,
        )
        .unwrap();

        let previous_path = install_helpers(
            bin.path(),
            &[(
                "envecho",
                r#"read server; printf '{"Username":"%s","Secret":"%s"}' "$DOCKER_CONFIG" "$server""#,
            )],
        );
        let previous_config = env::var_os(DOCKER_CONFIG_ENV);
        env::set_var(DOCKER_CONFIG_ENV, bin.path());

        let result = match Keychain::load_dir(config_dir.path()) {
            Ok(keychain) => keychain.resolve("r.example").await,
            Err(e) => Err(e),
        };

        match previous_config {
            Some(value) => env::set_var(DOCKER_CONFIG_ENV, value),
            None => env::remove_var(DOCKER_CONFIG_ENV),
        }
        restore_path(previous_path);

        assert_eq!(
            result.unwrap(),
            basic(&config_dir.path().to_string_lossy(), "r.example")
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    #[serial]
    async fn test_slow_helper_does_not_stall_runtime() {
        let bin = TempDir::new().unwrap();
        let previous_path = install_helpers(
            bin.path(),
            &[(
                "slow",
                r#"sleep 0.5; printf '{"Username":"u","Secret":"s"}'"#,
            )],
        );

        let keychain = Keychain::from_config(
            DockerConfig::parse(r#"{"credsStore": "slow"}"#).unwrap(),
        );
        let (resolved, ticked) = tokio::join!(
            async {
                let result = keychain.resolve("r.example").await;
                (result, std::time::Instant::now())
            },
            async {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                std::time::Instant::now()
            }
        );
        restore_path(previous_path);

        let (result, finished) = resolved;
        assert_eq!(result.unwrap(), basic("u", "s"));
        // The single-threaded runtime kept running other tasks while the helper ran
        assert!(ticked < finished);
    }
}
