use rand::RngCore;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{trace, warn};

use super::error::{KeychainError, ScopeError};
use super::keychain::Keychain;

/// Environment variable the Docker config discovery reads
pub const DOCKER_CONFIG_ENV: &str = "DOCKER_CONFIG";

/// File name of the materialized config inside the temp directory
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Default)]
struct ScopeState {
    active_users: usize,
    config_dir: Option<PathBuf>,
    previous_env: Option<OsString>,
    materializations: u64,
    teardowns: u64,
}

/// Counters describing the lifetime of a scope, mostly useful in tests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeStats {
    pub active_users: usize,
    pub materializations: u64,
    pub teardowns: u64,
}

/// Shared temporary Docker config for all in-flight operations
///
/// The first `enter` writes the configured contents to
/// `<temp>/<random hex>/config.json` and points `DOCKER_CONFIG` at that
/// directory. The last guard to be released removes the directory again and
/// restores the previous `DOCKER_CONFIG` value. Counter updates and the
/// materialize/teardown transitions happen under one lock; guards keep their
/// own copy of the path so readers never take it.
///
/// A scope without contents still counts users but never touches disk or
/// the environment. Its guards fall back to the ambient Docker config unless
/// the scope was built with [`CredentialScope::anonymous`].
#[derive(Debug)]
pub struct CredentialScope {
    contents: Option<String>,
    temp_root: Option<PathBuf>,
    ambient_fallback: bool,
    state: Mutex<ScopeState>,
}

impl CredentialScope {
    pub fn new(contents: Option<String>, temp_root: Option<PathBuf>) -> Self {
        Self {
            contents: contents.filter(|c| !c.is_empty()),
            temp_root,
            ambient_fallback: true,
            state: Mutex::new(ScopeState::default()),
        }
    }

    /// Scope that never materializes anything
    pub fn empty() -> Self {
        Self::new(None, None)
    }

    /// Scope whose guards always hand out an anonymous keychain
    pub fn anonymous() -> Self {
        Self {
            ambient_fallback: false,
            ..Self::empty()
        }
    }

    pub fn has_contents(&self) -> bool {
        self.contents.is_some()
    }

    fn lock(&self) -> MutexGuard<'_, ScopeState> {
        // The state is plain counters, a panic elsewhere cannot leave it torn
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn stats(&self) -> ScopeStats {
        let state = self.lock();
        ScopeStats {
            active_users: state.active_users,
            materializations: state.materializations,
            teardowns: state.teardowns,
        }
    }

    pub fn active_users(&self) -> usize {
        self.lock().active_users
    }

    /// Directory of the materialized config, if any user currently holds it
    pub fn config_dir(&self) -> Option<PathBuf> {
        self.lock().config_dir.clone()
    }

    /// Register a user, materializing the config file on the 0 → 1 transition
    ///
    /// On error the user count is left untouched and the caller must not
    /// proceed with the operation.
    pub fn enter(self: &Arc<Self>) -> Result<ScopeGuard, ScopeError> {
        let mut state = self.lock();

        if state.active_users == 0 && state.config_dir.is_none() {
            if let Some(contents) = &self.contents {
                let dir = self.materialize(contents)?;

                state.previous_env = env::var_os(DOCKER_CONFIG_ENV);
                env::set_var(DOCKER_CONFIG_ENV, &dir);
                state.config_dir = Some(dir);
                state.materializations += 1;
            }
        }

        state.active_users += 1;
        trace!("Credential scope entered ({} active)", state.active_users);

        Ok(ScopeGuard {
            scope: Arc::clone(self),
            config_dir: state.config_dir.clone(),
            released: false,
        })
    }

    fn exit(&self) -> Result<(), ScopeError> {
        let mut state = self.lock();

        state.active_users = state.active_users.saturating_sub(1);
        trace!("Credential scope exited ({} active)", state.active_users);
        if state.active_users > 0 {
            return Ok(());
        }

        let Some(dir) = state.config_dir.take() else {
            return Ok(());
        };

        match state.previous_env.take() {
            Some(value) => env::set_var(DOCKER_CONFIG_ENV, value),
            None => env::remove_var(DOCKER_CONFIG_ENV),
        }
        state.teardowns += 1;

        // The path is forgotten even if removal fails, the next user gets a fresh one
        fs::remove_dir_all(&dir).map_err(|source| ScopeError::Remove {
            path: dir.clone(),
            source,
        })?;

        trace!("Temporary Docker config removed: {}", dir.display());
        Ok(())
    }

    fn materialize(&self, contents: &str) -> Result<PathBuf, ScopeError> {
        let mut random_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut random_bytes);

        let root = self.temp_root.clone().unwrap_or_else(env::temp_dir);
        let dir = root.join(hex::encode(random_bytes));

        create_private_dir(&dir).map_err(|source| ScopeError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        let file = dir.join(CONFIG_FILE_NAME);
        if let Err(source) = write_private_file(&file, contents) {
            // Do not leave a half-built directory behind
            let _ = fs::remove_dir_all(&dir);
            return Err(ScopeError::WriteFile { path: file, source });
        }

        trace!("Temporary Docker config created: {}", file.display());
        Ok(dir)
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    fs::DirBuilder::new().mode(0o700).create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    fs::DirBuilder::new().create(dir)
}

fn write_private_file(path: &Path, contents: &str) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()
}

/// One user's hold on a [`CredentialScope`]
///
/// Call [`ScopeGuard::release`] to observe cleanup errors. A guard dropped
/// without release still exits the scope and logs any failure.
#[derive(Debug)]
#[must_use = "dropping the guard immediately releases the credential scope"]
pub struct ScopeGuard {
    scope: Arc<CredentialScope>,
    config_dir: Option<PathBuf>,
    released: bool,
}

impl ScopeGuard {
    pub fn config_dir(&self) -> Option<&Path> {
        self.config_dir.as_deref()
    }

    /// Keychain for the registry client
    ///
    /// Uses the materialized config when there is one, otherwise falls back
    /// to the ambient Docker config discovery.
    pub fn keychain(&self) -> Result<Keychain, KeychainError> {
        match &self.config_dir {
            Some(dir) => Keychain::load_dir(dir),
            None if self.scope.ambient_fallback => Keychain::discover(),
            None => Ok(Keychain::anonymous()),
        }
    }

    pub fn release(mut self) -> Result<(), ScopeError> {
        self.released = true;
        self.scope.exit()
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.scope.exit() {
            warn!("Failed to clean up credential scope: {}", e);
        }
    }
}
