//! Configuration for the context store.
//!
//! Values resolve in three layers: built-in defaults, then an optional
//! `config.toml` inside the data directory, then `MEMORY_KEEPER_*`
//! environment variables.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::BackendKind;
use crate::error::{ContextError, Result, StorageError};

/// Name of the optional configuration file inside the data directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Data directory used when nothing else is configured, relative to the
/// working directory.
pub const DEFAULT_DATA_DIR: &str = ".memory-keeper";

pub const DEFAULT_MAX_SESSIONS: usize = 100;
pub const DEFAULT_MAX_ITEMS_PER_SESSION: usize = 10_000;

pub const ENV_DATA_DIR: &str = "MEMORY_KEEPER_DIR";
pub const ENV_BACKEND: &str = "MEMORY_KEEPER_BACKEND";
pub const ENV_MAX_SESSIONS: &str = "MEMORY_KEEPER_MAX_SESSIONS";
pub const ENV_MAX_ITEMS: &str = "MEMORY_KEEPER_MAX_ITEMS";
pub const ENV_PROJECT: &str = "MEMORY_KEEPER_PROJECT";

/// Configuration for the context store and engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// Directory holding all persisted state.
    pub data_dir: PathBuf,

    /// Which storage backend to open.
    pub backend: BackendKind,

    /// Retention cap on the number of sessions.
    pub max_sessions: usize,

    /// Retention cap on the number of items in one session.
    pub max_items_per_session: usize,

    /// Project label used to name auto-created sessions.
    pub project_name: String,
}

/// Optional overrides read from `config.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigFile {
    backend: Option<BackendKind>,
    max_sessions: Option<usize>,
    max_items_per_session: Option<usize>,
    project_name: Option<String>,
}

impl KeeperConfig {
    /// Create a new configuration with default values.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            backend: BackendKind::default(),
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_items_per_session: DEFAULT_MAX_ITEMS_PER_SESSION,
            project_name: default_project_name(),
        }
    }

    /// Set the storage backend.
    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    /// Set the session retention cap.
    pub fn with_max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    /// Set the per-session item retention cap.
    pub fn with_max_items_per_session(mut self, max_items: usize) -> Self {
        self.max_items_per_session = max_items;
        self
    }

    /// Set the project label.
    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = name.into();
        self
    }

    /// Resolve the full configuration from the process environment.
    ///
    /// The data directory comes from `MEMORY_KEEPER_DIR`, falling back to
    /// `.memory-keeper` under the working directory.
    pub fn from_env() -> Result<Self> {
        let data_dir = match std::env::var_os(ENV_DATA_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => std::env::current_dir()?.join(DEFAULT_DATA_DIR),
        };
        Self::load(data_dir)
    }

    /// Resolve the configuration for an explicit data directory, applying the
    /// config file and environment overrides.
    pub fn load(data_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::load_with(data_dir, |name| std::env::var(name).ok())
    }

    /// Like [`KeeperConfig::load`], reading variables through `lookup`.
    pub fn load_with(
        data_dir: impl Into<PathBuf>,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let mut config = Self::new(data_dir);
        config.apply_file()?;
        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge `config.toml` from the data directory, if present.
    fn apply_file(&mut self) -> Result<()> {
        let path = self.data_dir.join(CONFIG_FILE_NAME);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(StorageError::ReadFile(format!("{}: {e}", path.display())).into());
            }
        };
        let file: ConfigFile = toml::from_str(&text).map_err(|e| {
            ContextError::validation(format!("invalid {}: {e}", path.display()))
        })?;
        debug!("Loaded configuration from {}", path.display());

        if let Some(backend) = file.backend {
            self.backend = backend;
        }
        if let Some(max_sessions) = file.max_sessions {
            self.max_sessions = max_sessions;
        }
        if let Some(max_items) = file.max_items_per_session {
            self.max_items_per_session = max_items;
        }
        if let Some(project_name) = file.project_name {
            self.project_name = project_name;
        }
        Ok(())
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(backend) = lookup(ENV_BACKEND) {
            self.backend = backend.parse()?;
        }
        if let Some(value) = lookup(ENV_MAX_SESSIONS) {
            self.max_sessions = parse_count(ENV_MAX_SESSIONS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_ITEMS) {
            self.max_items_per_session = parse_count(ENV_MAX_ITEMS, &value)?;
        }
        if let Some(project_name) = lookup(ENV_PROJECT).filter(|p| !p.trim().is_empty()) {
            self.project_name = project_name;
        }
        Ok(())
    }

    /// Reject retention caps of zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(ContextError::validation("max_sessions must be at least 1"));
        }
        if self.max_items_per_session == 0 {
            return Err(ContextError::validation(
                "max_items_per_session must be at least 1",
            ));
        }
        Ok(())
    }

    /// Directory receiving exports.
    pub fn exports_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }

    /// Directory receiving checkpoints.
    pub fn checkpoints_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }
}

fn parse_count(name: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| ContextError::validation(format!("{name} must be a number, got '{value}'")))
}

fn default_project_name() -> String {
    std::env::current_dir()
        .ok()
        .as_deref()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = KeeperConfig::new("/tmp/keeper");
        assert_eq!(config.backend, BackendKind::Json);
        assert_eq!(config.max_sessions, 100);
        assert_eq!(config.max_items_per_session, 10_000);
        assert_eq!(config.exports_dir(), PathBuf::from("/tmp/keeper/exports"));
        assert!(!config.project_name.is_empty());
    }

    #[test]
    fn test_file_then_env_layering() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(CONFIG_FILE_NAME),
            "backend = \"sqlite\"\nmax_sessions = 5\nproject_name = \"casino\"\n",
        )
        .unwrap();

        let config = KeeperConfig::load_with(temp_dir.path(), no_env).unwrap();
        assert_eq!(config.backend, BackendKind::Sqlite);
        assert_eq!(config.max_sessions, 5);
        assert_eq!(config.project_name, "casino");

        let env: HashMap<&str, &str> = [(ENV_BACKEND, "json"), (ENV_MAX_ITEMS, "20")].into();
        let config = KeeperConfig::load_with(temp_dir.path(), |name| {
            env.get(name).map(|v| v.to_string())
        })
        .unwrap();
        assert_eq!(config.backend, BackendKind::Json);
        assert_eq!(config.max_sessions, 5);
        assert_eq!(config.max_items_per_session, 20);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let zero = KeeperConfig::load_with(temp_dir.path(), |name| {
            (name == ENV_MAX_SESSIONS).then(|| "0".to_string())
        });
        assert!(matches!(zero, Err(ContextError::Validation(_))));

        let garbage = KeeperConfig::load_with(temp_dir.path(), |name| {
            (name == ENV_MAX_ITEMS).then(|| "lots".to_string())
        });
        assert!(matches!(garbage, Err(ContextError::Validation(_))));

        std::fs::write(temp_dir.path().join(CONFIG_FILE_NAME), "max_sessions = \"x\"").unwrap();
        assert!(matches!(
            KeeperConfig::load_with(temp_dir.path(), no_env),
            Err(ContextError::Validation(_))
        ));
    }
}
