//! Store configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use rxstore_storage::{LocalStorageOptions, SqliteStore, DEFAULT_CONFIGURATION};

use crate::error::CoreError;
use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the store file
    pub data_dir: PathBuf,
    /// Store file name inside `data_dir`
    pub file_name: String,
    /// Configuration the store is attached under
    pub configuration: String,
    /// Delete and recreate a store written by a newer model
    pub recreate_on_incompatible_model: bool,
    /// Refuse to apply more than one migration step on open
    pub prevent_progressive_migration: bool,
}

impl Config {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            file_name: "rxstore.sqlite".to_string(),
            configuration: DEFAULT_CONFIGURATION.to_string(),
            recreate_on_incompatible_model: false,
            prevent_progressive_migration: false,
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::data_local_dir()
            .map(|d| d.join("rxstore"))
            .unwrap_or_else(|| PathBuf::from(".rxstore"))
    }

    /// Load a JSON config file; missing fields take their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;

        tracing::debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.file_name.trim().is_empty() {
            return Err(CoreError::Config("file_name must not be empty".to_string()));
        }
        if self.configuration.trim().is_empty() {
            return Err(CoreError::Config(
                "configuration must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        self.data_dir.join(&self.file_name)
    }

    pub fn storage_options(&self) -> LocalStorageOptions {
        LocalStorageOptions {
            recreate_on_incompatible_model: self.recreate_on_incompatible_model,
            prevent_progressive_migration: self.prevent_progressive_migration,
        }
    }

    /// Descriptor for the configured store file
    pub fn sqlite_store(&self) -> Result<SqliteStore> {
        let mut path = self.store_path();
        if path.is_relative() {
            path = std::env::current_dir()?.join(path);
        }

        Ok(SqliteStore::from_path(path)?
            .with_configuration(self.configuration.clone())
            .with_options(self.storage_options()))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(Self::data_dir())
    }
}

mod dirs {
    use std::path::PathBuf;

    pub fn data_local_dir() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            std::env::var("LOCALAPPDATA").ok().map(PathBuf::from)
        }
        #[cfg(target_os = "macos")]
        {
            std::env::var("HOME")
                .ok()
                .map(|h| PathBuf::from(h).join("Library/Application Support"))
        }
        #[cfg(target_os = "linux")]
        {
            std::env::var("XDG_DATA_HOME")
                .ok()
                .map(PathBuf::from)
                .or_else(|| {
                    std::env::var("HOME")
                        .ok()
                        .map(|h| PathBuf::from(h).join(".local/share"))
                })
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        {
            None
        }
    }
}
