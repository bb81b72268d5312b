//! Storage descriptors
//!
//! A storage describes where a configuration's objects live. Descriptors are
//! plain values; the data stack attaches them and hands back the registered
//! descriptor once the storage is usable.

use std::path::{Path, PathBuf};

use url::Url;

use crate::error::StorageError;
use crate::Result;

/// Configuration used when none is named
pub const DEFAULT_CONFIGURATION: &str = "default";

/// Behavior for on-disk stores whose schema does not match this binary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalStorageOptions {
    /// Delete and recreate a store written by a newer schema instead of failing
    pub recreate_on_incompatible_model: bool,
    /// Fail instead of running more than one migration step
    pub prevent_progressive_migration: bool,
}

pub trait Storage: Clone + Send + Sync + 'static {
    /// Short name used in logs and metadata
    const STORE_TYPE: &'static str;

    /// Configuration name the storage is attached under
    fn configuration(&self) -> &str;

    /// Location handed to `ATTACH DATABASE`
    fn location(&self) -> String;

    fn file_path(&self) -> Option<&Path> {
        None
    }

    fn options(&self) -> LocalStorageOptions {
        LocalStorageOptions::default()
    }
}

/// A storage persisted to a local file; attaching it may require migration
pub trait LocalStorage: Storage {
    fn file_url(&self) -> &Url;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InMemoryStore {
    configuration: String,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_configuration(DEFAULT_CONFIGURATION)
    }

    pub fn with_configuration(configuration: impl Into<String>) -> Self {
        Self {
            configuration: configuration.into(),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Storage for InMemoryStore {
    const STORE_TYPE: &'static str = "in-memory";

    fn configuration(&self) -> &str {
        &self.configuration
    }

    fn location(&self) -> String {
        ":memory:".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteStore {
    file_url: Url,
    file_path: PathBuf,
    configuration: String,
    options: LocalStorageOptions,
}

impl SqliteStore {
    pub fn new(file_url: Url) -> Result<Self> {
        let file_path = file_url
            .to_file_path()
            .map_err(|_| StorageError::InvalidStorageUrl(file_url.to_string()))?;

        Ok(Self {
            file_url,
            file_path,
            configuration: DEFAULT_CONFIGURATION.to_string(),
            options: LocalStorageOptions::default(),
        })
    }

    /// Build a store from an absolute file path
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file_url = Url::from_file_path(path)
            .map_err(|_| StorageError::InvalidStorageUrl(path.display().to_string()))?;
        Self::new(file_url)
    }

    pub fn with_configuration(mut self, configuration: impl Into<String>) -> Self {
        self.configuration = configuration.into();
        self
    }

    pub fn with_options(mut self, options: LocalStorageOptions) -> Self {
        self.options = options;
        self
    }
}

impl Storage for SqliteStore {
    const STORE_TYPE: &'static str = "sqlite";

    fn configuration(&self) -> &str {
        &self.configuration
    }

    fn location(&self) -> String {
        self.file_path.to_string_lossy().to_string()
    }

    fn file_path(&self) -> Option<&Path> {
        Some(&self.file_path)
    }

    fn options(&self) -> LocalStorageOptions {
        self.options
    }
}

impl LocalStorage for SqliteStore {
    fn file_url(&self) -> &Url {
        &self.file_url
    }
}

/// Configuration names become SQL schema identifiers, so only a safe subset is accepted
pub(crate) fn validate_configuration(configuration: &str) -> Result<()> {
    let valid = !configuration.is_empty()
        && !configuration.eq_ignore_ascii_case("main")
        && !configuration.eq_ignore_ascii_case("temp")
        && configuration
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidConfiguration(configuration.to_string()))
    }
}

/// Quoted schema identifier for an already validated configuration
pub(crate) fn schema(configuration: &str) -> String {
    format!("\"{}\"", configuration)
}
