//! Storage error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration name: {0}")]
    InvalidConfiguration(String),

    #[error("Invalid storage URL: {0}")]
    InvalidStorageUrl(String),

    #[error("No storage added for configuration: {0}")]
    StorageNotFound(String),

    #[error("Configuration {configuration} already holds a different storage: {existing}")]
    DifferentStorageExists {
        configuration: String,
        existing: String,
    },

    #[error("Incompatible model: storage is at version {found}, latest known is {expected}")]
    IncompatibleModel { found: i32, expected: i32 },

    #[error("Progressive migration required: {steps} steps pending")]
    ProgressiveMigrationRequired { steps: usize },

    #[error("Transaction cancelled")]
    UserCancelled,

    #[error("Import error: {0}")]
    Import(String),

    #[error("No tokio runtime available")]
    NoRuntime,

    #[error("Engine task panicked: {0}")]
    Panicked(String),

    #[error("Operation ended without a result")]
    Interrupted,
}

impl StorageError {
    /// Whether the error came from `AsyncTransaction::cancel`
    pub fn is_cancellation(&self) -> bool {
        matches!(self, StorageError::UserCancelled)
    }
}
