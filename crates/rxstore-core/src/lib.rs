//! rxstore Core
//!
//! Configuration, logging and bootstrap for applications that drive the data
//! stack through observable streams.

mod config;
mod error;
mod open;

pub use config::Config;
pub use error::CoreError;
pub use open::open;

// Re-export the storage and reactive layers
pub use rxstore_reactive::{
    Disposable, Engine, Event, Observable, Observer, ReactiveDataStack, StorageProgress,
    StorageProgressStreamExt, Subscription, UniqueMapping,
};
pub use rxstore_storage::{
    AsyncTransaction, DataStack, Entity, ImportableObject, ImportableUniqueObject, InMemoryStore,
    LocalStorage, LocalStorageOptions, Object, ObjectId, Progress, SqliteStore, Storage,
    StorageError, Target, DEFAULT_CONFIGURATION,
};

pub type Result<T> = std::result::Result<T, CoreError>;

/// Initialize logging
pub fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    fmt().with_env_filter(filter).with_target(true).init();
}
