//! rxstore Storage Layer
//!
//! Callback-style data stack over SQLite. Every storage is attached to a
//! single host connection under its configuration name, so one transaction
//! can span all of them. Long-running work runs on the tokio blocking pool
//! and reports back through exactly one completion callback.

mod error;
#[cfg(test)]
mod fixtures;
mod import;
mod migrations;
mod object;
mod progress;
mod stack;
mod storage;
mod transaction;

pub use error::StorageError;
pub use import::{ImportableObject, ImportableUniqueObject};
pub use object::{Entity, Object, ObjectId, Target};
pub use progress::{ListenerId, Progress};
pub use stack::DataStack;
pub use storage::{
    InMemoryStore, LocalStorage, LocalStorageOptions, SqliteStore, Storage, DEFAULT_CONFIGURATION,
};
pub use transaction::AsyncTransaction;

pub type Result<T> = std::result::Result<T, StorageError>;
