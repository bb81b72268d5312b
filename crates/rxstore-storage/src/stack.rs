//! Data stack
//!
//! Owns the host connection and the registry of attached storages. Every
//! operation that touches SQLite runs on the tokio blocking pool and reports
//! through exactly one callback, invoked after the connection lock has been
//! released so callbacks may read from the stack again.

use std::any::Any;
use std::collections::HashMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tokio::runtime::Handle;

use crate::error::StorageError;
use crate::migrations::{self, SCHEMA_VERSION};
use crate::object::{self, Entity, Object, Target};
use crate::progress::Progress;
use crate::storage::{schema, validate_configuration, LocalStorage, Storage};
use crate::transaction::AsyncTransaction;
use crate::Result;

struct RegisteredStorage {
    store_type: &'static str,
    location: String,
    storage: Box<dyn Any + Send + Sync>,
}

pub struct DataStack {
    conn: Arc<Mutex<Connection>>,
    storages: Arc<RwLock<HashMap<String, RegisteredStorage>>>,
    runtime: Handle,
}

impl DataStack {
    /// Create a stack bound to the current tokio runtime
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| StorageError::NoRuntime)?;
        Self::with_runtime(runtime)
    }

    pub fn with_runtime(runtime: Handle) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            storages: Arc::new(RwLock::new(HashMap::new())),
            runtime,
        })
    }

    /// Attach `storage`, then call `completion` with the registered descriptor
    pub fn add_storage<S, F>(&self, storage: S, completion: F)
    where
        S: Storage,
        F: FnOnce(Result<S>) + Send + 'static,
    {
        let stack = self.clone();
        self.runtime.spawn_blocking(move || {
            let result = catch_panic(|| stack.attach(storage, None));
            completion(result);
        });
    }

    /// Attach a file-backed storage, migrating it if needed
    ///
    /// Returns a tracker when migration steps are pending. It advances once
    /// per applied step; `completion` runs after the last one.
    pub fn add_local_storage<S, F>(&self, storage: S, completion: F) -> Option<Progress>
    where
        S: LocalStorage,
        F: FnOnce(Result<S>) + Send + 'static,
    {
        // The peek reads one page of the file header, so it stays on the
        // caller's thread; the tracker has to exist before this returns.
        let progress = match self.pending_migration_steps(&storage) {
            Ok(0) => None,
            Ok(steps) => Some(Progress::new(steps as u64)),
            Err(e) => {
                // attach() reports the real failure through completion
                tracing::debug!(
                    configuration = %storage.configuration(),
                    error = %e,
                    "Could not inspect storage before attaching"
                );
                None
            }
        };

        let stack = self.clone();
        let tracker = progress.clone();
        self.runtime.spawn_blocking(move || {
            let result = catch_panic(|| stack.attach(storage, tracker.as_ref()));
            completion(result);
        });

        progress
    }

    /// Run `body` in a transaction spanning every attached storage
    ///
    /// Commits when `body` returns `Ok`, rolls back otherwise. Exactly one of
    /// `success` and `failure` is called; a panic in `body` reaches `failure`
    /// as `StorageError::Panicked`.
    pub fn perform<T, B, S, F>(&self, body: B, success: S, failure: F)
    where
        T: Send + 'static,
        B: FnOnce(&mut AsyncTransaction<'_>) -> Result<T> + Send + 'static,
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(StorageError) + Send + 'static,
    {
        let stack = self.clone();
        self.runtime.spawn_blocking(move || match catch_panic(|| stack.run_transaction(body)) {
            Ok(value) => success(value),
            Err(e) => failure(e),
        });
    }

    /// Re-read `object` through the stack's own connection
    ///
    /// `None` if the object was deleted, its storage is not attached, or the
    /// read failed.
    pub fn fetch_existing<E: Entity>(&self, object: &Object<E>) -> Option<Object<E>> {
        if !self.is_attached(object.id().configuration()) {
            return None;
        }

        let conn = self.conn.lock();
        match object::load_object(&conn, object.id()) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(
                    object_id = %object.id(),
                    entity = E::ENTITY_NAME,
                    error = %e,
                    "Failed to re-resolve object"
                );
                None
            }
        }
    }

    /// Re-resolve every object, dropping those that no longer exist
    pub fn fetch_existing_all<E: Entity>(&self, objects: &[Object<E>]) -> Vec<Object<E>> {
        objects
            .iter()
            .filter_map(|object| self.fetch_existing(object))
            .collect()
    }

    pub fn fetch_all<E: Entity>(&self, target: &Target<E>) -> Result<Vec<Object<E>>> {
        self.ensure_attached(target.configuration())?;
        let conn = self.conn.lock();
        object::load_all(&conn, target.configuration())
    }

    pub fn metadata(&self, configuration: &str, key: &str) -> Result<Option<String>> {
        self.ensure_attached(configuration)?;
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                &format!("SELECT value FROM {}.metadata WHERE key = ?1", schema(configuration)),
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Names of the configurations that currently hold a storage
    pub fn configurations(&self) -> Vec<String> {
        let mut names: Vec<String> = self.storages.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn run_transaction<T, B>(&self, body: B) -> Result<T>
    where
        B: FnOnce(&mut AsyncTransaction<'_>) -> Result<T>,
    {
        let configurations = self.configurations();
        let mut conn = self.conn.lock();
        let mut transaction = AsyncTransaction::begin(&mut conn, configurations)?;
        let transaction_id = transaction.id();

        match body(&mut transaction) {
            Ok(value) => {
                transaction.commit()?;
                tracing::debug!(%transaction_id, "Committed transaction");
                Ok(value)
            }
            Err(e) => {
                // dropping the transaction rolls it back
                drop(transaction);
                tracing::debug!(%transaction_id, error = %e, "Rolled back transaction");
                Err(e)
            }
        }
    }

    fn attach<S: Storage>(&self, storage: S, progress: Option<&Progress>) -> Result<S> {
        let configuration = storage.configuration().to_string();
        validate_configuration(&configuration)?;
        let location = storage.location();

        let conn = self.conn.lock();

        if let Some(existing) = self.storages.read().get(&configuration) {
            if existing.store_type == S::STORE_TYPE && existing.location == location {
                if let Some(registered) = existing.storage.downcast_ref::<S>() {
                    tracing::debug!(%configuration, "Storage already added");
                    return Ok(registered.clone());
                }
            }
            return Err(StorageError::DifferentStorageExists {
                configuration,
                existing: format!("{} at {}", existing.store_type, existing.location),
            });
        }

        if let Some(parent) = storage.file_path().and_then(Path::parent) {
            fs::create_dir_all(parent)?;
        }

        attach_database(&conn, &configuration, &location)?;
        if let Err(e) = prepare_schema(&conn, &storage, progress) {
            if let Err(detach_error) = detach_database(&conn, &configuration) {
                tracing::warn!(%configuration, error = %detach_error, "Failed to detach storage");
            }
            return Err(e);
        }

        self.storages.write().insert(
            configuration.clone(),
            RegisteredStorage {
                store_type: S::STORE_TYPE,
                location: location.clone(),
                storage: Box::new(storage.clone()),
            },
        );

        tracing::info!(
            %configuration,
            store_type = S::STORE_TYPE,
            %location,
            "Added storage"
        );

        Ok(storage)
    }

    fn pending_migration_steps<S: LocalStorage>(&self, storage: &S) -> Result<usize> {
        if self.is_attached(storage.configuration()) {
            return Ok(0);
        }

        let Some(path) = storage.file_path() else {
            return Ok(migrations::pending_steps(0));
        };
        if !path.exists() {
            return Ok(migrations::pending_steps(0));
        }

        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        let version = migrations::read_schema_version(&conn, "main")?.unwrap_or(0);
        if version > SCHEMA_VERSION {
            // attach() decides between failing and recreating
            return Ok(0);
        }
        Ok(migrations::pending_steps(version))
    }

    fn is_attached(&self, configuration: &str) -> bool {
        self.storages.read().contains_key(configuration)
    }

    fn ensure_attached(&self, configuration: &str) -> Result<()> {
        if self.is_attached(configuration) {
            Ok(())
        } else {
            Err(StorageError::StorageNotFound(configuration.to_string()))
        }
    }
}

impl Clone for DataStack {
    fn clone(&self) -> Self {
        Self {
            conn: Arc::clone(&self.conn),
            storages: Arc::clone(&self.storages),
            runtime: self.runtime.clone(),
        }
    }
}

/// Run engine work, turning a panic into an error for the callback
fn catch_panic<T>(work: impl FnOnce() -> Result<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(panic = %message, "Engine task panicked");
        Err(StorageError::Panicked(message))
    })
}

fn attach_database(conn: &Connection, configuration: &str, location: &str) -> Result<()> {
    conn.execute(
        &format!("ATTACH DATABASE ?1 AS {}", schema(configuration)),
        [location],
    )?;
    Ok(())
}

fn detach_database(conn: &Connection, configuration: &str) -> Result<()> {
    conn.execute(&format!("DETACH DATABASE {}", schema(configuration)), [])?;
    Ok(())
}

fn prepare_schema<S: Storage>(conn: &Connection, storage: &S, progress: Option<&Progress>) -> Result<()> {
    let configuration = storage.configuration();
    let options = storage.options();
    let mut version = migrations::read_schema_version(conn, configuration)?.unwrap_or(0);

    if version > SCHEMA_VERSION {
        let Some(path) = storage
            .file_path()
            .filter(|_| options.recreate_on_incompatible_model)
        else {
            return Err(StorageError::IncompatibleModel {
                found: version,
                expected: SCHEMA_VERSION,
            });
        };

        tracing::warn!(
            %configuration,
            found = version,
            expected = SCHEMA_VERSION,
            "Recreating storage written by a newer model"
        );
        detach_database(conn, configuration)?;
        remove_store_files(path)?;
        attach_database(conn, configuration, &storage.location())?;
        version = 0;
    }

    let steps = migrations::pending_steps(version);
    if steps > 1 && options.prevent_progressive_migration {
        return Err(StorageError::ProgressiveMigrationRequired { steps });
    }

    if storage.file_path().is_some() {
        let mode: String = conn.query_row(
            &format!("PRAGMA {}.journal_mode = WAL", schema(configuration)),
            [],
            |row| row.get(0),
        )?;
        tracing::debug!(%configuration, journal_mode = %mode, "Configured journal");
    }

    migrations::run_migrations(conn, configuration, |_| {
        if let Some(progress) = progress {
            progress.advance();
        }
    })?;

    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO {}.metadata (key, value, updated_at) VALUES ('store_type', ?1, ?2)",
            schema(configuration)
        ),
        rusqlite::params![S::STORE_TYPE, Utc::now().to_rfc3339()],
    )?;

    Ok(())
}

fn remove_store_files(path: &Path) -> Result<()> {
    for suffix in ["", "-wal", "-shm"] {
        let mut file = path.as_os_str().to_owned();
        file.push(suffix);
        match fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}
