//! Stack bootstrap

use futures_util::StreamExt;
use rxstore_reactive::ReactiveDataStack;
use rxstore_storage::{DataStack, SqliteStore, Storage};

use crate::config::Config;
use crate::error::CoreError;
use crate::Result;

/// Create a data stack and attach the configured store file
///
/// Must be called from within a tokio runtime. Resolves once the store is
/// migrated and attached.
pub async fn open(config: &Config) -> Result<(ReactiveDataStack<DataStack>, SqliteStore)> {
    config.validate()?;
    let store = config.sqlite_store()?;
    let stack = ReactiveDataStack::new(DataStack::new()?);

    tracing::info!(
        path = %config.store_path().display(),
        configuration = %store.configuration(),
        "Opening store"
    );

    let mut progress = stack.add_local_storage(store);
    while let Some(snapshot) = progress.next().await {
        let snapshot = snapshot?;
        if snapshot.is_completed() {
            tracing::info!(configuration = %snapshot.storage().configuration(), "Store ready");
            return Ok((stack, snapshot.into_storage()));
        }
        tracing::debug!(progress = snapshot.progress(), "Migrating store");
    }

    Err(CoreError::Config(format!(
        "store {} closed before it was attached",
        config.store_path().display()
    )))
}
