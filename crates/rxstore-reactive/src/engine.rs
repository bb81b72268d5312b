//! The callback interface the adapter consumes

use rxstore_storage::{
    AsyncTransaction, DataStack, Entity, LocalStorage, Object, Progress, Result, Storage,
    StorageError,
};

/// A persistence engine reporting results through one-shot callbacks
///
/// Implementations must invoke exactly one completion callback per call.
pub trait Engine: Clone + Send + Sync + 'static {
    fn add_storage<S, F>(&self, storage: S, completion: F)
    where
        S: Storage,
        F: FnOnce(Result<S>) + Send + 'static;

    fn add_local_storage<S, F>(&self, storage: S, completion: F) -> Option<Progress>
    where
        S: LocalStorage,
        F: FnOnce(Result<S>) + Send + 'static;

    fn perform<T, B, S, F>(&self, body: B, success: S, failure: F)
    where
        T: Send + 'static,
        B: FnOnce(&mut AsyncTransaction<'_>) -> Result<T> + Send + 'static,
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(StorageError) + Send + 'static;

    /// Re-resolve an object against the engine's live context
    fn fetch_existing<E: Entity>(&self, object: &Object<E>) -> Option<Object<E>>;

    fn fetch_existing_all<E: Entity>(&self, objects: &[Object<E>]) -> Vec<Object<E>> {
        objects
            .iter()
            .filter_map(|object| self.fetch_existing(object))
            .collect()
    }
}

impl Engine for DataStack {
    fn add_storage<S, F>(&self, storage: S, completion: F)
    where
        S: Storage,
        F: FnOnce(Result<S>) + Send + 'static,
    {
        DataStack::add_storage(self, storage, completion)
    }

    fn add_local_storage<S, F>(&self, storage: S, completion: F) -> Option<Progress>
    where
        S: LocalStorage,
        F: FnOnce(Result<S>) + Send + 'static,
    {
        DataStack::add_local_storage(self, storage, completion)
    }

    fn perform<T, B, S, F>(&self, body: B, success: S, failure: F)
    where
        T: Send + 'static,
        B: FnOnce(&mut AsyncTransaction<'_>) -> Result<T> + Send + 'static,
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(StorageError) + Send + 'static,
    {
        DataStack::perform(self, body, success, failure)
    }

    fn fetch_existing<E: Entity>(&self, object: &Object<E>) -> Option<Object<E>> {
        DataStack::fetch_existing(self, object)
    }

    fn fetch_existing_all<E: Entity>(&self, objects: &[Object<E>]) -> Vec<Object<E>> {
        DataStack::fetch_existing_all(self, objects)
    }
}
