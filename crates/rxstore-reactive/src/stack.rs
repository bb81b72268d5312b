//! Reactive data stack
//!
//! Republishes every engine operation as a cold observable. Nothing starts
//! until the returned observable is polled; each engine callback becomes
//! either a value followed by completion, or a single error.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rxstore_storage::{
    AsyncTransaction, ImportableObject, ImportableUniqueObject, LocalStorage, Object, Result,
    Storage, Target,
};

use crate::engine::Engine;
use crate::observable::{Disposable, Observable};
use crate::progress::StorageProgress;

/// Keyed batch handed to the pre-processing step of a unique import
pub type UniqueMapping<T> =
    HashMap<<T as ImportableUniqueObject>::UniqueId, <T as ImportableUniqueObject>::ImportSource>;

pub struct ReactiveDataStack<E: Engine> {
    engine: E,
}

impl<E: Engine> ReactiveDataStack<E> {
    pub fn new(engine: E) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Emits the registered storage, then completes
    pub fn add_storage<S: Storage>(&self, storage: S) -> Observable<S> {
        let engine = self.engine.clone();

        Observable::create(move |observer| {
            tracing::debug!(
                configuration = %storage.configuration(),
                store_type = S::STORE_TYPE,
                "Adding storage"
            );
            engine.add_storage(storage, move |result| match result {
                Ok(storage) => {
                    observer.on_next(storage);
                    observer.on_completed();
                }
                Err(e) => observer.on_error(e),
            });
            Disposable::empty()
        })
    }

    /// Emits a snapshot per tracker change, then a completed snapshot
    pub fn add_local_storage<S: LocalStorage>(&self, storage: S) -> Observable<StorageProgress<S>> {
        let engine = self.engine.clone();

        Observable::create(move |observer| {
            tracing::debug!(
                configuration = %storage.configuration(),
                file_url = %storage.file_url(),
                "Adding local storage"
            );

            // The tracker only exists once the engine call returns
            let tracker_slot = Arc::new(Mutex::new(None));
            let completion_tracker = Arc::clone(&tracker_slot);
            let completion = observer.clone();

            let tracker = engine.add_local_storage(storage.clone(), move |result| match result {
                Ok(storage) => {
                    let tracker = completion_tracker.lock().clone();
                    completion.on_next(StorageProgress::new(storage, tracker, true));
                    completion.on_completed();
                }
                Err(e) => completion.on_error(e),
            });

            let Some(tracker) = tracker else {
                return Disposable::empty();
            };
            *tracker_slot.lock() = Some(tracker.clone());

            let reported = tracker.clone();
            let listener = tracker.observe(move |fraction| {
                observer.on_next(StorageProgress::reported(
                    storage.clone(),
                    reported.clone(),
                    fraction,
                ));
            });

            Disposable::new(move || tracker.remove_observer(listener))
        })
    }

    /// Emits the imported object re-resolved against the engine
    pub fn import_object<T: ImportableObject>(
        &self,
        target: Target<T>,
        source: T::ImportSource,
    ) -> Observable<Option<Object<T>>> {
        self.perform_and_resolve(
            move |transaction| transaction.import_object(&target, &source),
            |engine, imported| imported.and_then(|object| engine.fetch_existing(&object)),
        )
    }

    /// Applies `source` to an existing object
    ///
    /// Fails with `StorageError::UserCancelled`, before anything is written,
    /// when the object cannot be resolved for editing.
    pub fn import_object_into<T: ImportableObject>(
        &self,
        object: Object<T>,
        source: T::ImportSource,
    ) -> Observable<Option<Object<T>>> {
        self.perform_and_resolve(
            move |transaction| {
                let Some(mut editable) = transaction.edit(&object)? else {
                    return Err(transaction.cancel());
                };
                transaction.import_into_object(&mut editable, &source)?;
                Ok(editable)
            },
            |engine, imported| engine.fetch_existing(&imported),
        )
    }

    pub fn import_unique_object<T: ImportableUniqueObject>(
        &self,
        target: Target<T>,
        source: T::ImportSource,
    ) -> Observable<Option<Object<T>>> {
        self.perform_and_resolve(
            move |transaction| transaction.import_unique_object(&target, &source),
            |engine, imported| imported.and_then(|object| engine.fetch_existing(&object)),
        )
    }

    pub fn import_unique_objects<T, I>(&self, target: Target<T>, sources: I) -> Observable<Vec<Object<T>>>
    where
        T: ImportableUniqueObject,
        I: IntoIterator<Item = T::ImportSource>,
    {
        self.import_unique_objects_with(target, sources, Ok)
    }

    /// Like `import_unique_objects`, with a step that may filter or rewrite the keyed batch
    pub fn import_unique_objects_with<T, I, P>(
        &self,
        target: Target<T>,
        sources: I,
        pre_process: P,
    ) -> Observable<Vec<Object<T>>>
    where
        T: ImportableUniqueObject,
        I: IntoIterator<Item = T::ImportSource>,
        P: FnOnce(UniqueMapping<T>) -> Result<UniqueMapping<T>> + Send + 'static,
    {
        let sources: Vec<T::ImportSource> = sources.into_iter().collect();

        self.perform_and_resolve(
            move |transaction| transaction.import_unique_objects(&target, sources, pre_process),
            |engine, imported| engine.fetch_existing_all(&imported),
        )
    }

    /// Emits whatever `body` returns
    pub fn perform<T, B>(&self, body: B) -> Observable<T>
    where
        T: Send + 'static,
        B: FnOnce(&mut AsyncTransaction<'_>) -> Result<T> + Send + 'static,
    {
        self.perform_and_resolve(body, |_, value| value)
    }

    fn perform_and_resolve<T, R, B, M>(&self, body: B, resolve: M) -> Observable<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        B: FnOnce(&mut AsyncTransaction<'_>) -> Result<T> + Send + 'static,
        M: FnOnce(&E, T) -> R + Send + 'static,
    {
        let engine = self.engine.clone();

        Observable::create(move |observer| {
            let on_success = observer.clone();
            let resolver = engine.clone();

            engine.perform(
                body,
                move |value| {
                    on_success.on_next(resolve(&resolver, value));
                    on_success.on_completed();
                },
                move |e| {
                    tracing::debug!(error = %e, "Transaction failed");
                    observer.on_error(e);
                },
            );
            Disposable::empty()
        })
    }
}

impl<E: Engine> Clone for ReactiveDataStack<E> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}
