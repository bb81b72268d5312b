//! Test engine and entities

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rxstore_storage::{
    AsyncTransaction, DataStack, Entity, ImportableObject, ImportableUniqueObject, LocalStorage,
    Object, Progress, Result, Storage, StorageError,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::engine::Engine;

type Completion<S> = Box<dyn FnOnce(Result<S>) + Send>;

/// Engine whose storage callbacks are fired by the test
///
/// Transactions and re-resolution go to a real in-memory stack.
#[derive(Clone)]
pub(crate) struct ScriptedEngine {
    stack: DataStack,
    pending: Arc<Mutex<Vec<Box<dyn Any + Send>>>>,
    tracker: Arc<Mutex<Option<Progress>>>,
    started: Arc<Notify>,
}

impl ScriptedEngine {
    pub(crate) fn new(stack: DataStack) -> Self {
        Self {
            stack,
            pending: Arc::new(Mutex::new(Vec::new())),
            tracker: Arc::new(Mutex::new(None)),
            started: Arc::new(Notify::new()),
        }
    }

    /// Hand out a tracker from the next `add_local_storage` calls
    pub(crate) fn report_progress(&self, total_units: u64) -> Progress {
        let progress = Progress::new(total_units);
        *self.tracker.lock() = Some(progress.clone());
        progress
    }

    pub(crate) async fn wait_started(&self) {
        self.started.notified().await;
    }

    /// Fire the oldest pending storage callback
    ///
    /// Returns false, leaving the queue untouched, when nothing is pending or
    /// the oldest callback expects a different storage type.
    pub(crate) fn complete<S: Storage>(&self, result: Result<S>) -> bool {
        let next = {
            let mut pending = self.pending.lock();
            match pending.first() {
                Some(next) if next.is::<Completion<S>>() => pending.remove(0),
                _ => return false,
            }
        };

        match next.downcast::<Completion<S>>() {
            Ok(completion) => {
                (*completion)(result);
                true
            }
            Err(_) => false,
        }
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    fn enqueue<S: Storage, F>(&self, completion: F)
    where
        F: FnOnce(Result<S>) + Send + 'static,
    {
        let completion: Completion<S> = Box::new(completion);
        self.pending.lock().push(Box::new(completion));
        self.started.notify_one();
    }
}

impl Engine for ScriptedEngine {
    fn add_storage<S, F>(&self, _storage: S, completion: F)
    where
        S: Storage,
        F: FnOnce(Result<S>) + Send + 'static,
    {
        self.enqueue(completion);
    }

    fn add_local_storage<S, F>(&self, _storage: S, completion: F) -> Option<Progress>
    where
        S: LocalStorage,
        F: FnOnce(Result<S>) + Send + 'static,
    {
        let tracker = self.tracker.lock().clone();
        self.enqueue(completion);
        tracker
    }

    fn perform<T, B, S, F>(&self, body: B, success: S, failure: F)
    where
        T: Send + 'static,
        B: FnOnce(&mut AsyncTransaction<'_>) -> Result<T> + Send + 'static,
        S: FnOnce(T) + Send + 'static,
        F: FnOnce(StorageError) + Send + 'static,
    {
        self.stack.perform(body, success, failure);
    }

    fn fetch_existing<E: Entity>(&self, object: &Object<E>) -> Option<Object<E>> {
        self.stack.fetch_existing(object)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Person {
    pub name: String,
    pub imports: u32,
}

impl Entity for Person {
    const ENTITY_NAME: &'static str = "Person";
}

#[derive(Debug, Clone, Default)]
pub(crate) struct PersonSource {
    pub name: String,
    pub skip: bool,
    pub calls: Arc<AtomicUsize>,
}

impl PersonSource {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ImportableObject for Person {
    type ImportSource = PersonSource;

    fn should_insert(source: &PersonSource, _transaction: &AsyncTransaction<'_>) -> bool {
        !source.skip
    }

    fn did_insert(&mut self, source: &PersonSource, _transaction: &mut AsyncTransaction<'_>) -> Result<()> {
        source.calls.fetch_add(1, Ordering::SeqCst);
        if source.name.is_empty() {
            return Err(StorageError::Import("person without a name".to_string()));
        }
        self.name = source.name.clone();
        self.imports += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct Tag {
    pub slug: String,
    pub label: String,
}

impl Entity for Tag {
    const ENTITY_NAME: &'static str = "Tag";
}

#[derive(Debug, Clone)]
pub(crate) struct TagSource {
    pub slug: String,
    pub label: String,
}

impl TagSource {
    pub(crate) fn new(slug: &str, label: &str) -> Self {
        Self {
            slug: slug.to_string(),
            label: label.to_string(),
        }
    }
}

impl ImportableUniqueObject for Tag {
    type ImportSource = TagSource;
    type UniqueId = String;

    fn unique_id_from_source(
        source: &TagSource,
        _transaction: &AsyncTransaction<'_>,
    ) -> Result<Option<String>> {
        Ok(Some(source.slug.clone()).filter(|slug| !slug.is_empty()))
    }

    fn set_unique_id(&mut self, unique_id: String) {
        self.slug = unique_id;
    }

    fn update_from_source(
        &mut self,
        source: &TagSource,
        _transaction: &mut AsyncTransaction<'_>,
    ) -> Result<()> {
        self.label = source.label.clone();
        Ok(())
    }
}
