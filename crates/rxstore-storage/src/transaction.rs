//! Asynchronous transactions
//!
//! An `AsyncTransaction` wraps one SQLite transaction on the host
//! connection. It is only handed out by `DataStack::perform`, which commits
//! when the body returns `Ok` and rolls back otherwise.

use std::collections::HashMap;

use rusqlite::Connection;
use uuid::Uuid;

use crate::error::StorageError;
use crate::import::{ImportableObject, ImportableUniqueObject};
use crate::object::{self, Entity, Object, Target};
use crate::Result;

pub struct AsyncTransaction<'conn> {
    tx: rusqlite::Transaction<'conn>,
    id: Uuid,
    configurations: Vec<String>,
}

impl<'conn> AsyncTransaction<'conn> {
    pub(crate) fn begin(conn: &'conn mut Connection, configurations: Vec<String>) -> Result<Self> {
        Ok(Self {
            tx: conn.transaction()?,
            id: Uuid::new_v4(),
            configurations,
        })
    }

    pub(crate) fn commit(self) -> Result<()> {
        self.tx.commit()?;
        Ok(())
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Insert a new, default-initialized object
    pub fn create<E: Entity>(&mut self, target: &Target<E>) -> Result<Object<E>> {
        self.ensure_attached(target.configuration())?;
        object::insert_object(&self.tx, target.configuration(), E::default())
    }

    /// Persist the object's current value
    pub fn save<E: Entity>(&mut self, object: &Object<E>) -> Result<()> {
        self.ensure_attached(object.id().configuration())?;
        if object::update_object(&self.tx, object)? {
            Ok(())
        } else {
            Err(StorageError::Import(format!(
                "{} {} no longer exists",
                E::ENTITY_NAME,
                object.id()
            )))
        }
    }

    /// Returns false when the object was already gone
    pub fn delete<E: Entity>(&mut self, object: &Object<E>) -> Result<bool> {
        self.ensure_attached(object.id().configuration())?;
        object::delete_object(&self.tx, object)
    }

    /// Resolve a handle obtained elsewhere for editing in this transaction
    ///
    /// `None` means the object cannot be edited here (deleted, or its storage
    /// is not attached). Callers usually answer that with `cancel()`.
    pub fn edit<E: Entity>(&mut self, object: &Object<E>) -> Result<Option<Object<E>>> {
        if !self.is_attached(object.id().configuration()) {
            return Ok(None);
        }
        object::load_object(&self.tx, object.id())
    }

    pub fn fetch_existing<E: Entity>(&self, object: &Object<E>) -> Result<Option<Object<E>>> {
        if !self.is_attached(object.id().configuration()) {
            return Ok(None);
        }
        object::load_object(&self.tx, object.id())
    }

    pub fn fetch_all<E: Entity>(&self, target: &Target<E>) -> Result<Vec<Object<E>>> {
        self.ensure_attached(target.configuration())?;
        object::load_all(&self.tx, target.configuration())
    }

    pub fn fetch_unique<E: ImportableUniqueObject>(
        &self,
        target: &Target<E>,
        unique_id: &E::UniqueId,
    ) -> Result<Option<Object<E>>> {
        self.ensure_attached(target.configuration())?;
        object::load_by_unique_id(&self.tx, target.configuration(), &unique_id.to_string())
    }

    /// Abort the transaction
    ///
    /// Return the error from the transaction body; nothing the body wrote is
    /// committed.
    pub fn cancel(&self) -> StorageError {
        tracing::debug!(transaction_id = %self.id, "Transaction cancelled");
        StorageError::UserCancelled
    }

    /// Insert a new object populated from `source`
    ///
    /// `None` when the entity declines the source.
    pub fn import_object<E: ImportableObject>(
        &mut self,
        target: &Target<E>,
        source: &E::ImportSource,
    ) -> Result<Option<Object<E>>> {
        if !E::should_insert(source, self) {
            return Ok(None);
        }

        let mut inserted = self.create(target)?;
        inserted.did_insert(source, self)?;
        self.save(&inserted)?;
        Ok(Some(inserted))
    }

    /// Apply `source` to an object already resolved in this transaction
    pub fn import_into_object<E: ImportableObject>(
        &mut self,
        object: &mut Object<E>,
        source: &E::ImportSource,
    ) -> Result<()> {
        if !E::should_insert(source, self) {
            return Ok(());
        }

        object.did_insert(source, self)?;
        self.save(object)
    }

    /// Update the object matching the source's unique id, or insert one
    pub fn import_unique_object<E: ImportableUniqueObject>(
        &mut self,
        target: &Target<E>,
        source: &E::ImportSource,
    ) -> Result<Option<Object<E>>> {
        self.ensure_attached(target.configuration())?;

        match E::unique_id_from_source(source, self)? {
            Some(unique_id) => self.import_unique(target, unique_id, source),
            None => Ok(None),
        }
    }

    /// Import a batch keyed by unique id
    ///
    /// The keyed batch passes through `pre_process` first; exactly the
    /// mapping it returns is imported. Results follow the first occurrence
    /// of each id in `sources`, then any ids `pre_process` added.
    pub fn import_unique_objects<E, I, P>(
        &mut self,
        target: &Target<E>,
        sources: I,
        pre_process: P,
    ) -> Result<Vec<Object<E>>>
    where
        E: ImportableUniqueObject,
        I: IntoIterator<Item = E::ImportSource>,
        P: FnOnce(
            HashMap<E::UniqueId, E::ImportSource>,
        ) -> Result<HashMap<E::UniqueId, E::ImportSource>>,
    {
        self.ensure_attached(target.configuration())?;

        let mut order = Vec::new();
        let mut mapping = HashMap::new();
        for source in sources {
            let Some(unique_id) = E::unique_id_from_source(&source, self)? else {
                continue;
            };
            if mapping.insert(unique_id.clone(), source).is_none() {
                order.push(unique_id);
            }
        }

        let mut mapping = pre_process(mapping)?;
        let mut batch: Vec<(E::UniqueId, E::ImportSource)> = order
            .into_iter()
            .filter_map(|unique_id| mapping.remove(&unique_id).map(|source| (unique_id, source)))
            .collect();
        batch.extend(mapping);

        let mut objects = Vec::with_capacity(batch.len());
        for (unique_id, source) in batch {
            if let Some(imported) = self.import_unique(target, unique_id, &source)? {
                objects.push(imported);
            }
        }

        tracing::debug!(
            transaction_id = %self.id,
            entity = E::ENTITY_NAME,
            count = objects.len(),
            "Imported unique objects"
        );

        Ok(objects)
    }

    fn import_unique<E: ImportableUniqueObject>(
        &mut self,
        target: &Target<E>,
        unique_id: E::UniqueId,
        source: &E::ImportSource,
    ) -> Result<Option<Object<E>>> {
        let key = unique_id.to_string();

        if let Some(mut existing) =
            object::load_by_unique_id::<E>(&self.tx, target.configuration(), &key)?
        {
            if !E::should_update(source, self) {
                return Ok(None);
            }
            existing.update_from_source(source, self)?;
            self.save(&existing)?;
            return Ok(Some(existing));
        }

        if !E::should_insert(source, self) {
            return Ok(None);
        }

        let mut inserted = self.create(target)?;
        object::set_unique_id(&self.tx, &inserted, &key)?;
        inserted.set_unique_id(unique_id);
        inserted.did_insert_from_source(source, self)?;
        self.save(&inserted)?;
        Ok(Some(inserted))
    }

    fn is_attached(&self, configuration: &str) -> bool {
        self.configurations.iter().any(|c| c == configuration)
    }

    fn ensure_attached(&self, configuration: &str) -> Result<()> {
        if self.is_attached(configuration) {
            Ok(())
        } else {
            Err(StorageError::StorageNotFound(configuration.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{Contact, ContactSource, Note, NoteSource};
    use crate::migrations::run_migrations;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("ATTACH DATABASE ':memory:' AS \"default\"", [])
            .unwrap();
        run_migrations(&conn, "default", |_| {}).unwrap();
        conn
    }

    fn begin(conn: &mut Connection) -> AsyncTransaction<'_> {
        AsyncTransaction::begin(conn, vec!["default".to_string()]).unwrap()
    }

    #[test]
    fn test_import_object() {
        let mut conn = conn();
        let mut tx = begin(&mut conn);
        let target = Target::<Note>::new();

        let note = tx
            .import_object(&target, &NoteSource::new("Groceries", "milk"))
            .unwrap()
            .unwrap();
        assert_eq!(note.title, "Groceries");

        let skipped = NoteSource {
            skip: true,
            ..NoteSource::new("Ignored", "")
        };
        assert!(tx.import_object(&target, &skipped).unwrap().is_none());

        tx.commit().unwrap();
        assert_eq!(object::load_all::<Note>(&conn, "default").unwrap().len(), 1);
    }

    #[test]
    fn test_import_object_requires_attached_configuration() {
        let mut conn = conn();
        let mut tx = begin(&mut conn);

        let result = tx.import_object(
            &Target::<Note>::in_configuration("archive"),
            &NoteSource::new("Groceries", "milk"),
        );
        assert!(matches!(result, Err(StorageError::StorageNotFound(_))));
    }

    #[test]
    fn test_edit_missing_object_is_unresolvable() {
        let mut conn = conn();
        let mut tx = begin(&mut conn);

        let note = tx.create(&Target::<Note>::new()).unwrap();
        assert!(tx.delete(&note).unwrap());

        assert!(tx.edit(&note).unwrap().is_none());
        assert!(tx.cancel().is_cancellation());
    }

    #[test]
    fn test_import_into_object() {
        let mut conn = conn();
        let mut tx = begin(&mut conn);

        let note = tx.create(&Target::<Note>::new()).unwrap();
        let mut editable = tx.edit(&note).unwrap().unwrap();
        tx.import_into_object(&mut editable, &NoteSource::new("Todo", "write tests"))
            .unwrap();

        let reloaded = tx.fetch_existing(&note).unwrap().unwrap();
        assert_eq!(reloaded.title, "Todo");
        assert_eq!(reloaded.body, "write tests");
    }

    #[test]
    fn test_import_unique_object_updates_existing() {
        let mut conn = conn();
        let mut tx = begin(&mut conn);
        let target = Target::<Contact>::new();

        let first = tx
            .import_unique_object(&target, &ContactSource::new("ada@example.com", "Ada"))
            .unwrap()
            .unwrap();
        let second = tx
            .import_unique_object(
                &target,
                &ContactSource::new("ada@example.com", "Ada Lovelace"),
            )
            .unwrap()
            .unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(second.name, "Ada Lovelace");
        assert_eq!(second.revision, 2);
        assert_eq!(tx.fetch_all(&target).unwrap().len(), 1);

        let no_id = ContactSource {
            email: None,
            name: "Anonymous".to_string(),
        };
        assert!(tx.import_unique_object(&target, &no_id).unwrap().is_none());
    }

    #[test]
    fn test_import_unique_objects_with_pre_process() {
        let mut conn = conn();
        let mut tx = begin(&mut conn);
        let target = Target::<Contact>::new();

        let sources = vec![
            ContactSource::new("ada@example.com", "Ada"),
            ContactSource::new("alan@example.com", "Alan"),
            ContactSource::new("grace@example.com", "Grace"),
            ContactSource::new("ada@example.com", "Ada L."),
        ];

        let objects = tx
            .import_unique_objects(&target, sources, |mut mapping| {
                mapping.remove("alan@example.com");
                Ok(mapping)
            })
            .unwrap();

        let emails: Vec<&str> = objects.iter().map(|c| c.email.as_str()).collect();
        assert_eq!(emails, vec!["ada@example.com", "grace@example.com"]);
        assert_eq!(objects[0].name, "Ada L.");
        assert!(tx
            .fetch_unique(&target, &"alan@example.com".to_string())
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_import_unique_objects_pre_process_error() {
        let mut conn = conn();
        let mut tx = begin(&mut conn);

        let result = tx.import_unique_objects(
            &Target::<Contact>::new(),
            vec![ContactSource::new("ada@example.com", "Ada")],
            |_| Err(StorageError::Import("rejected".to_string())),
        );

        assert!(matches!(result, Err(StorageError::Import(_))));
        assert!(tx.fetch_all(&Target::<Contact>::new()).unwrap().is_empty());
    }
}
