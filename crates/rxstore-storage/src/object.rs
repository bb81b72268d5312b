//! Persisted objects
//!
//! Entities are serde values stored as JSON payloads in their
//! configuration's `objects` table. An `Object<E>` pairs a value with the
//! identity it was loaded under; handles are detached snapshots, so a handle
//! produced inside a transaction must be re-resolved against the stack
//! before it can be trusted outside of it.

use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::storage::{schema, DEFAULT_CONFIGURATION};
use crate::Result;

pub trait Entity: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    /// Name stored alongside every object of this entity
    const ENTITY_NAME: &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectId {
    configuration: String,
    row: i64,
}

impl ObjectId {
    pub fn configuration(&self) -> &str {
        &self.configuration
    }

    pub fn row(&self) -> i64 {
        self.row
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.configuration, self.row)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Object<E> {
    id: ObjectId,
    value: E,
}

impl<E> Object<E> {
    pub fn id(&self) -> &ObjectId {
        &self.id
    }

    pub fn into_inner(self) -> E {
        self.value
    }
}

impl<E> Deref for Object<E> {
    type Target = E;

    fn deref(&self) -> &E {
        &self.value
    }
}

impl<E> DerefMut for Object<E> {
    fn deref_mut(&mut self) -> &mut E {
        &mut self.value
    }
}

/// Entity and configuration that new objects are inserted into
pub struct Target<E> {
    configuration: String,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Target<E> {
    pub fn new() -> Self {
        Self::in_configuration(DEFAULT_CONFIGURATION)
    }

    pub fn in_configuration(configuration: impl Into<String>) -> Self {
        Self {
            configuration: configuration.into(),
            _entity: PhantomData,
        }
    }

    pub fn configuration(&self) -> &str {
        &self.configuration
    }
}

impl<E: Entity> Default for Target<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for Target<E> {
    fn clone(&self) -> Self {
        Self {
            configuration: self.configuration.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> fmt::Debug for Target<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("entity", &E::ENTITY_NAME)
            .field("configuration", &self.configuration)
            .finish()
    }
}

// Row helpers shared by transactions and the stack's read path. Callers
// check that the configuration is attached before building SQL with it.

pub(crate) fn insert_object<E: Entity>(
    conn: &Connection,
    configuration: &str,
    value: E,
) -> Result<Object<E>> {
    let payload = serde_json::to_string(&value)?;
    let now = Utc::now().to_rfc3339();

    conn.execute(
        &format!(
            "INSERT INTO {}.objects (entity, payload, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            schema(configuration)
        ),
        rusqlite::params![E::ENTITY_NAME, payload, now],
    )?;

    Ok(Object {
        id: ObjectId {
            configuration: configuration.to_string(),
            row: conn.last_insert_rowid(),
        },
        value,
    })
}

/// Write the payload back, returns false when the row no longer exists
pub(crate) fn update_object<E: Entity>(conn: &Connection, object: &Object<E>) -> Result<bool> {
    let payload = serde_json::to_string(&object.value)?;
    let updated = conn.execute(
        &format!(
            "UPDATE {}.objects SET payload = ?1, updated_at = ?2 WHERE id = ?3 AND entity = ?4",
            schema(&object.id.configuration)
        ),
        rusqlite::params![
            payload,
            Utc::now().to_rfc3339(),
            object.id.row,
            E::ENTITY_NAME
        ],
    )?;
    Ok(updated > 0)
}

pub(crate) fn set_unique_id<E: Entity>(
    conn: &Connection,
    object: &Object<E>,
    unique_id: &str,
) -> Result<()> {
    conn.execute(
        &format!(
            "UPDATE {}.objects SET unique_id = ?1 WHERE id = ?2 AND entity = ?3",
            schema(&object.id.configuration)
        ),
        rusqlite::params![unique_id, object.id.row, E::ENTITY_NAME],
    )?;
    Ok(())
}

pub(crate) fn delete_object<E: Entity>(conn: &Connection, object: &Object<E>) -> Result<bool> {
    let deleted = conn.execute(
        &format!(
            "DELETE FROM {}.objects WHERE id = ?1 AND entity = ?2",
            schema(&object.id.configuration)
        ),
        rusqlite::params![object.id.row, E::ENTITY_NAME],
    )?;
    Ok(deleted > 0)
}

pub(crate) fn load_object<E: Entity>(conn: &Connection, id: &ObjectId) -> Result<Option<Object<E>>> {
    let payload: Option<String> = conn
        .query_row(
            &format!(
                "SELECT payload FROM {}.objects WHERE id = ?1 AND entity = ?2",
                schema(&id.configuration)
            ),
            rusqlite::params![id.row, E::ENTITY_NAME],
            |row| row.get(0),
        )
        .optional()?;

    payload
        .map(|payload| -> Result<Object<E>> {
            Ok(Object {
                id: id.clone(),
                value: serde_json::from_str(&payload)?,
            })
        })
        .transpose()
}

pub(crate) fn load_by_unique_id<E: Entity>(
    conn: &Connection,
    configuration: &str,
    unique_id: &str,
) -> Result<Option<Object<E>>> {
    let row: Option<(i64, String)> = conn
        .query_row(
            &format!(
                "SELECT id, payload FROM {}.objects WHERE entity = ?1 AND unique_id = ?2",
                schema(configuration)
            ),
            rusqlite::params![E::ENTITY_NAME, unique_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    row.map(|(id, payload)| -> Result<Object<E>> {
        Ok(Object {
            id: ObjectId {
                configuration: configuration.to_string(),
                row: id,
            },
            value: serde_json::from_str(&payload)?,
        })
    })
    .transpose()
}

pub(crate) fn load_all<E: Entity>(conn: &Connection, configuration: &str) -> Result<Vec<Object<E>>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id, payload FROM {}.objects WHERE entity = ?1 ORDER BY id",
        schema(configuration)
    ))?;

    let rows: Vec<(i64, String)> = stmt
        .query_map([E::ENTITY_NAME], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<std::result::Result<_, _>>()?;

    rows.into_iter()
        .map(|(id, payload)| -> Result<Object<E>> {
            Ok(Object {
                id: ObjectId {
                    configuration: configuration.to_string(),
                    row: id,
                },
                value: serde_json::from_str(&payload)?,
            })
        })
        .collect()
}
