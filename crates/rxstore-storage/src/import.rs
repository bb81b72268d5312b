//! Import contracts
//!
//! Entities opt into transaction-level import by describing how a source
//! value is applied to a (new or existing) instance. The transaction owns
//! the insert/update decisions and persistence; implementors only mutate
//! `self`.

use std::fmt::Display;
use std::hash::Hash;

use crate::object::Entity;
use crate::transaction::AsyncTransaction;
use crate::Result;

pub trait ImportableObject: Entity {
    type ImportSource: Send + 'static;

    /// Return false to skip the source entirely
    fn should_insert(_source: &Self::ImportSource, _transaction: &AsyncTransaction<'_>) -> bool {
        true
    }

    fn did_insert(
        &mut self,
        source: &Self::ImportSource,
        transaction: &mut AsyncTransaction<'_>,
    ) -> Result<()>;
}

/// An entity deduplicated by an identifier derived from its import source
pub trait ImportableUniqueObject: Entity {
    type ImportSource: Send + 'static;
    type UniqueId: Clone + Eq + Hash + Display + Send + 'static;

    /// `None` skips the source
    fn unique_id_from_source(
        source: &Self::ImportSource,
        transaction: &AsyncTransaction<'_>,
    ) -> Result<Option<Self::UniqueId>>;

    fn set_unique_id(&mut self, unique_id: Self::UniqueId);

    fn should_insert(_source: &Self::ImportSource, _transaction: &AsyncTransaction<'_>) -> bool {
        true
    }

    fn should_update(_source: &Self::ImportSource, _transaction: &AsyncTransaction<'_>) -> bool {
        true
    }

    fn update_from_source(
        &mut self,
        source: &Self::ImportSource,
        transaction: &mut AsyncTransaction<'_>,
    ) -> Result<()>;

    fn did_insert_from_source(
        &mut self,
        source: &Self::ImportSource,
        transaction: &mut AsyncTransaction<'_>,
    ) -> Result<()> {
        self.update_from_source(source, transaction)
    }
}
