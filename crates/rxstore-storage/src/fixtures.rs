//! Test entities

use serde::{Deserialize, Serialize};

use crate::import::{ImportableObject, ImportableUniqueObject};
use crate::object::Entity;
use crate::transaction::AsyncTransaction;
use crate::{Result, StorageError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub title: String,
    pub body: String,
}

impl Entity for Note {
    const ENTITY_NAME: &'static str = "Note";
}

#[derive(Debug, Clone, Default)]
pub struct NoteSource {
    pub title: String,
    pub body: String,
    pub skip: bool,
}

impl NoteSource {
    pub fn new(title: &str, body: &str) -> Self {
        Self {
            title: title.to_string(),
            body: body.to_string(),
            skip: false,
        }
    }
}

impl ImportableObject for Note {
    type ImportSource = NoteSource;

    fn should_insert(source: &NoteSource, _transaction: &AsyncTransaction<'_>) -> bool {
        !source.skip
    }

    fn did_insert(&mut self, source: &NoteSource, _transaction: &mut AsyncTransaction<'_>) -> Result<()> {
        if source.title.is_empty() {
            return Err(StorageError::Import("note title is required".to_string()));
        }
        self.title = source.title.clone();
        self.body = source.body.clone();
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub email: String,
    pub name: String,
    pub revision: u32,
}

impl Entity for Contact {
    const ENTITY_NAME: &'static str = "Contact";
}

#[derive(Debug, Clone)]
pub struct ContactSource {
    pub email: Option<String>,
    pub name: String,
}

impl ContactSource {
    pub fn new(email: &str, name: &str) -> Self {
        Self {
            email: Some(email.to_string()),
            name: name.to_string(),
        }
    }
}

impl ImportableUniqueObject for Contact {
    type ImportSource = ContactSource;
    type UniqueId = String;

    fn unique_id_from_source(
        source: &ContactSource,
        _transaction: &AsyncTransaction<'_>,
    ) -> Result<Option<String>> {
        Ok(source.email.clone())
    }

    fn set_unique_id(&mut self, unique_id: String) {
        self.email = unique_id;
    }

    fn update_from_source(
        &mut self,
        source: &ContactSource,
        _transaction: &mut AsyncTransaction<'_>,
    ) -> Result<()> {
        self.name = source.name.clone();
        self.revision += 1;
        Ok(())
    }
}
