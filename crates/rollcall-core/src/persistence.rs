//! Persistence collaborator seam.
//!
//! The core never talks to a database directly. Everything it needs from
//! storage goes through [`Persistence`], which is synchronous: the engine
//! thread blocks on each call.

use crate::types::{AccessEvent, Embedding, EmployeeRecord};
use chrono::NaiveDateTime;
use thiserror::Error;

/// A storage call failed. Not retried by the core.
#[derive(Error, Debug)]
#[error("persistence failure during {operation}: {source}")]
pub struct PersistenceError {
    pub operation: &'static str,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl PersistenceError {
    pub fn new(
        operation: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            operation,
            source: source.into(),
        }
    }
}

pub trait Persistence {
    /// Read the full roster.
    fn load_roster(&self) -> Result<Vec<EmployeeRecord>, PersistenceError>;

    /// Overwrite the working embedding of a single employee.
    fn update_embedding(&self, institute_id: &str, embedding: &Embedding) -> Result<(), PersistenceError>;

    fn last_entry_time(&self, employee_id: i64) -> Result<Option<NaiveDateTime>, PersistenceError>;

    fn last_exit_time(&self, employee_id: i64) -> Result<Option<NaiveDateTime>, PersistenceError>;

    fn append_log(&self, event: &AccessEvent) -> Result<(), PersistenceError>;

    fn lookup_by_institute_id(&self, institute_id: &str) -> Result<Option<EmployeeRecord>, PersistenceError>;
}

impl<P: Persistence + ?Sized> Persistence for &P {
    fn load_roster(&self) -> Result<Vec<EmployeeRecord>, PersistenceError> {
        (**self).load_roster()
    }

    fn update_embedding(&self, institute_id: &str, embedding: &Embedding) -> Result<(), PersistenceError> {
        (**self).update_embedding(institute_id, embedding)
    }

    fn last_entry_time(&self, employee_id: i64) -> Result<Option<NaiveDateTime>, PersistenceError> {
        (**self).last_entry_time(employee_id)
    }

    fn last_exit_time(&self, employee_id: i64) -> Result<Option<NaiveDateTime>, PersistenceError> {
        (**self).last_exit_time(employee_id)
    }

    fn append_log(&self, event: &AccessEvent) -> Result<(), PersistenceError> {
        (**self).append_log(event)
    }

    fn lookup_by_institute_id(&self, institute_id: &str) -> Result<Option<EmployeeRecord>, PersistenceError> {
        (**self).lookup_by_institute_id(institute_id)
    }
}
