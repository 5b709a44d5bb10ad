//! In-memory roster cache, keyed by institute id.

use crate::persistence::{Persistence, PersistenceError};
use crate::types::EmployeeRecord;
use std::collections::BTreeMap;

/// Roster of registered employees.
///
/// Iteration is always in ascending institute id order, which is what
/// makes best-match selection reproducible on equal similarities.
#[derive(Debug, Default, Clone)]
pub struct EmbeddingStore {
    records: BTreeMap<String, EmployeeRecord>,
}

impl EmbeddingStore {
    pub fn from_records(records: impl IntoIterator<Item = EmployeeRecord>) -> Self {
        let mut map = BTreeMap::new();
        for record in records {
            let id = record.institute_id().to_string();
            if map.insert(id.clone(), record).is_some() {
                tracing::warn!(institute_id = %id, "duplicate institute id in roster; keeping the later row");
            }
        }
        Self { records: map }
    }

    /// Populate the roster with a full read from persistence.
    pub fn load<P: Persistence>(persistence: &P) -> Result<Self, PersistenceError> {
        let store = Self::from_records(persistence.load_roster()?);
        tracing::info!(employees = store.len(), "roster loaded");
        Ok(store)
    }

    pub fn get(&self, institute_id: &str) -> Option<&EmployeeRecord> {
        self.records.get(institute_id)
    }

    pub(crate) fn get_mut(&mut self, institute_id: &str) -> Option<&mut EmployeeRecord> {
        self.records.get_mut(institute_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EmployeeRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
