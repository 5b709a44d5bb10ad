//! In-memory persistence fake for unit tests.

use crate::persistence::{Persistence, PersistenceError};
use crate::types::{AccessEvent, Embedding, EmployeeRecord, EventKind};
use chrono::{NaiveDate, NaiveDateTime};
use std::cell::{Cell, RefCell};

#[derive(Default)]
pub struct MemoryPersistence {
    pub roster: RefCell<Vec<EmployeeRecord>>,
    pub updates: RefCell<Vec<(String, Embedding)>>,
    pub logs: RefCell<Vec<AccessEvent>>,
    pub fail_writes: Cell<bool>,
    /// Number of `append_log` calls that fail once the skip count is used up.
    pub failing_appends: Cell<usize>,
    pub skip_appends_before_failure: Cell<usize>,
}

impl MemoryPersistence {
    pub fn with_roster(roster: Vec<EmployeeRecord>) -> Self {
        Self {
            roster: RefCell::new(roster),
            ..Default::default()
        }
    }

    fn last_time(&self, employee_id: i64, kind: EventKind) -> Option<NaiveDateTime> {
        self.logs
            .borrow()
            .iter()
            .filter(|e| e.employee_id == employee_id && e.kind == kind)
            .map(|e| e.timestamp)
            .max()
    }

    fn check_write(&self, operation: &'static str) -> Result<(), PersistenceError> {
        if self.fail_writes.get() {
            return Err(PersistenceError::new(operation, "disk I/O error"));
        }
        Ok(())
    }
}

impl Persistence for MemoryPersistence {
    fn load_roster(&self) -> Result<Vec<EmployeeRecord>, PersistenceError> {
        Ok(self.roster.borrow().clone())
    }

    fn update_embedding(&self, institute_id: &str, embedding: &Embedding) -> Result<(), PersistenceError> {
        self.check_write("update_embedding")?;
        self.updates
            .borrow_mut()
            .push((institute_id.to_string(), embedding.clone()));
        Ok(())
    }

    fn last_entry_time(&self, employee_id: i64) -> Result<Option<NaiveDateTime>, PersistenceError> {
        Ok(self.last_time(employee_id, EventKind::Entry))
    }

    fn last_exit_time(&self, employee_id: i64) -> Result<Option<NaiveDateTime>, PersistenceError> {
        Ok(self.last_time(employee_id, EventKind::Exit))
    }

    fn append_log(&self, event: &AccessEvent) -> Result<(), PersistenceError> {
        self.check_write("append_log")?;
        if self.failing_appends.get() > 0 {
            if self.skip_appends_before_failure.get() > 0 {
                self.skip_appends_before_failure.set(self.skip_appends_before_failure.get() - 1);
            } else {
                self.failing_appends.set(self.failing_appends.get() - 1);
                return Err(PersistenceError::new("append_log", "transient write failure"));
            }
        }
        self.logs.borrow_mut().push(event.clone());
        Ok(())
    }

    fn lookup_by_institute_id(&self, institute_id: &str) -> Result<Option<EmployeeRecord>, PersistenceError> {
        Ok(self
            .roster
            .borrow()
            .iter()
            .find(|r| r.institute_id() == institute_id)
            .cloned())
    }
}

/// Roster record whose anchor and working embedding are both `values`.
pub fn record(employee_id: i64, institute_id: &str, values: &[f32]) -> EmployeeRecord {
    let e = Embedding::new(values.to_vec());
    EmployeeRecord::new(employee_id, institute_id, format!("Employee {institute_id}"), e.clone(), e).unwrap()
}

/// A fixed wall-clock origin plus `secs` seconds.
pub fn at(secs: i64) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 3, 2)
        .unwrap()
        .and_hms_opt(9, 0, 0)
        .unwrap()
        + chrono::Duration::seconds(secs)
}
