use chrono::NaiveDateTime;
use rollcall_core::{
    AccessEvent, Embedding, EmbeddingError, EmployeeRecord, EventKind, Persistence, PersistenceError,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("stored embedding for {institute_id} is unreadable: {source}")]
    InvalidEmbedding {
        institute_id: String,
        #[source]
        source: EmbeddingError,
    },
    #[error("embedding rejected: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("employee with institute id {0} already exists")]
    DuplicateEmployee(String),
    #[error("failed to create database directory: {0}")]
    Io(#[from] std::io::Error),
    #[error("schema migration failed: {0}")]
    Migration(#[from] refinery::Error),
}

/// Roster listing entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmployeeSummary {
    pub employee_id: i64,
    pub institute_id: String,
    pub name: String,
}

/// Per-employee attendance summary.
#[derive(Debug, Clone, Serialize)]
pub struct EmployeeDetails {
    pub institute_id: String,
    pub name: String,
    pub photo_bytes: usize,
    pub entry_count: i64,
    pub exit_count: i64,
    pub last_log_kind: Option<EventKind>,
    pub last_log_time: Option<NaiveDateTime>,
}

impl EmployeeDetails {
    /// Whether the employee is currently inside, derived from the last log.
    pub fn current_status(&self) -> Option<EventKind> {
        self.last_log_kind
    }
}

/// Synchronous SQLite handle. One connection, owned by one thread.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (creating if needed) the database at `path` and bring the
    /// schema up to date.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut db = Self {
            conn: Connection::open(path)?,
        };
        crate::migrations::run_migrations(&mut db.conn)?;
        tracing::debug!(path = %path.display(), "database opened");
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let mut db = Self {
            conn: Connection::open_in_memory()?,
        };
        crate::migrations::run_migrations(&mut db.conn)?;
        Ok(db)
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Register a new employee. The registration embedding becomes both the
    /// working embedding and the permanent anchor.
    pub fn register_employee(
        &self,
        institute_id: &str,
        name: &str,
        embedding: &Embedding,
        profile_photo: Option<&[u8]>,
    ) -> Result<i64, StoreError> {
        let bytes = embedding.normalized()?.to_bytes();
        let result = self.conn.execute(
            "INSERT INTO employees (employee_institute_id, name, encoding, anchor_encoding, profile_photo) \
             VALUES (?1, ?2, ?3, ?3, ?4)",
            params![institute_id, name, bytes, profile_photo],
        );
        match result {
            Ok(_) => {
                let id = self.conn.last_insert_rowid();
                tracing::info!(institute_id, name, employee_id = id, "employee registered");
                Ok(id)
            }
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == rusqlite::ErrorCode::ConstraintViolation => {
                Err(StoreError::DuplicateEmployee(institute_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete an employee and all of their log rows.
    pub fn remove_employee(&mut self, institute_id: &str) -> Result<bool, StoreError> {
        let tx = self.conn.transaction()?;
        let Some(employee_id) = tx
            .query_row(
                "SELECT id FROM employees WHERE employee_institute_id = ?1",
                params![institute_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
        else {
            return Ok(false);
        };
        tx.execute("DELETE FROM entry_logs WHERE employee_id = ?1", params![employee_id])?;
        tx.execute("DELETE FROM exit_logs WHERE employee_id = ?1", params![employee_id])?;
        tx.execute("DELETE FROM employees WHERE id = ?1", params![employee_id])?;
        tx.commit()?;
        tracing::info!(institute_id, employee_id, "employee removed");
        Ok(true)
    }

    pub fn list_employees(&self) -> Result<Vec<EmployeeSummary>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, employee_institute_id, name FROM employees ORDER BY employee_institute_id")?;
        let rows = stmt
            .query_map([], |row| {
                Ok(EmployeeSummary {
                    employee_id: row.get(0)?,
                    institute_id: row.get(1)?,
                    name: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn employee_details(&self, institute_id: &str) -> Result<Option<EmployeeDetails>, StoreError> {
        let Some((employee_id, name, photo_bytes)) = self
            .conn
            .query_row(
                "SELECT id, name, COALESCE(LENGTH(profile_photo), 0) FROM employees \
                 WHERE employee_institute_id = ?1",
                params![institute_id],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, i64>(2)?)),
            )
            .optional()?
        else {
            return Ok(None);
        };

        let entry_count = self.log_count(EventKind::Entry, employee_id)?;
        let exit_count = self.log_count(EventKind::Exit, employee_id)?;
        let last_entry = self.last_log_time(EventKind::Entry, employee_id)?;
        let last_exit = self.last_log_time(EventKind::Exit, employee_id)?;

        let last = match (last_entry, last_exit) {
            (Some(entry), Some(exit)) if entry > exit => Some((EventKind::Entry, entry)),
            (Some(entry), None) => Some((EventKind::Entry, entry)),
            (_, Some(exit)) => Some((EventKind::Exit, exit)),
            (None, None) => None,
        };

        Ok(Some(EmployeeDetails {
            institute_id: institute_id.to_string(),
            name,
            photo_bytes: photo_bytes as usize,
            entry_count,
            exit_count,
            last_log_kind: last.map(|(k, _)| k),
            last_log_time: last.map(|(_, t)| t),
        }))
    }

    /// Offline drift reset: overwrite the working embedding with the anchor.
    pub fn reset_embedding(&self, institute_id: &str) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "UPDATE employees SET encoding = COALESCE(anchor_encoding, encoding) \
             WHERE employee_institute_id = ?1",
            params![institute_id],
        )?;
        Ok(changed > 0)
    }

    fn record_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, Vec<u8>, Option<Vec<u8>>)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    }

    fn build_record(
        (employee_id, institute_id, name, encoding, anchor): (i64, String, String, Vec<u8>, Option<Vec<u8>>),
    ) -> Result<EmployeeRecord, StoreError> {
        let invalid = |source| StoreError::InvalidEmbedding {
            institute_id: institute_id.clone(),
            source,
        };
        let embedding = Embedding::from_bytes(&encoding).map_err(invalid)?;
        // Rows from before anchors were stored anchor on their current encoding.
        let anchor = match anchor {
            Some(bytes) => Embedding::from_bytes(&bytes).map_err(invalid)?,
            None => embedding.clone(),
        };
        EmployeeRecord::new(employee_id, institute_id.clone(), name, embedding, anchor).map_err(invalid)
    }

    fn load_records(&self) -> Result<Vec<EmployeeRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, employee_institute_id, name, encoding, anchor_encoding FROM employees",
        )?;
        let rows = stmt
            .query_map([], Self::record_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Self::build_record).collect()
    }

    fn find_record(&self, institute_id: &str) -> Result<Option<EmployeeRecord>, StoreError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, employee_institute_id, name, encoding, anchor_encoding FROM employees \
                 WHERE employee_institute_id = ?1",
                params![institute_id],
                Self::record_from_row,
            )
            .optional()?;
        row.map(Self::build_record).transpose()
    }

    fn write_embedding(&self, institute_id: &str, embedding: &Embedding) -> Result<(), StoreError> {
        self.conn.execute(
            "UPDATE employees SET encoding = ?1 WHERE employee_institute_id = ?2",
            params![embedding.to_bytes(), institute_id],
        )?;
        Ok(())
    }
}

impl Persistence for Database {
    fn load_roster(&self) -> Result<Vec<EmployeeRecord>, PersistenceError> {
        self.load_records()
            .map_err(|e| PersistenceError::new("load_roster", e))
    }

    fn update_embedding(&self, institute_id: &str, embedding: &Embedding) -> Result<(), PersistenceError> {
        self.write_embedding(institute_id, embedding)
            .map_err(|e| PersistenceError::new("update_embedding", e))
    }

    fn last_entry_time(&self, employee_id: i64) -> Result<Option<NaiveDateTime>, PersistenceError> {
        self.last_log_time(EventKind::Entry, employee_id)
            .map_err(|e| PersistenceError::new("last_entry_time", e))
    }

    fn last_exit_time(&self, employee_id: i64) -> Result<Option<NaiveDateTime>, PersistenceError> {
        self.last_log_time(EventKind::Exit, employee_id)
            .map_err(|e| PersistenceError::new("last_exit_time", e))
    }

    fn append_log(&self, event: &AccessEvent) -> Result<(), PersistenceError> {
        self.insert_log(event.kind, event.employee_id, &event.name, event.timestamp)
            .map(|_| ())
            .map_err(|e| PersistenceError::new("append_log", e))
    }

    fn lookup_by_institute_id(&self, institute_id: &str) -> Result<Option<EmployeeRecord>, PersistenceError> {
        self.find_record(institute_id)
            .map_err(|e| PersistenceError::new("lookup_by_institute_id", e))
    }
}
