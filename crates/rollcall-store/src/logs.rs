//! Entry and exit log tables.
//!
//! Entries and exits live in separate tables with identical shape; every
//! query here is parameterised on [`EventKind`] to pick the table.

use crate::database::{Database, StoreError};
use chrono::{NaiveDate, NaiveDateTime};
use rollcall_core::EventKind;
use rusqlite::params;
use serde::Serialize;

/// One row of `entry_logs` or `exit_logs`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogRow {
    pub log_id: i64,
    pub kind: EventKind,
    pub employee_id: i64,
    pub employee_name: String,
    pub time: NaiveDateTime,
}

/// (table, timestamp column) for a log kind.
fn table(kind: EventKind) -> (&'static str, &'static str) {
    match kind {
        EventKind::Entry => ("entry_logs", "entry_time"),
        EventKind::Exit => ("exit_logs", "exit_time"),
    }
}

impl Database {
    pub fn insert_log(
        &self,
        kind: EventKind,
        employee_id: i64,
        employee_name: &str,
        time: NaiveDateTime,
    ) -> Result<i64, StoreError> {
        let (table, column) = table(kind);
        self.conn().execute(
            &format!("INSERT INTO {table} (employee_id, employee_name, {column}) VALUES (?1, ?2, ?3)"),
            params![employee_id, employee_name, time],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn last_log_time(&self, kind: EventKind, employee_id: i64) -> Result<Option<NaiveDateTime>, StoreError> {
        let (table, column) = table(kind);
        let time = self.conn().query_row(
            &format!("SELECT MAX({column}) FROM {table} WHERE employee_id = ?1"),
            params![employee_id],
            |row| row.get::<_, Option<NaiveDateTime>>(0),
        )?;
        Ok(time)
    }

    pub fn log_count(&self, kind: EventKind, employee_id: i64) -> Result<i64, StoreError> {
        let (table, _) = table(kind);
        let count = self.conn().query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE employee_id = ?1"),
            params![employee_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Most recent `limit` logs of one kind, newest first.
    pub fn recent_logs(&self, kind: EventKind, limit: usize) -> Result<Vec<LogRow>, StoreError> {
        let (table, column) = table(kind);
        let mut stmt = self.conn().prepare(&format!(
            "SELECT id, employee_id, employee_name, {column} FROM {table} ORDER BY {column} DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(LogRow {
                    log_id: row.get(0)?,
                    kind,
                    employee_id: row.get(1)?,
                    employee_name: row.get(2)?,
                    time: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// All logs of one kind on a calendar day, newest first.
    pub fn logs_on(&self, kind: EventKind, date: NaiveDate) -> Result<Vec<LogRow>, StoreError> {
        let (table, column) = table(kind);
        let mut stmt = self.conn().prepare(&format!(
            "SELECT id, employee_id, employee_name, {column} FROM {table} \
             WHERE DATE({column}) = ?1 ORDER BY {column} DESC"
        ))?;
        let rows = stmt
            .query_map(params![date.format("%Y-%m-%d").to_string()], |row| {
                Ok(LogRow {
                    log_id: row.get(0)?,
                    kind,
                    employee_id: row.get(1)?,
                    employee_name: row.get(2)?,
                    time: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn delete_log(&self, kind: EventKind, log_id: i64) -> Result<bool, StoreError> {
        let (table, _) = table(kind);
        let deleted = self
            .conn()
            .execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![log_id])?;
        Ok(deleted > 0)
    }
}
