//! rollcall-store — SQLite persistence for the roster and access logs.
//!
//! Implements [`rollcall_core::Persistence`] for the recognition pipeline
//! and carries the administrative queries used by the operator CLI.

pub mod database;
pub mod logs;
pub mod migrations;

pub use database::{Database, EmployeeDetails, EmployeeSummary, StoreError};
pub use logs::LogRow;

use std::path::PathBuf;

/// `$XDG_DATA_HOME/rollcall/employees.db`, falling back to `~/.local/share`.
pub fn default_db_path() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("employees.db")
}
