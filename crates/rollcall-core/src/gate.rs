//! Entry/exit decision and duplicate suppression.
//!
//! The entry/exit state of an employee is not tracked here; it is derived
//! on each arrival from the latest persisted entry and exit timestamps.
//! The only state the gate owns is the per-id time of the last committed
//! event, which drives the cooldown.

use crate::persistence::{Persistence, PersistenceError};
use crate::types::{AccessEvent, EmployeeRecord, EventKind};
use chrono::{Duration, NaiveDateTime};
use std::collections::HashMap;

pub const DEFAULT_COOLDOWN_SECS: i64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    Committed(AccessEvent),
    /// A previous event for this id is younger than the cooldown. Nothing
    /// was written.
    DuplicateSuppressed {
        institute_id: String,
        since_last: Duration,
    },
}

/// Pick the kind of the next event from the two most recent log times.
///
/// No history, or an exit at or after the last entry, means the next
/// event is an entry. An entry with no later exit means an exit.
pub fn next_kind(last_entry: Option<NaiveDateTime>, last_exit: Option<NaiveDateTime>) -> EventKind {
    match (last_entry, last_exit) {
        (Some(_), None) => EventKind::Exit,
        (Some(entry), Some(exit)) if entry > exit => EventKind::Exit,
        _ => EventKind::Entry,
    }
}

#[derive(Debug, Clone)]
pub struct LogGate {
    cooldown: Duration,
    last_logged: HashMap<String, NaiveDateTime>,
}

impl Default for LogGate {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_COOLDOWN_SECS))
    }
}

impl LogGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_logged: HashMap::new(),
        }
    }

    pub fn last_logged(&self, institute_id: &str) -> Option<NaiveDateTime> {
        self.last_logged.get(institute_id).copied()
    }

    /// Time since the last committed event if it is still inside the cooldown.
    pub fn cooling_down(&self, institute_id: &str, now: NaiveDateTime) -> Option<Duration> {
        let last = self.last_logged.get(institute_id)?;
        let elapsed = now - *last;
        (elapsed < self.cooldown).then_some(elapsed)
    }

    /// Handle an arrival: suppress it, or decide its kind and commit it.
    ///
    /// The cooldown entry only advances once the write has succeeded.
    pub fn on_arrival<P: Persistence>(
        &mut self,
        record: &EmployeeRecord,
        now: NaiveDateTime,
        persistence: &P,
    ) -> Result<GateOutcome, PersistenceError> {
        let institute_id = record.institute_id();

        if let Some(since_last) = self.cooling_down(institute_id, now) {
            tracing::debug!(
                institute_id,
                since_last_secs = since_last.num_seconds(),
                "skipped logging inside cooldown"
            );
            return Ok(GateOutcome::DuplicateSuppressed {
                institute_id: institute_id.to_string(),
                since_last,
            });
        }

        let last_entry = persistence.last_entry_time(record.employee_id())?;
        let last_exit = persistence.last_exit_time(record.employee_id())?;

        let event = AccessEvent {
            employee_id: record.employee_id(),
            institute_id: institute_id.to_string(),
            name: record.name().to_string(),
            kind: next_kind(last_entry, last_exit),
            timestamp: now,
        };

        persistence.append_log(&event)?;

        let slot = self.last_logged.entry(institute_id.to_string()).or_insert(now);
        if now > *slot {
            *slot = now;
        }

        tracing::info!(
            institute_id,
            name = record.name(),
            kind = %event.kind,
            "access logged"
        );

        Ok(GateOutcome::Committed(event))
    }
}
