//! Embedded schema migrations.
//!
//! SQL files under `migrations/` are compiled in with `embed_migrations!`
//! and applied on open. `V1` matches the roster layout of pre-existing
//! databases, so those are adopted in place.

use crate::database::StoreError;

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Apply every pending migration. Applied versions are tracked in
/// `refinery_schema_history`.
pub fn run_migrations(conn: &mut rusqlite::Connection) -> Result<(), StoreError> {
    let report = embedded::migrations::runner().run(conn)?;
    for migration in report.applied_migrations() {
        tracing::info!(version = migration.version(), name = migration.name(), "applied migration");
    }
    Ok(())
}
