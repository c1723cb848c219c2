//! Schema migrations.
//!
//! SQL files are embedded at compile time and applied in version order, one
//! transaction each. Applied versions are recorded in `schema_migrations`.

use rusqlite::Connection;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration {version} ({name}) failed: {reason}")]
    Failed {
        version: usize,
        name: &'static str,
        reason: String,
    },
}

impl From<MigrationError> for stowage_common::Error {
    fn from(e: MigrationError) -> Self {
        stowage_common::Error::database(e.to_string())
    }
}

/// One embedded schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: usize,
    pub name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial",
        sql: include_str!("001_initial.sql"),
    },
    Migration {
        version: 2,
        name: "lookup_indexes",
        sql: include_str!("002_lookup_indexes.sql"),
    },
];

fn ensure_version_table(conn: &Connection) -> Result<(), MigrationError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY NOT NULL,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
    )?;
    Ok(())
}

fn recorded_version(conn: &Connection) -> Result<usize, MigrationError> {
    let version: Option<usize> =
        conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })?;
    Ok(version.unwrap_or(0))
}

/// Migrations newer than what the database has recorded.
pub fn pending(conn: &Connection) -> Result<Vec<Migration>, MigrationError> {
    ensure_version_table(conn)?;
    let current = recorded_version(conn)?;
    Ok(MIGRATIONS
        .iter()
        .filter(|m| m.version > current)
        .copied()
        .collect())
}

/// Apply every pending migration and return how many ran.
///
/// A failing migration rolls back on its own; earlier ones stay applied.
pub fn run_migrations(conn: &Connection) -> Result<usize, MigrationError> {
    conn.execute_batch("PRAGMA foreign_keys = ON")?;

    let todo = pending(conn)?;
    for migration in &todo {
        let failed = |e: rusqlite::Error| MigrationError::Failed {
            version: migration.version,
            name: migration.name,
            reason: e.to_string(),
        };

        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql).map_err(failed)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.name],
        )
        .map_err(failed)?;
        tx.commit().map_err(failed)?;

        tracing::info!(
            version = migration.version,
            name = migration.name,
            "Applied migration"
        );
    }

    Ok(todo.len())
}

/// Schema version recorded in the database, 0 for a fresh file.
pub fn current_version(conn: &Connection) -> Result<usize, MigrationError> {
    ensure_version_table(conn)?;
    recorded_version(conn)
}

pub fn latest_version() -> usize {
    MIGRATIONS.last().map_or(0, |m| m.version)
}
