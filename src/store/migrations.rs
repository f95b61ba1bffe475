//! Schema migration runner (§4.1, §6).
//!
//! Numbered SQL scripts are embedded at compile time and applied in order
//! inside a transaction. Before touching an on-disk database, the file is
//! copied to `<db>.bak-<version>`; on migration failure the backup is
//! restored and the error is surfaced as [`CoordError::Migration`].

use std::path::Path;

use rusqlite::Connection;

use crate::error::{CoordError, Result};

/// One embedded migration script, in application order.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "initial_schema",
    sql: include_str!("../../migrations/v0001_initial.sql"),
}];

/// Apply every migration newer than the database's current
/// `schema_metadata.version` to an on-disk database, backing it up first.
///
/// # Errors
/// Returns [`CoordError::Migration`] if any script fails; the database is
/// restored from its pre-migration backup before the error is returned.
pub fn run(conn: &Connection, db_path: &Path) -> Result<()> {
    ensure_metadata_table(conn)?;
    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();
    if pending.is_empty() {
        return Ok(());
    }

    let backup_path = db_path.with_extension(format!("bak-{current}"));
    if db_path.exists() {
        std::fs::copy(db_path, &backup_path).map_err(CoordError::from)?;
    }

    if let Err(err) = apply_all(conn, &pending) {
        if backup_path.exists() {
            drop(std::fs::copy(&backup_path, db_path));
        }
        return Err(err);
    }
    Ok(())
}

/// Apply every migration to a fresh in-memory database. No backup step is
/// needed since there is nothing on disk to protect.
///
/// # Errors
/// Returns [`CoordError::Migration`] if any script fails.
pub fn run_in_memory(conn: &Connection) -> Result<()> {
    ensure_metadata_table(conn)?;
    apply_all(conn, &MIGRATIONS.iter().collect::<Vec<_>>())
}

fn apply_all(conn: &Connection, pending: &[&Migration]) -> Result<()> {
    for migration in pending {
        conn.execute_batch(migration.sql).map_err(|e| CoordError::Migration {
            script: migration.name.to_owned(),
            detail: e.to_string(),
        })?;
        conn.execute(
            "INSERT INTO schema_metadata (key, value) VALUES ('version', ?1)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            [migration.version.to_string()],
        )
        .map_err(|e| CoordError::Migration {
            script: migration.name.to_owned(),
            detail: e.to_string(),
        })?;
    }
    Ok(())
}

fn ensure_metadata_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_metadata (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn current_version(conn: &Connection) -> Result<i64> {
    let version: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_metadata WHERE key = 'version'",
            [],
            |row| row.get(0),
        )
        .ok();
    Ok(version.and_then(|v| v.parse().ok()).unwrap_or(0))
}

/// Roll an on-disk database back to its `<db>.bak-<version>` backup.
///
/// # Errors
/// Returns [`CoordError::Io`] if the backup does not exist or cannot be
/// copied over the live database.
pub fn rollback(db_path: &Path, version: i64) -> Result<()> {
    let backup_path = db_path.with_extension(format!("bak-{version}"));
    std::fs::copy(&backup_path, db_path)?;
    Ok(())
}
