//! Transactional store: an embedded SQLite database backing every entity
//! in the data model (§4.1).
//!
//! Every mutation goes through [`Store::transaction`], which runs the
//! closure inside `BEGIN IMMEDIATE` and commits on `Ok`, rolls back on
//! `Err`. Readers never block on a writer: the connection runs in WAL mode
//! with a 5-second busy timeout.

pub mod budget;
pub mod claims;
pub mod conflicts;
pub mod merge_events;
pub mod migrations;
pub mod schema_metadata;
pub mod sessions;
pub mod subscriptions;
pub mod suggestions;

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::error::{CoordError, Result};

/// Maximum serialized size of any `metadata` JSON column, in bytes (§4.1).
pub const MAX_METADATA_BYTES: usize = 64 * 1024;

/// The embedded transactional store.
///
/// Wraps a single [`rusqlite::Connection`] behind a mutex: SQLite already
/// serializes writers, the mutex exists so `&Store` can be shared across
/// threads (the merge-detector daemon and the CLI foreground both hold a
/// reference to the same store).
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (creating if absent) the database at `path`, apply pragmas, and
    /// run any pending migrations.
    ///
    /// # Errors
    /// Returns [`CoordError::Internal`] if the connection cannot be opened,
    /// or [`CoordError::Migration`] if a migration fails (the database is
    /// rolled back to its pre-migration backup first).
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn)?;
        migrations::run(&conn, path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database, for tests.
    ///
    /// # Errors
    /// Returns [`CoordError::Internal`] if the connection cannot be opened.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_pragmas(&conn)?;
        migrations::run_in_memory(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction. Commits if `f`
    /// returns `Ok`, rolls back otherwise.
    ///
    /// # Errors
    /// Propagates whatever error `f` returns, or a store error if the
    /// transaction itself cannot begin or commit.
    pub fn transaction<T>(&self, f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| CoordError::Internal("store mutex poisoned".to_owned()))?;
        let tx = guard
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(CoordError::from)?;
        match f(&tx) {
            Ok(value) => {
                tx.commit().map_err(CoordError::from)?;
                Ok(value)
            }
            Err(err) => {
                // Rollback happens automatically on drop; explicit for clarity.
                drop(tx.rollback());
                Err(err)
            }
        }
    }
}

fn apply_pragmas(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "busy_timeout", 5_000)?;
    Ok(())
}

/// Format a `DateTime<Utc>` the way every datetime column in this schema is
/// stored: SQLite's `datetime('now')` UTC string form.
#[must_use]
pub fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Parse a datetime column back into a `DateTime<Utc>`.
///
/// # Errors
/// Returns [`CoordError::Internal`] if the stored string is not in the
/// expected format.
pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|e| CoordError::Internal(format!("bad datetime column '{s}': {e}")))
}

/// Serialize `metadata` to a JSON string, enforcing the size bound.
///
/// # Errors
/// Returns [`CoordError::Validation`] if the serialized form exceeds
/// [`MAX_METADATA_BYTES`].
pub fn encode_metadata(metadata: Option<&serde_json::Value>) -> Result<Option<String>> {
    let Some(value) = metadata else {
        return Ok(None);
    };
    let encoded = serde_json::to_string(value)
        .map_err(|e| CoordError::Internal(format!("metadata serialization failed: {e}")))?;
    if encoded.len() > MAX_METADATA_BYTES {
        return Err(CoordError::Validation {
            field: "metadata".to_owned(),
            reason: format!("exceeds {MAX_METADATA_BYTES} byte limit"),
        });
    }
    Ok(Some(encoded))
}

/// Parse a `metadata` column. A malformed value returns `None` (logged at
/// `warn`) rather than propagating an error (§4.1 "safe JSON").
#[must_use]
pub fn decode_metadata(raw: Option<String>) -> Option<serde_json::Value> {
    raw.and_then(|s| match serde_json::from_str(&s) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(error = %err, "discarding malformed metadata column");
            None
        }
    })
}
