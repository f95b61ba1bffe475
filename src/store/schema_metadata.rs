//! The advisory CAS lock on `schema_metadata.last_claim_cleanup` that makes
//! concurrent cleanup sweeps single-writer (§4.4, §4.5).

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension, Transaction};

use super::{format_datetime, parse_datetime};
use crate::error::Result;

/// Minimum interval between successful sweeps. A sweeper that finds the
/// lock held more recently than this yields without sweeping.
pub const CLEANUP_LOCK_INTERVAL_SECONDS: i64 = 60;

/// Attempt to claim the single-writer cleanup lock: advances
/// `last_claim_cleanup` to `now` only if its stored value is older than
/// [`CLEANUP_LOCK_INTERVAL_SECONDS`]. Returns whether the lock was claimed.
///
/// # Errors
/// Returns [`crate::error::CoordError::Internal`] on a store failure.
pub fn try_acquire_cleanup_lock(tx: &Transaction<'_>, now: DateTime<Utc>) -> Result<bool> {
    let cutoff = now - Duration::seconds(CLEANUP_LOCK_INTERVAL_SECONDS);
    let affected = tx.execute(
        "UPDATE schema_metadata SET value = ?1 WHERE key = 'last_claim_cleanup' AND value < ?2",
        params![format_datetime(now), format_datetime(cutoff)],
    )?;
    Ok(affected > 0)
}

/// Read the current `last_claim_cleanup` timestamp, for tests.
///
/// # Errors
/// Returns [`crate::error::CoordError::Internal`] on a store failure.
pub fn last_claim_cleanup(tx: &Transaction<'_>) -> Result<Option<DateTime<Utc>>> {
    let value: Option<String> = tx
        .query_row("SELECT value FROM schema_metadata WHERE key = 'last_claim_cleanup'", [], |row| row.get(0))
        .optional()?;
    value.map(|v| parse_datetime(&v)).transpose()
}
