//! Claim acquire/release/list/update/cleanup operations (§4.1, §4.5).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction};

use super::{decode_metadata, encode_metadata, format_datetime, parse_datetime};
use crate::error::{CoordError, Result};
use crate::model::claim::{ClaimMode, FileClaim};
use crate::model::ids::{ClaimId, SessionId};

fn from_row(row: &Row<'_>) -> rusqlite::Result<FileClaim> {
    let id: String = row.get("id")?;
    let session_id: String = row.get("session_id")?;
    let claim_mode: String = row.get("claim_mode")?;
    let escalated_from: Option<String> = row.get("escalated_from")?;
    let metadata: Option<String> = row.get("metadata")?;
    Ok(FileClaim {
        id: id.parse().unwrap_or_else(|_| ClaimId::new()),
        session_id: session_id.parse().unwrap_or_else(|_| SessionId::new()),
        repo_path: PathBuf::from(row.get::<_, String>("repo_path")?),
        file_path: PathBuf::from(row.get::<_, String>("file_path")?),
        claim_mode: ClaimMode::parse(&claim_mode).unwrap_or(ClaimMode::Shared),
        claimed_at: parse_datetime(&row.get::<_, String>("claimed_at")?).unwrap_or_default(),
        expires_at: parse_datetime(&row.get::<_, String>("expires_at")?).unwrap_or_default(),
        last_heartbeat: parse_datetime(&row.get::<_, String>("last_heartbeat")?).unwrap_or_default(),
        escalated_from: escalated_from.and_then(|s| ClaimMode::parse(&s)),
        metadata: decode_metadata(metadata),
        is_active: row.get::<_, i64>("is_active")? != 0,
        released_at: row
            .get::<_, Option<String>>("released_at")?
            .and_then(|s| parse_datetime(&s).ok()),
        deleted_at: row
            .get::<_, Option<String>>("deleted_at")?
            .and_then(|s| parse_datetime(&s).ok()),
        deleted_reason: row.get("deleted_reason")?,
    })
}

/// Insert a new claim row.
///
/// # Errors
/// Returns [`CoordError::Internal`] on a store failure, or
/// [`CoordError::Validation`] if `metadata` exceeds the size bound.
pub fn insert(tx: &Transaction<'_>, claim: &FileClaim) -> Result<()> {
    let metadata = encode_metadata(claim.metadata.as_ref())?;
    tx.execute(
        "INSERT INTO file_claims (
            id, session_id, repo_path, file_path, claim_mode, claimed_at,
            expires_at, last_heartbeat, escalated_from, metadata, is_active,
            released_at, deleted_at, deleted_reason
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            claim.id.to_string(),
            claim.session_id.to_string(),
            claim.repo_path.to_string_lossy(),
            claim.file_path.to_string_lossy(),
            claim.claim_mode.as_str(),
            format_datetime(claim.claimed_at),
            format_datetime(claim.expires_at),
            format_datetime(claim.last_heartbeat),
            claim.escalated_from.map(ClaimMode::as_str),
            metadata,
            i64::from(claim.is_active),
            claim.released_at.map(format_datetime),
            claim.deleted_at.map(format_datetime),
            claim.deleted_reason,
        ],
    )?;
    Ok(())
}

/// List active, non-expired claims on `(repo_path, file_path)`, optionally
/// excluding one session (the caller, when checking for conflicts).
///
/// # Errors
/// Returns [`CoordError::Internal`] on a store failure.
pub fn list_active_for_file(
    tx: &Transaction<'_>,
    repo_path: &Path,
    file_path: &Path,
    now: DateTime<Utc>,
    exclude_session: Option<SessionId>,
) -> Result<Vec<FileClaim>> {
    let mut stmt = tx.prepare(
        "SELECT * FROM file_claims
         WHERE repo_path = ?1 AND file_path = ?2 AND is_active = 1 AND expires_at > ?3",
    )?;
    let rows = stmt.query_map(
        params![repo_path.to_string_lossy(), file_path.to_string_lossy(), format_datetime(now)],
        from_row,
    )?;
    let mut claims = rows.collect::<rusqlite::Result<Vec<_>>>()?;
    if let Some(session_id) = exclude_session {
        claims.retain(|c| c.session_id != session_id);
    }
    Ok(claims)
}

/// Fetch a claim by id.
///
/// # Errors
/// Returns [`CoordError::NotFound`] if no claim with that id exists.
pub fn get(tx: &Transaction<'_>, id: ClaimId) -> Result<FileClaim> {
    tx.query_row("SELECT * FROM file_claims WHERE id = ?1", [id.to_string()], from_row)
        .optional()?
        .ok_or_else(|| CoordError::NotFound {
            kind: "claim",
            id: id.to_string(),
        })
}

/// List every active claim held by `session_id`.
///
/// # Errors
/// Returns [`CoordError::Internal`] on a store failure.
pub fn list_for_session(tx: &Transaction<'_>, session_id: SessionId) -> Result<Vec<FileClaim>> {
    let mut stmt = tx.prepare("SELECT * FROM file_claims WHERE session_id = ?1 AND is_active = 1")?;
    let rows = stmt.query_map([session_id.to_string()], from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CoordError::from)
}

/// List every active claim whose `expires_at` has passed, or whose
/// `last_heartbeat` is older than `heartbeat_cutoff`.
///
/// # Errors
/// Returns [`CoordError::Internal`] on a store failure.
pub fn list_stale(tx: &Transaction<'_>, now: DateTime<Utc>, heartbeat_cutoff: DateTime<Utc>) -> Result<Vec<FileClaim>> {
    let mut stmt = tx.prepare(
        "SELECT * FROM file_claims
         WHERE is_active = 1 AND (expires_at <= ?1 OR last_heartbeat <= ?2)",
    )?;
    let rows = stmt.query_map(params![format_datetime(now), format_datetime(heartbeat_cutoff)], from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CoordError::from)
}

/// Update a claim's mode, recording the prior mode as `escalated_from`.
///
/// # Errors
/// Returns [`CoordError::NotFound`] if no claim with that id exists.
pub fn escalate(tx: &Transaction<'_>, id: ClaimId, new_mode: ClaimMode, prior_mode: ClaimMode, now: DateTime<Utc>) -> Result<()> {
    let affected = tx.execute(
        "UPDATE file_claims SET claim_mode = ?1, escalated_from = ?2, claimed_at = ?3 WHERE id = ?4 AND is_active = 1",
        params![new_mode.as_str(), prior_mode.as_str(), format_datetime(now), id.to_string()],
    )?;
    if affected == 0 {
        return Err(CoordError::NotFound {
            kind: "claim",
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Refresh a claim's heartbeat and expiry.
///
/// # Errors
/// Returns [`CoordError::NotFound`] if no active claim with that id exists.
pub fn touch(tx: &Transaction<'_>, id: ClaimId, now: DateTime<Utc>, new_expiry: DateTime<Utc>) -> Result<()> {
    let affected = tx.execute(
        "UPDATE file_claims SET last_heartbeat = ?1, expires_at = ?2 WHERE id = ?3 AND is_active = 1",
        params![format_datetime(now), format_datetime(new_expiry), id.to_string()],
    )?;
    if affected == 0 {
        return Err(CoordError::NotFound {
            kind: "claim",
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Deactivate one claim, recording why.
///
/// # Errors
/// Returns [`CoordError::Internal`] on a store failure.
pub fn release(tx: &Transaction<'_>, id: ClaimId, now: DateTime<Utc>, reason: &str) -> Result<()> {
    tx.execute(
        "UPDATE file_claims SET is_active = 0, released_at = ?1, deleted_reason = ?2 WHERE id = ?3",
        params![format_datetime(now), reason, id.to_string()],
    )?;
    Ok(())
}

/// Deactivate every active claim held by `session_id` (§4.5, used on
/// session release).
///
/// # Errors
/// Returns [`CoordError::Internal`] on a store failure.
pub fn release_all_for_session(tx: &Transaction<'_>, session_id: SessionId, now: DateTime<Utc>) -> Result<usize> {
    let affected = tx.execute(
        "UPDATE file_claims SET is_active = 0, released_at = ?1, deleted_reason = 'session_release'
         WHERE session_id = ?2 AND is_active = 1",
        params![format_datetime(now), session_id.to_string()],
    )?;
    Ok(affected)
}

/// Tombstone a claim as administratively removed by a stale sweep.
///
/// # Errors
/// Returns [`CoordError::Internal`] on a store failure.
pub fn mark_deleted_stale(tx: &Transaction<'_>, id: ClaimId, now: DateTime<Utc>) -> Result<()> {
    tx.execute(
        "UPDATE file_claims SET is_active = 0, deleted_at = ?1, deleted_reason = 'stale' WHERE id = ?2",
        params![format_datetime(now), id.to_string()],
    )?;
    Ok(())
}

/// Tombstone every active claim held by `session_id` as removed by a stale
/// sweep (as opposed to [`release_all_for_session`]'s explicit release).
///
/// # Errors
/// Returns [`CoordError::Internal`] on a store failure.
pub fn mark_all_deleted_stale_for_session(tx: &Transaction<'_>, session_id: SessionId, now: DateTime<Utc>) -> Result<usize> {
    let affected = tx.execute(
        "UPDATE file_claims SET is_active = 0, deleted_at = ?1, deleted_reason = 'stale'
         WHERE session_id = ?2 AND is_active = 1",
        params![format_datetime(now), session_id.to_string()],
    )?;
    Ok(affected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn sample(repo_path: &str, file_path: &str, mode: ClaimMode) -> FileClaim {
        let now = Utc::now();
        FileClaim {
            id: ClaimId::new(),
            session_id: SessionId::new(),
            repo_path: repo_path.into(),
            file_path: file_path.into(),
            claim_mode: mode,
            claimed_at: now,
            expires_at: now + chrono::Duration::hours(24),
            last_heartbeat: now,
            escalated_from: None,
            metadata: None,
            is_active: true,
            released_at: None,
            deleted_at: None,
            deleted_reason: None,
        }
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let claim = sample("/repo", "src/x.rs", ClaimMode::Exclusive);
        let id = claim.id;
        store.transaction(|tx| insert(tx, &claim)).unwrap();
        let fetched = store.transaction(|tx| get(tx, id)).unwrap();
        assert_eq!(fetched.claim_mode, ClaimMode::Exclusive);
    }

    #[test]
    fn list_active_for_file_excludes_expired() {
        let store = Store::open_in_memory().unwrap();
        let mut claim = sample("/repo", "src/x.rs", ClaimMode::Shared);
        claim.expires_at = Utc::now() - chrono::Duration::hours(1);
        store.transaction(|tx| insert(tx, &claim)).unwrap();
        let active = store
            .transaction(|tx| list_active_for_file(tx, std::path::Path::new("/repo"), std::path::Path::new("src/x.rs"), Utc::now(), None))
            .unwrap();
        assert!(active.is_empty());
    }

    #[test]
    fn list_active_for_file_excludes_given_session() {
        let store = Store::open_in_memory().unwrap();
        let claim = sample("/repo", "src/x.rs", ClaimMode::Shared);
        let holder = claim.session_id;
        store.transaction(|tx| insert(tx, &claim)).unwrap();
        let active = store
            .transaction(|tx| {
                list_active_for_file(tx, std::path::Path::new("/repo"), std::path::Path::new("src/x.rs"), Utc::now(), Some(holder))
            })
            .unwrap();
        assert!(active.is_empty());
    }

    #[test]
    fn escalate_updates_mode_and_records_prior() {
        let store = Store::open_in_memory().unwrap();
        let claim = sample("/repo", "src/x.rs", ClaimMode::Intent);
        let id = claim.id;
        store.transaction(|tx| insert(tx, &claim)).unwrap();
        store
            .transaction(|tx| escalate(tx, id, ClaimMode::Exclusive, ClaimMode::Intent, Utc::now()))
            .unwrap();
        let fetched = store.transaction(|tx| get(tx, id)).unwrap();
        assert_eq!(fetched.claim_mode, ClaimMode::Exclusive);
        assert_eq!(fetched.escalated_from, Some(ClaimMode::Intent));
    }

    #[test]
    fn release_all_for_session_deactivates_only_that_session() {
        let store = Store::open_in_memory().unwrap();
        let a = sample("/repo", "a.rs", ClaimMode::Shared);
        let b = sample("/repo", "b.rs", ClaimMode::Shared);
        let session_a = a.session_id;
        store
            .transaction(|tx| {
                insert(tx, &a)?;
                insert(tx, &b)
            })
            .unwrap();
        let released = store.transaction(|tx| release_all_for_session(tx, session_a, Utc::now())).unwrap();
        assert_eq!(released, 1);
        let remaining = store.transaction(|tx| list_for_session(tx, b.session_id)).unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[test]
    fn list_stale_finds_expired_and_heartbeat_stale() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();
        let mut expired = sample("/repo", "a.rs", ClaimMode::Shared);
        expired.expires_at = now - chrono::Duration::minutes(1);
        let mut stale_heartbeat = sample("/repo", "b.rs", ClaimMode::Shared);
        stale_heartbeat.last_heartbeat = now - chrono::Duration::hours(2);
        let fresh = sample("/repo", "c.rs", ClaimMode::Shared);
        store
            .transaction(|tx| {
                insert(tx, &expired)?;
                insert(tx, &stale_heartbeat)?;
                insert(tx, &fresh)
            })
            .unwrap();
        let stale = store
            .transaction(|tx| list_stale(tx, now, now - chrono::Duration::minutes(30)))
            .unwrap();
        assert_eq!(stale.len(), 2);
    }
}
