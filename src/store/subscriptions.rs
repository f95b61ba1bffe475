//! Subscription CRUD + notify-by-branch operations (§4.1, §4.6).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Row, Transaction};

use super::{format_datetime, parse_datetime};
use crate::error::Result;
use crate::model::ids::{SessionId, SubscriptionId};
use crate::model::merge_event::Subscription;

fn from_row(row: &Row<'_>) -> rusqlite::Result<Subscription> {
    let id: String = row.get("id")?;
    let session_id: String = row.get("session_id")?;
    Ok(Subscription {
        id: id.parse().unwrap_or_else(|_| SubscriptionId::new()),
        session_id: session_id.parse().unwrap_or_else(|_| SessionId::new()),
        repo_path: PathBuf::from(row.get::<_, String>("repo_path")?),
        branch_name: row.get("branch_name")?,
        target_branch: row.get("target_branch")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?).unwrap_or_default(),
        notified_at: row
            .get::<_, Option<String>>("notified_at")?
            .and_then(|s| parse_datetime(&s).ok()),
        is_active: row.get::<_, i64>("is_active")? != 0,
    })
}

/// Insert a new subscription row.
///
/// # Errors
/// Returns [`crate::error::CoordError::Internal`] on a store failure.
pub fn insert(tx: &Transaction<'_>, sub: &Subscription) -> Result<()> {
    tx.execute(
        "INSERT INTO subscriptions (
            id, session_id, repo_path, branch_name, target_branch,
            created_at, notified_at, is_active
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            sub.id.to_string(),
            sub.session_id.to_string(),
            sub.repo_path.to_string_lossy(),
            sub.branch_name,
            sub.target_branch,
            format_datetime(sub.created_at),
            sub.notified_at.map(format_datetime),
            i64::from(sub.is_active),
        ],
    )?;
    Ok(())
}

/// List active subscriptions matching `(repo_path, branch_name,
/// target_branch)`, the set to notify when a matching merge is detected.
///
/// # Errors
/// Returns [`crate::error::CoordError::Internal`] on a store failure.
pub fn list_active_matching(tx: &Transaction<'_>, repo_path: &Path, branch_name: &str, target_branch: &str) -> Result<Vec<Subscription>> {
    let mut stmt = tx.prepare(
        "SELECT * FROM subscriptions
         WHERE repo_path = ?1 AND branch_name = ?2 AND target_branch = ?3 AND is_active = 1",
    )?;
    let rows = stmt.query_map(params![repo_path.to_string_lossy(), branch_name, target_branch], from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// List active subscriptions for a session.
///
/// # Errors
/// Returns [`crate::error::CoordError::Internal`] on a store failure.
pub fn list_for_session(tx: &Transaction<'_>, session_id: SessionId) -> Result<Vec<Subscription>> {
    let mut stmt = tx.prepare("SELECT * FROM subscriptions WHERE session_id = ?1 AND is_active = 1")?;
    let rows = stmt.query_map([session_id.to_string()], from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Mark a subscription notified and deactivate it (one-shot notification).
///
/// # Errors
/// Returns [`crate::error::CoordError::Internal`] on a store failure.
pub fn mark_notified(tx: &Transaction<'_>, id: SubscriptionId, now: DateTime<Utc>) -> Result<()> {
    tx.execute(
        "UPDATE subscriptions SET notified_at = ?1, is_active = 0 WHERE id = ?2",
        params![format_datetime(now), id.to_string()],
    )?;
    Ok(())
}
