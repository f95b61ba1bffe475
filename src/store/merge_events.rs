//! Merge-event create/list + unnotified-query operations (§4.1, §4.6).

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::{params, Row, Transaction};

use super::{format_datetime, parse_datetime};
use crate::error::Result;
use crate::model::ids::MergeEventId;
use crate::model::merge_event::MergeEvent;

fn from_row(row: &Row<'_>) -> rusqlite::Result<MergeEvent> {
    let id: String = row.get("id")?;
    Ok(MergeEvent {
        id: id.parse().unwrap_or_else(|_| MergeEventId::new()),
        repo_path: PathBuf::from(row.get::<_, String>("repo_path")?),
        branch_name: row.get("branch_name")?,
        source_commit: row.get("source_commit")?,
        target_branch: row.get("target_branch")?,
        target_commit: row.get("target_commit")?,
        merged_at: parse_datetime(&row.get::<_, String>("merged_at")?).unwrap_or_default(),
        detected_at: parse_datetime(&row.get::<_, String>("detected_at")?).unwrap_or_default(),
        notification_sent: row.get::<_, i64>("notification_sent")? != 0,
    })
}

/// Insert a newly observed merge event. Idempotent: a duplicate
/// `(repo_path, branch_name, target_branch, source_commit)` is silently
/// ignored (the unique index enforces this).
///
/// # Errors
/// Returns [`crate::error::CoordError::Internal`] on a store failure.
pub fn insert_if_new(tx: &Transaction<'_>, event: &MergeEvent) -> Result<bool> {
    let affected = tx.execute(
        "INSERT OR IGNORE INTO merge_events (
            id, repo_path, branch_name, source_commit, target_branch,
            target_commit, merged_at, detected_at, notification_sent
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            event.id.to_string(),
            event.repo_path.to_string_lossy(),
            event.branch_name,
            event.source_commit,
            event.target_branch,
            event.target_commit,
            format_datetime(event.merged_at),
            format_datetime(event.detected_at),
            i64::from(event.notification_sent),
        ],
    )?;
    Ok(affected > 0)
}

/// List merge events for `(repo_path, branch_name, target_branch)` that
/// have not yet had notifications dispatched.
///
/// # Errors
/// Returns [`crate::error::CoordError::Internal`] on a store failure.
pub fn list_unnotified(tx: &Transaction<'_>, repo_path: &Path, target_branch: &str) -> Result<Vec<MergeEvent>> {
    let mut stmt = tx.prepare(
        "SELECT * FROM merge_events WHERE repo_path = ?1 AND target_branch = ?2 AND notification_sent = 0
         ORDER BY detected_at",
    )?;
    let rows = stmt.query_map(params![repo_path.to_string_lossy(), target_branch], from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Mark a merge event as having had notifications dispatched.
///
/// # Errors
/// Returns [`crate::error::CoordError::Internal`] on a store failure.
pub fn mark_notified(tx: &Transaction<'_>, id: MergeEventId) -> Result<()> {
    tx.execute(
        "UPDATE merge_events SET notification_sent = 1 WHERE id = ?1",
        [id.to_string()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn sample(branch: &str, target: &str, source_commit: &str) -> MergeEvent {
        MergeEvent {
            id: MergeEventId::new(),
            repo_path: "/repo".into(),
            branch_name: branch.to_owned(),
            source_commit: source_commit.to_owned(),
            target_branch: target.to_owned(),
            target_commit: "b".repeat(40),
            merged_at: Utc::now(),
            detected_at: Utc::now(),
            notification_sent: false,
        }
    }

    #[test]
    fn duplicate_insert_is_ignored() {
        let store = Store::open_in_memory().unwrap();
        let event = sample("agent-1", "main", &"a".repeat(40));
        let inserted_first = store.transaction(|tx| insert_if_new(tx, &event)).unwrap();
        let inserted_second = store.transaction(|tx| insert_if_new(tx, &event)).unwrap();
        assert!(inserted_first);
        assert!(!inserted_second);
    }

    #[test]
    fn list_unnotified_then_mark_notified_empties_it() {
        let store = Store::open_in_memory().unwrap();
        let event = sample("agent-1", "main", &"a".repeat(40));
        let id = event.id;
        store.transaction(|tx| insert_if_new(tx, &event)).unwrap();
        let unnotified = store
            .transaction(|tx| list_unnotified(tx, std::path::Path::new("/repo"), "main"))
            .unwrap();
        assert_eq!(unnotified.len(), 1);
        store.transaction(|tx| mark_notified(tx, id)).unwrap();
        let unnotified = store
            .transaction(|tx| list_unnotified(tx, std::path::Path::new("/repo"), "main"))
            .unwrap();
        assert!(unnotified.is_empty());
    }
}
