//! Session CRUD, heartbeat, and stale-query operations (§4.1, §4.4).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction};

use super::{format_datetime, parse_datetime};
use crate::error::{CoordError, Result};
use crate::model::ids::{SandboxId, SessionId};
use crate::model::session::{ExecutionMode, Session};

fn from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let id: String = row.get("id")?;
    let execution_mode: String = row.get("execution_mode")?;
    let sandbox_id: Option<String> = row.get("sandbox_id")?;
    let output_log: Option<String> = row.get("output_log")?;
    let budget_limit_cents: Option<i64> = row.get("budget_limit_cents")?;
    Ok(Session {
        id: id.parse().map_err(|_| rusqlite::Error::InvalidColumnType(0, "id".into(), rusqlite::types::Type::Text))?,
        pid: row.get::<_, i64>("pid")? as u32,
        repo_path: PathBuf::from(row.get::<_, String>("repo_path")?),
        worktree_path: PathBuf::from(row.get::<_, String>("worktree_path")?),
        worktree_name: row.get("worktree_name")?,
        is_main_repo: row.get::<_, i64>("is_main_repo")? != 0,
        created_at: row.get::<_, String>("created_at").map(|s| parse_datetime(&s).unwrap_or_default())?,
        last_heartbeat: row.get::<_, String>("last_heartbeat").map(|s| parse_datetime(&s).unwrap_or_default())?,
        execution_mode: ExecutionMode::parse(&execution_mode).unwrap_or_default(),
        sandbox_id: sandbox_id.and_then(|s| s.parse::<SandboxId>().ok()),
        prompt: row.get("prompt")?,
        status: row.get("status")?,
        output_log: output_log.map(PathBuf::from),
        budget_limit_cents: budget_limit_cents.map(|v| v as u64),
        template: row.get("template")?,
    })
}

/// Insert a new session row.
///
/// # Errors
/// Returns [`CoordError::Internal`] on a store failure.
pub fn insert(tx: &Transaction<'_>, session: &Session) -> Result<()> {
    tx.execute(
        "INSERT INTO sessions (
            id, pid, repo_path, worktree_path, worktree_name, is_main_repo,
            created_at, last_heartbeat, execution_mode, sandbox_id, prompt,
            status, output_log, budget_limit_cents, template
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            session.id.to_string(),
            i64::from(session.pid),
            session.repo_path.to_string_lossy(),
            session.worktree_path.to_string_lossy(),
            session.worktree_name,
            i64::from(session.is_main_repo),
            format_datetime(session.created_at),
            format_datetime(session.last_heartbeat),
            session.execution_mode.as_str(),
            session.sandbox_id.map(|s| s.to_string()),
            session.prompt,
            session.status,
            session.output_log.as_ref().map(|p| p.to_string_lossy().into_owned()),
            session.budget_limit_cents.map(|v| v as i64),
            session.template,
        ],
    )?;
    Ok(())
}

/// Fetch a session by id.
///
/// # Errors
/// Returns [`CoordError::NotFound`] if no session with that id exists.
pub fn get(tx: &Transaction<'_>, id: SessionId) -> Result<Session> {
    tx.query_row("SELECT * FROM sessions WHERE id = ?1", [id.to_string()], from_row)
        .optional()?
        .ok_or_else(|| CoordError::NotFound {
            kind: "session",
            id: id.to_string(),
        })
}

/// List every session for `repo_path` with `is_main_repo = true`.
///
/// # Errors
/// Returns [`CoordError::Internal`] on a store failure.
pub fn find_main_repo_session(tx: &Transaction<'_>, repo_path: &std::path::Path) -> Result<Option<Session>> {
    let found = tx
        .query_row(
            "SELECT * FROM sessions WHERE repo_path = ?1 AND is_main_repo = 1",
            [repo_path.to_string_lossy()],
            from_row,
        )
        .optional()?;
    Ok(found)
}

/// List every session for `repo_path`.
///
/// # Errors
/// Returns [`CoordError::Internal`] on a store failure.
pub fn list_for_repo(tx: &Transaction<'_>, repo_path: &std::path::Path) -> Result<Vec<Session>> {
    let mut stmt = tx.prepare("SELECT * FROM sessions WHERE repo_path = ?1 ORDER BY created_at")?;
    let rows = stmt.query_map([repo_path.to_string_lossy()], from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CoordError::from)
}

/// List every session in the store, across all repos (for cleanup sweeps).
///
/// # Errors
/// Returns [`CoordError::Internal`] on a store failure.
pub fn list_all(tx: &Transaction<'_>) -> Result<Vec<Session>> {
    let mut stmt = tx.prepare("SELECT * FROM sessions")?;
    let rows = stmt.query_map([], from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(CoordError::from)
}

/// Update a session's `last_heartbeat` (and optionally `status`) to `now`.
///
/// # Errors
/// Returns [`CoordError::NotFound`] if no session with that id exists.
pub fn heartbeat(tx: &Transaction<'_>, id: SessionId, now: DateTime<Utc>, status: Option<&str>) -> Result<()> {
    let affected = tx.execute(
        "UPDATE sessions SET last_heartbeat = ?1, status = COALESCE(?2, status) WHERE id = ?3",
        params![format_datetime(now), status, id.to_string()],
    )?;
    if affected == 0 {
        return Err(CoordError::NotFound {
            kind: "session",
            id: id.to_string(),
        });
    }
    Ok(())
}

/// Delete a session row outright (used on release and on stale sweep).
///
/// # Errors
/// Returns [`CoordError::Internal`] on a store failure.
pub fn delete(tx: &Transaction<'_>, id: SessionId) -> Result<()> {
    tx.execute("DELETE FROM sessions WHERE id = ?1", [id.to_string()])?;
    Ok(())
}
