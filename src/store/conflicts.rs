//! Conflict-resolution CRUD operations (§4.1, §4.7).

use std::path::PathBuf;

use rusqlite::{params, OptionalExtension, Row, Transaction};

use super::{decode_metadata, encode_metadata, format_datetime, parse_datetime};
use crate::error::{CoordError, Result};
use crate::model::conflict::{ConflictResolution, ConflictType, ResolutionStrategyKind};
use crate::model::ids::{ConflictResolutionId, SessionId, SuggestionId};

fn from_row(row: &Row<'_>) -> rusqlite::Result<ConflictResolution> {
    let id: String = row.get("id")?;
    let session_id: Option<String> = row.get("session_id")?;
    let conflict_type: String = row.get("conflict_type")?;
    let resolution_strategy: String = row.get("resolution_strategy")?;
    let suggestion_id: Option<String> = row.get("auto_fix_suggestion_id")?;
    let metadata: Option<String> = row.get("metadata")?;
    Ok(ConflictResolution {
        id: id.parse().unwrap_or_else(|_| ConflictResolutionId::new()),
        session_id: session_id.and_then(|s| s.parse::<SessionId>().ok()),
        repo_path: PathBuf::from(row.get::<_, String>("repo_path")?),
        file_path: PathBuf::from(row.get::<_, String>("file_path")?),
        conflict_type: ConflictType::parse(&conflict_type).unwrap_or(ConflictType::Unknown),
        base_commit: row.get("base_commit")?,
        source_commit: row.get("source_commit")?,
        target_commit: row.get("target_commit")?,
        resolution_strategy: ResolutionStrategyKind::parse(&resolution_strategy).unwrap_or(ResolutionStrategyKind::Abandoned),
        confidence_score: row.get("confidence_score")?,
        conflict_markers: row.get("conflict_markers")?,
        resolved_content: row.get("resolved_content")?,
        detected_at: parse_datetime(&row.get::<_, String>("detected_at")?).unwrap_or_default(),
        resolved_at: row
            .get::<_, Option<String>>("resolved_at")?
            .and_then(|s| parse_datetime(&s).ok()),
        auto_fix_suggestion_id: suggestion_id.and_then(|s| s.parse::<SuggestionId>().ok()),
        metadata: decode_metadata(metadata),
    })
}

/// Insert a new conflict-resolution row.
///
/// # Errors
/// Returns [`CoordError::Validation`] if `metadata` exceeds the size bound,
/// or [`CoordError::Internal`] on a store failure.
pub fn insert(tx: &Transaction<'_>, resolution: &ConflictResolution) -> Result<()> {
    let metadata = encode_metadata(resolution.metadata.as_ref())?;
    tx.execute(
        "INSERT INTO conflict_resolutions (
            id, session_id, repo_path, file_path, conflict_type, base_commit,
            source_commit, target_commit, resolution_strategy, confidence_score,
            conflict_markers, resolved_content, detected_at, resolved_at,
            auto_fix_suggestion_id, metadata
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            resolution.id.to_string(),
            resolution.session_id.map(|s| s.to_string()),
            resolution.repo_path.to_string_lossy(),
            resolution.file_path.to_string_lossy(),
            resolution.conflict_type.as_str(),
            resolution.base_commit,
            resolution.source_commit,
            resolution.target_commit,
            resolution.resolution_strategy.as_str(),
            resolution.confidence_score,
            resolution.conflict_markers,
            resolution.resolved_content,
            format_datetime(resolution.detected_at),
            resolution.resolved_at.map(format_datetime),
            resolution.auto_fix_suggestion_id.map(|s| s.to_string()),
            metadata,
        ],
    )?;
    Ok(())
}

/// Fetch a conflict resolution by id.
///
/// # Errors
/// Returns [`CoordError::NotFound`] if no resolution with that id exists.
pub fn get(tx: &Transaction<'_>, id: ConflictResolutionId) -> Result<ConflictResolution> {
    tx.query_row("SELECT * FROM conflict_resolutions WHERE id = ?1", [id.to_string()], from_row)
        .optional()?
        .ok_or_else(|| CoordError::NotFound {
            kind: "conflict_resolution",
            id: id.to_string(),
        })
}

/// Mark a conflict resolution resolved with the given final content and
/// strategy.
///
/// # Errors
/// Returns [`CoordError::NotFound`] if no resolution with that id exists.
pub fn mark_resolved(
    tx: &Transaction<'_>,
    id: ConflictResolutionId,
    resolved_content: &str,
    strategy: ResolutionStrategyKind,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    let affected = tx.execute(
        "UPDATE conflict_resolutions
         SET resolved_content = ?1, resolution_strategy = ?2, resolved_at = ?3
         WHERE id = ?4",
        params![resolved_content, strategy.as_str(), format_datetime(now), id.to_string()],
    )?;
    if affected == 0 {
        return Err(CoordError::NotFound {
            kind: "conflict_resolution",
            id: id.to_string(),
        });
    }
    Ok(())
}
