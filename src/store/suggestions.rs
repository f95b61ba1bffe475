//! Suggestion CRUD + mark_applied operations (§4.1, §4.7).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction};

use super::{format_datetime, parse_datetime};
use crate::error::{CoordError, Result};
use crate::model::conflict::ConflictType;
use crate::model::ids::{ConflictResolutionId, SuggestionId};
use crate::model::suggestion::AutoFixSuggestion;

fn from_row(row: &Row<'_>) -> rusqlite::Result<AutoFixSuggestion> {
    let id: String = row.get("id")?;
    let conflict_resolution_id: String = row.get("conflict_resolution_id")?;
    let conflict_type: String = row.get("conflict_type")?;
    Ok(AutoFixSuggestion {
        id: id.parse().unwrap_or_else(|_| SuggestionId::new()),
        conflict_resolution_id: conflict_resolution_id.parse().unwrap_or_else(|_| ConflictResolutionId::new()),
        repo_path: PathBuf::from(row.get::<_, String>("repo_path")?),
        file_path: PathBuf::from(row.get::<_, String>("file_path")?),
        conflict_type: ConflictType::parse(&conflict_type).unwrap_or(ConflictType::Unknown),
        suggested_resolution: row.get("suggested_resolution")?,
        confidence_score: row.get("confidence_score")?,
        explanation: row.get("explanation")?,
        strategy_used: row.get("strategy_used")?,
        base_content: row.get("base_content")?,
        source_content: row.get("source_content")?,
        target_content: row.get("target_content")?,
        generated_at: parse_datetime(&row.get::<_, String>("generated_at")?).unwrap_or_default(),
        applied_at: row
            .get::<_, Option<String>>("applied_at")?
            .and_then(|s| parse_datetime(&s).ok()),
        was_auto_applied: row.get::<_, i64>("was_auto_applied")? != 0,
    })
}

/// Insert a new suggestion row.
///
/// # Errors
/// Returns [`CoordError::Internal`] on a store failure.
pub fn insert(tx: &Transaction<'_>, suggestion: &AutoFixSuggestion) -> Result<()> {
    tx.execute(
        "INSERT INTO auto_fix_suggestions (
            id, conflict_resolution_id, repo_path, file_path, conflict_type,
            suggested_resolution, confidence_score, explanation, strategy_used,
            base_content, source_content, target_content, generated_at,
            applied_at, was_auto_applied
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            suggestion.id.to_string(),
            suggestion.conflict_resolution_id.to_string(),
            suggestion.repo_path.to_string_lossy(),
            suggestion.file_path.to_string_lossy(),
            suggestion.conflict_type.as_str(),
            suggestion.suggested_resolution,
            suggestion.confidence_score,
            suggestion.explanation,
            suggestion.strategy_used,
            suggestion.base_content,
            suggestion.source_content,
            suggestion.target_content,
            format_datetime(suggestion.generated_at),
            suggestion.applied_at.map(format_datetime),
            i64::from(suggestion.was_auto_applied),
        ],
    )?;
    Ok(())
}

/// Fetch a suggestion by id.
///
/// # Errors
/// Returns [`CoordError::NotFound`] if no suggestion with that id exists.
pub fn get(tx: &Transaction<'_>, id: SuggestionId) -> Result<AutoFixSuggestion> {
    tx.query_row("SELECT * FROM auto_fix_suggestions WHERE id = ?1", [id.to_string()], from_row)
        .optional()?
        .ok_or_else(|| CoordError::NotFound {
            kind: "suggestion",
            id: id.to_string(),
        })
}

/// List suggestions generated for a given conflict resolution, ordered by
/// confidence descending.
///
/// # Errors
/// Returns [`CoordError::Internal`] on a store failure.
pub fn list_for_resolution(tx: &Transaction<'_>, resolution_id: ConflictResolutionId) -> Result<Vec<AutoFixSuggestion>> {
    let mut stmt = tx.prepare(
        "SELECT * FROM auto_fix_suggestions WHERE conflict_resolution_id = ?1 ORDER BY confidence_score DESC",
    )?;
    let rows = stmt.query_map([resolution_id.to_string()], from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
}

/// Mark a suggestion applied.
///
/// # Errors
/// Returns [`CoordError::NotFound`] if no suggestion with that id exists.
pub fn mark_applied(tx: &Transaction<'_>, id: SuggestionId, now: DateTime<Utc>, auto: bool) -> Result<()> {
    let affected = tx.execute(
        "UPDATE auto_fix_suggestions SET applied_at = ?1, was_auto_applied = ?2 WHERE id = ?3",
        params![format_datetime(now), i64::from(auto), id.to_string()],
    )?;
    if affected == 0 {
        return Err(CoordError::NotFound {
            kind: "suggestion",
            id: id.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    fn sample() -> AutoFixSuggestion {
        AutoFixSuggestion {
            id: SuggestionId::new(),
            conflict_resolution_id: ConflictResolutionId::new(),
            repo_path: "/repo".into(),
            file_path: "src/lib.rs".into(),
            conflict_type: ConflictType::Trivial,
            suggested_resolution: "merged".to_owned(),
            confidence_score: 0.9,
            explanation: "non-overlapping".to_owned(),
            strategy_used: "TrivialMerge".to_owned(),
            base_content: None,
            source_content: "ours".to_owned(),
            target_content: "theirs".to_owned(),
            generated_at: Utc::now(),
            applied_at: None,
            was_auto_applied: false,
        }
    }

    #[test]
    fn insert_and_list_for_resolution_ordered_by_confidence() {
        let store = Store::open_in_memory().unwrap();
        let resolution_id = ConflictResolutionId::new();
        let mut high = sample();
        high.conflict_resolution_id = resolution_id;
        high.confidence_score = 0.9;
        let mut low = sample();
        low.conflict_resolution_id = resolution_id;
        low.confidence_score = 0.3;
        store
            .transaction(|tx| {
                insert(tx, &low)?;
                insert(tx, &high)
            })
            .unwrap();
        let listed = store.transaction(|tx| list_for_resolution(tx, resolution_id)).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].confidence_score >= listed[1].confidence_score);
    }

    #[test]
    fn mark_applied_sets_fields() {
        let store = Store::open_in_memory().unwrap();
        let suggestion = sample();
        let id = suggestion.id;
        store.transaction(|tx| insert(tx, &suggestion)).unwrap();
        store.transaction(|tx| mark_applied(tx, id, Utc::now(), true)).unwrap();
        let fetched = store.transaction(|tx| get(tx, id)).unwrap();
        assert!(fetched.was_auto_applied);
        assert!(fetched.applied_at.is_some());
    }
}
