//! Applying an accepted suggestion to the working tree: backup, write,
//! verify, rollback on failure (§4.7's 5-step apply algorithm).

use std::fs;
use std::path::Path;

use chrono::Utc;

use crate::error::{CoordError, Result};
use crate::model::suggestion::AutoFixSuggestion;

/// What happened when a suggestion was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// The file that was written.
    pub file_path: std::path::PathBuf,
    /// Where the pre-apply content was backed up to.
    pub backup_path: std::path::PathBuf,
    /// Whether the written content still contains unresolved conflict
    /// markers (a verification failure).
    pub verified: bool,
}

/// Apply `suggestion`'s content to `repo_path`/`suggestion.file_path`:
///
/// 1. Back up the current file content next to it (`<file>.concord-bak`).
/// 2. Write the suggested content.
/// 3. Verify the written file no longer contains conflict markers.
/// 4. On verification failure, restore the backup and return an error.
/// 5. On success, remove the backup and mark the suggestion applied.
///
/// # Errors
/// Returns [`CoordError::Io`] on any filesystem failure, or
/// [`CoordError::Conflict`] if the written content still contains markers
/// (after the backup has already been restored).
pub fn apply_suggestion(repo_path: &Path, suggestion: &mut AutoFixSuggestion, auto_applied: bool) -> Result<ApplyOutcome> {
    let target = repo_path.join(&suggestion.file_path);
    let backup = backup_path(&target);

    let original = fs::read(&target)?;
    fs::write(&backup, &original)?;

    if let Err(err) = fs::write(&target, suggestion.suggested_resolution.as_bytes()) {
        restore_backup(&target, &backup);
        return Err(CoordError::from(err));
    }

    let written = fs::read_to_string(&target).unwrap_or_default();
    let verified = !contains_conflict_markers(&written);
    if !verified {
        restore_backup(&target, &backup);
        return Err(CoordError::Resolution {
            file_path: suggestion.file_path.clone(),
            detail: "applied content still contains conflict markers".to_owned(),
        });
    }

    drop(fs::remove_file(&backup));
    suggestion.mark_applied(Utc::now(), auto_applied);

    Ok(ApplyOutcome {
        file_path: target,
        backup_path: backup,
        verified,
    })
}

fn backup_path(target: &Path) -> std::path::PathBuf {
    let mut name = target.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".concord-bak");
    target.with_file_name(name)
}

fn restore_backup(target: &Path, backup: &Path) {
    if let Err(err) = fs::rename(backup, target) {
        tracing::error!(error = %err, target = %target.display(), "failed to restore backup after failed apply");
    }
}

fn contains_conflict_markers(content: &str) -> bool {
    content.lines().any(|line| line.starts_with("<<<<<<<") || line.starts_with(">>>>>>>") || line.starts_with("======="))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::conflict::ConflictType;
    use crate::model::ids::{ConflictResolutionId, SuggestionId};

    fn sample_suggestion(file_path: &Path) -> AutoFixSuggestion {
        AutoFixSuggestion {
            id: SuggestionId::new(),
            conflict_resolution_id: ConflictResolutionId::new(),
            repo_path: file_path.parent().unwrap().to_path_buf(),
            file_path: file_path.file_name().unwrap().into(),
            conflict_type: ConflictType::Trivial,
            suggested_resolution: "fn a() {}\nfn b() {}\n".to_owned(),
            confidence_score: 0.9,
            explanation: String::new(),
            strategy_used: "TrivialMerge".to_owned(),
            base_content: None,
            source_content: String::new(),
            target_content: String::new(),
            generated_at: Utc::now(),
            applied_at: None,
            was_auto_applied: false,
        }
    }

    #[test]
    fn apply_writes_content_and_marks_suggestion() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.rs");
        fs::write(&file, "<<<<<<< HEAD\nfn a() {}\n=======\nfn b() {}\n>>>>>>> feature\n").unwrap();

        let mut suggestion = sample_suggestion(&file);
        let outcome = apply_suggestion(dir.path(), &mut suggestion, true).unwrap();

        assert!(outcome.verified);
        assert_eq!(fs::read_to_string(&file).unwrap(), suggestion.suggested_resolution);
        assert!(suggestion.applied_at.is_some());
        assert!(!outcome.backup_path.exists());
    }

    #[test]
    fn apply_restores_backup_when_markers_remain() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f.rs");
        let original = "<<<<<<< HEAD\nfn a() {}\n=======\nfn b() {}\n>>>>>>> feature\n";
        fs::write(&file, original).unwrap();

        let mut suggestion = sample_suggestion(&file);
        suggestion.suggested_resolution = "<<<<<<< still broken\n".to_owned();
        let result = apply_suggestion(dir.path(), &mut suggestion, true);

        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&file).unwrap(), original);
    }
}
