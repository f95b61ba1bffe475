//! Conflict Engine: parse conflict markers, classify, generate and apply
//! resolutions (§4.7).

pub mod apply;
pub mod ast;
pub mod classify;
pub mod confidence;
pub mod parser;
pub mod strategies;

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::error::Result;
use crate::model::conflict::{ConflictResolution, ConflictType, ResolutionStrategyKind};
use crate::model::ids::{ConflictResolutionId, SessionId};
use crate::model::suggestion::AutoFixSuggestion;
use crate::store::{conflicts, suggestions, Store};
use crate::worktree::RepoPort;

pub use apply::{apply_suggestion, ApplyOutcome};
pub use ast::AstPort;
pub use classify::Severity;
pub use confidence::ConfidenceScorer;
pub use parser::ConflictMarkers;
pub use strategies::{Candidate, ResolutionStrategy};

/// Request parameters for [`detect_conflicts`].
#[derive(Debug, Clone)]
pub struct DetectConflictsRequest {
    /// The session's own branch.
    pub current_branch: String,
    /// The branch to check for conflicts against.
    pub target_branch: String,
    /// Whether to consult the AST port for structural/semantic
    /// classification.
    pub analyze_semantics: bool,
}

/// One file's conflict, classified and ready for resolution.
#[derive(Debug, Clone)]
pub struct DetectedConflict {
    /// Repo-relative file path (or `"unknown"`, see §9 Open Question (a)).
    pub file_path: PathBuf,
    /// The marker regions found in this file.
    pub markers: ConflictMarkers,
    /// The classification.
    pub conflict_type: ConflictType,
    /// The severity, derived from classification and region count (§4.7
    /// step 5).
    pub severity: Severity,
}

/// The outcome of [`detect_conflicts`]: every classified conflict found.
#[derive(Debug, Clone, Default)]
pub struct ConflictReport {
    /// Merge-base commit used for the simulation.
    pub base_commit: Option<String>,
    /// Every conflicted file, classified.
    pub conflicts: Vec<DetectedConflict>,
}

/// Find and classify conflicts between `current_branch` and
/// `target_branch` via a working-tree-free `merge-tree` simulation (§4.7
/// steps 1-5).
///
/// # Errors
/// Returns [`crate::error::CoordError::GitError`] if the underlying git
/// queries fail outright.
pub fn detect_conflicts(repo: &dyn RepoPort, ast: &dyn AstPort, req: &DetectConflictsRequest) -> Result<ConflictReport> {
    let ours = repo.rev_parse(&req.current_branch)?;
    let theirs = repo.rev_parse(&req.target_branch)?;
    let base = repo.merge_base(&ours, &theirs)?;

    let Some(base_commit) = base.clone() else {
        return Ok(ConflictReport {
            base_commit: None,
            conflicts: Vec::new(),
        });
    };

    let outcome = repo.merge_tree(&base_commit, &ours, &theirs)?;
    if outcome.clean {
        return Ok(ConflictReport {
            base_commit: base,
            conflicts: Vec::new(),
        });
    }

    let blocks = parser::split_into_blocks(&outcome.raw_output);
    let mut conflicts = Vec::new();
    for block in blocks {
        let markers = parser::parse_markers(&block.body);
        let conflict_type = classify::classify(&markers, ast, req.analyze_semantics);
        let severity = classify::severity(conflict_type, markers.regions.len());
        conflicts.push(DetectedConflict {
            file_path: block.file_path,
            markers,
            conflict_type,
            severity,
        });
    }

    Ok(ConflictReport {
        base_commit: base,
        conflicts,
    })
}

/// Run the strategy chain over every detected conflict, persist each
/// resolution and its candidates, and return the top `max_suggestions` per
/// file ordered by confidence descending.
///
/// # Errors
/// Returns [`crate::error::CoordError::Internal`] on a store failure.
#[allow(clippy::too_many_arguments)]
pub fn generate_suggestions(
    store: &Store,
    chain: &[Box<dyn ResolutionStrategy>],
    scorer: &ConfidenceScorer,
    session_id: Option<SessionId>,
    repo_path: &Path,
    report: &ConflictReport,
    source_commit: &str,
    target_commit: &str,
    max_suggestions: usize,
) -> Result<Vec<AutoFixSuggestion>> {
    let base_commit = report.base_commit.clone().unwrap_or_default();
    let mut all_suggestions = Vec::new();

    for conflict in &report.conflicts {
        let now = Utc::now();
        let resolution_id = ConflictResolutionId::new();
        let mut candidates: Vec<Candidate> = chain
            .iter()
            .filter(|strategy| strategy.can_handle(conflict))
            .map(|strategy| strategy.resolve(conflict))
            .collect();

        for candidate in &mut candidates {
            candidate.confidence = scorer.score(conflict, candidate);
        }
        candidates.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(std::cmp::Ordering::Equal));

        let resolution = ConflictResolution {
            id: resolution_id,
            session_id,
            repo_path: repo_path.to_path_buf(),
            file_path: conflict.file_path.clone(),
            conflict_type: conflict.conflict_type,
            base_commit: base_commit.clone(),
            source_commit: source_commit.to_owned(),
            target_commit: target_commit.to_owned(),
            resolution_strategy: ResolutionStrategyKind::Abandoned,
            confidence_score: candidates.first().map_or(0.0, |c| c.confidence),
            conflict_markers: conflict.markers.raw.clone(),
            resolved_content: None,
            detected_at: now,
            resolved_at: None,
            auto_fix_suggestion_id: None,
            metadata: None,
        };
        store.transaction(|tx| conflicts::insert(tx, &resolution))?;

        for candidate in candidates.into_iter().take(max_suggestions) {
            let suggestion = AutoFixSuggestion {
                id: crate::model::ids::SuggestionId::new(),
                conflict_resolution_id: resolution_id,
                repo_path: repo_path.to_path_buf(),
                file_path: conflict.file_path.clone(),
                conflict_type: conflict.conflict_type,
                suggested_resolution: candidate.content,
                confidence_score: candidate.confidence,
                explanation: candidate.explanation,
                strategy_used: candidate.strategy_name,
                base_content: conflict.markers.regions.first().and_then(|r| r.base.clone()),
                source_content: conflict.markers.regions.first().map(|r| r.ours.clone()).unwrap_or_default(),
                target_content: conflict.markers.regions.first().map(|r| r.theirs.clone()).unwrap_or_default(),
                generated_at: now,
                applied_at: None,
                was_auto_applied: false,
            };
            store.transaction(|tx| suggestions::insert(tx, &suggestion))?;
            all_suggestions.push(suggestion);
        }
    }

    all_suggestions.sort_by(|a, b| b.confidence_score.partial_cmp(&a.confidence_score).unwrap_or(std::cmp::Ordering::Equal));
    Ok(all_suggestions)
}
