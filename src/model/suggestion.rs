//! Auto-fix suggestion data model (§3, §4.7).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::conflict::ConflictType;
use super::ids::{ConflictResolutionId, SuggestionId};

/// A candidate resolution produced by the strategy chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutoFixSuggestion {
    /// Unique identifier.
    pub id: SuggestionId,
    /// The conflict resolution this suggestion was generated for.
    pub conflict_resolution_id: ConflictResolutionId,
    /// Canonical git toplevel path.
    pub repo_path: PathBuf,
    /// Repo-relative file path.
    pub file_path: PathBuf,
    /// Classification at generation time.
    pub conflict_type: ConflictType,
    /// The proposed resolved file content.
    pub suggested_resolution: String,
    /// Confidence in `[0, 1]`.
    pub confidence_score: f64,
    /// Human-readable rationale for the proposal.
    pub explanation: String,
    /// Name of the strategy that produced this suggestion (e.g.
    /// `"TrivialMerge"`).
    pub strategy_used: String,
    /// Base-side content at conflict time, for audit/diff display.
    pub base_content: Option<String>,
    /// Our-side content at conflict time.
    pub source_content: String,
    /// Their-side content at conflict time.
    pub target_content: String,
    /// When the suggestion was generated.
    pub generated_at: DateTime<Utc>,
    /// When the suggestion was applied, if it has been.
    pub applied_at: Option<DateTime<Utc>>,
    /// Whether the suggestion was applied without human review.
    pub was_auto_applied: bool,
}

impl AutoFixSuggestion {
    /// Mark this suggestion applied at `now`, recording whether it was
    /// applied automatically.
    pub fn mark_applied(&mut self, now: DateTime<Utc>, auto: bool) {
        self.applied_at = Some(now);
        self.was_auto_applied = auto;
    }
}
