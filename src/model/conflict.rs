//! Conflict classification and resolution data model (§3, §4.7).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{ConflictResolutionId, SessionId, SuggestionId};

/// How a conflict has been classified, ordered roughly by how confidently
/// it can be auto-resolved.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictType {
    /// Non-overlapping hunks merged cleanly by git's own three-way merge.
    Trivial,
    /// Overlapping hunks with a clear AST-level resolution (e.g. both sides
    /// added distinct top-level items).
    Structural,
    /// Overlapping hunks that touch the same logical construct; requires
    /// semantic understanding to resolve safely.
    Semantic,
    /// Both sides edited the same region in incompatible ways with no
    /// obvious precedence.
    ConcurrentEdit,
    /// Could not be classified (unparseable markers, binary content, …).
    Unknown,
}

impl ConflictType {
    /// The complexity factor used by the confidence scorer (§4.7).
    #[must_use]
    pub const fn complexity_factor(self) -> f64 {
        match self {
            Self::Trivial => 1.0,
            Self::Structural => 0.8,
            Self::ConcurrentEdit => 0.5,
            Self::Semantic => 0.3,
            Self::Unknown => 0.2,
        }
    }

    /// Parse from the store's persisted column value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "TRIVIAL" => Some(Self::Trivial),
            "STRUCTURAL" => Some(Self::Structural),
            "SEMANTIC" => Some(Self::Semantic),
            "CONCURRENT_EDIT" => Some(Self::ConcurrentEdit),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }

    /// The store's persisted column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trivial => "TRIVIAL",
            Self::Structural => "STRUCTURAL",
            Self::Semantic => "SEMANTIC",
            Self::ConcurrentEdit => "CONCURRENT_EDIT",
            Self::Unknown => "UNKNOWN",
        }
    }
}

/// How a conflict resolution was arrived at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionStrategyKind {
    /// A candidate was generated and applied without human review.
    AutoFix,
    /// A human resolved the conflict directly.
    Manual,
    /// An auto-generated candidate was applied after human review/edit.
    Hybrid,
    /// No resolution was produced or accepted.
    Abandoned,
}

impl ResolutionStrategyKind {
    /// Parse from the store's persisted column value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AUTO_FIX" => Some(Self::AutoFix),
            "MANUAL" => Some(Self::Manual),
            "HYBRID" => Some(Self::Hybrid),
            "ABANDONED" => Some(Self::Abandoned),
            _ => None,
        }
    }

    /// The store's persisted column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AutoFix => "AUTO_FIX",
            Self::Manual => "MANUAL",
            Self::Hybrid => "HYBRID",
            Self::Abandoned => "ABANDONED",
        }
    }
}

/// A parsed conflict marker region within a single file, as produced by
/// splitting `git merge-tree` output (§4.7 step 3).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictBlock {
    /// The file the block belongs to. `"unknown"` when the header could not
    /// be parsed.
    pub file_path: PathBuf,
    /// Content between the base marker (`|||||||`) and `=======`, if the
    /// block used diff3 (three-way) markers.
    pub base_content: Option<String>,
    /// Content between `<<<<<<<` (or `|||||||`) and `=======`.
    pub ours_content: String,
    /// Content between `=======` and `>>>>>>>`.
    pub theirs_content: String,
}

/// A persisted record of one conflict's lifecycle, from detection through
/// resolution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// Unique identifier.
    pub id: ConflictResolutionId,
    /// The session that triggered detection, if any (merge-detector-driven
    /// detections have no owning session).
    pub session_id: Option<SessionId>,
    /// Canonical git toplevel path.
    pub repo_path: PathBuf,
    /// Repo-relative file path (or `"unknown"`).
    pub file_path: PathBuf,
    /// Classification.
    pub conflict_type: ConflictType,
    /// Merge-base commit.
    pub base_commit: String,
    /// The session's own branch tip commit.
    pub source_commit: String,
    /// The target branch tip commit being merged against.
    pub target_commit: String,
    /// How (or whether) it was resolved.
    pub resolution_strategy: ResolutionStrategyKind,
    /// Confidence of the chosen resolution, in `[0, 1]`.
    pub confidence_score: f64,
    /// Verbatim conflict markers as produced by `merge-tree`.
    pub conflict_markers: String,
    /// The final resolved file content, once resolved.
    pub resolved_content: Option<String>,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
    /// When it was resolved, if it has been.
    pub resolved_at: Option<DateTime<Utc>>,
    /// The suggestion that was applied, if any.
    pub auto_fix_suggestion_id: Option<SuggestionId>,
    /// Opaque extra metadata.
    pub metadata: Option<Value>,
}
