//! Merge-event and subscription data model (§3, §4.6).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{MergeEventId, SessionId, SubscriptionId};

/// A detected branch→target merge.
///
/// Unique per `(repo_path, branch_name, target_branch, source_commit)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergeEvent {
    /// Unique event identifier.
    pub id: MergeEventId,
    /// Canonical git toplevel path.
    pub repo_path: PathBuf,
    /// The branch that was merged.
    pub branch_name: String,
    /// The branch tip commit that was merged (the merge source).
    pub source_commit: String,
    /// The branch the source was merged into.
    pub target_branch: String,
    /// The target branch tip commit after the merge.
    pub target_commit: String,
    /// When the merge actually happened (best-effort, from commit metadata).
    pub merged_at: DateTime<Utc>,
    /// When the Merge Detector observed it.
    pub detected_at: DateTime<Utc>,
    /// Whether every matching subscription has been notified.
    pub notification_sent: bool,
}

/// A session's request to be notified when `branch_name` merges into
/// `target_branch`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique subscription identifier.
    pub id: SubscriptionId,
    /// The subscribing session.
    pub session_id: SessionId,
    /// Canonical git toplevel path.
    pub repo_path: PathBuf,
    /// The branch being watched.
    pub branch_name: String,
    /// The branch it should merge into.
    pub target_branch: String,
    /// When the subscription was created.
    pub created_at: DateTime<Utc>,
    /// When the subscription was notified of a matching merge, if ever.
    pub notified_at: Option<DateTime<Utc>>,
    /// Whether the subscription is still active (awaiting a merge).
    pub is_active: bool,
}
