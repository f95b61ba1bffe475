//! Session data model (§3).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::SessionId;

pub use super::ids::SandboxId;

/// Where a session executes: the operator's own machine, or a remote
/// sandbox VM driven by the Sandbox Controller (§4.8).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Runs locally against the allocated worktree or main checkout.
    #[default]
    Local,
    /// Runs against a remote sandbox VM.
    Remote,
}

impl ExecutionMode {
    /// Parse from the store's persisted column value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(Self::Local),
            "remote" => Some(Self::Remote),
            _ => None,
        }
    }

    /// The store's persisted column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
        }
    }
}

/// A registered coordination session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: SessionId,
    /// OS process id this session belongs to.
    pub pid: u32,
    /// Canonical git toplevel path.
    pub repo_path: PathBuf,
    /// Absolute path to the workspace this session operates in.
    pub worktree_path: PathBuf,
    /// Worktree name, or `None` when running in the main checkout.
    pub worktree_name: Option<String>,
    /// Whether this session owns the main checkout (as opposed to a
    /// sibling worktree).
    pub is_main_repo: bool,
    /// When this session was registered.
    pub created_at: DateTime<Utc>,
    /// Last heartbeat timestamp.
    pub last_heartbeat: DateTime<Utc>,
    /// Local or remote execution.
    pub execution_mode: ExecutionMode,
    /// Remote sandbox identifier, if `execution_mode == Remote`.
    pub sandbox_id: Option<SandboxId>,
    /// The agent prompt/task description, if recorded.
    pub prompt: Option<String>,
    /// Free-form status string (e.g. `"running"`, `"idle"`, `"failed"`).
    pub status: Option<String>,
    /// Path to a captured output log, if any.
    pub output_log: Option<PathBuf>,
    /// Per-session spend limit in integer cents, if capped.
    pub budget_limit_cents: Option<u64>,
    /// Name of the workspace template this session was created from.
    pub template: Option<String>,
}

impl Session {
    /// Invariant: `worktree_name = None` iff `is_main_repo = true` (§3).
    #[must_use]
    pub const fn worktree_invariant_holds(&self) -> bool {
        self.worktree_name.is_none() == self.is_main_repo
    }
}

/// A session annotated with liveness and age, as returned by
/// [`crate::coordinator::Coordinator::status`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// The underlying session row.
    #[serde(flatten)]
    pub session: Session,
    /// Whether the owning process is currently alive.
    pub is_alive: bool,
    /// Minutes since `created_at`.
    pub duration_minutes: i64,
}
