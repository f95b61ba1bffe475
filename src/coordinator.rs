//! Coordinator: session registration, heartbeat, release, status, and
//! cleanup sweep (§4.4).

use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{Duration, Utc};

use crate::claims::ClaimsManager;
use crate::error::Result;
use crate::liveness::Liveness;
use crate::model::ids::SessionId;
use crate::model::session::{ExecutionMode, Session, SessionStatus};
use crate::store::{sessions, Store};
use crate::worktree::{generate_worktree_name, WorktreePort};

/// Default prefix for generated worktree names (§4.3).
pub const DEFAULT_WORKTREE_PREFIX: &str = "parallel-";

/// Default staleness threshold for the cleanup sweep, in minutes.
pub const DEFAULT_STALE_THRESHOLD_MINUTES: i64 = 30;

/// The result of [`Coordinator::register`].
#[derive(Debug, Clone)]
pub struct RegisterResult {
    /// The registered (or pre-existing) session's id.
    pub session_id: SessionId,
    /// Path to the workspace this session should operate in.
    pub worktree_path: PathBuf,
    /// Worktree name, or `None` in the main checkout.
    pub worktree_name: Option<String>,
    /// Whether this session owns the main checkout.
    pub is_main_repo: bool,
    /// Count of active sessions in the same repo at registration time,
    /// including this session itself.
    pub parallel_sessions: usize,
    /// Whether a new row was created (`false` if `pid` was already
    /// registered).
    pub is_new: bool,
    /// Set when worktree creation failed and the session fell back to the
    /// main checkout in degraded mode.
    pub degraded_reason: Option<String>,
}

/// The result of [`Coordinator::release`].
#[derive(Debug, Clone, Default)]
pub struct ReleaseResult {
    /// Whether a session row was found and released.
    pub released: bool,
    /// Whether the owned worktree was also removed.
    pub worktree_removed: bool,
}

/// The result of [`Coordinator::cleanup`].
#[derive(Debug, Clone, Default)]
pub struct CleanupResult {
    /// Number of stale session rows removed.
    pub sessions: usize,
    /// Number of worktrees removed as part of the sweep.
    pub worktrees_removed: usize,
}

/// Every session in a repo, annotated with liveness and age.
#[derive(Debug, Clone, Default)]
pub struct StatusResult {
    /// The repo these sessions belong to, when filtered to one repo.
    pub repo_path: Option<PathBuf>,
    /// Annotated session rows.
    pub sessions: Vec<SessionStatus>,
}

/// Coordinates session lifecycle on top of the store, the worktree port,
/// and the liveness oracle.
pub struct Coordinator<'a> {
    store: &'a Store,
    worktree: &'a dyn WorktreePort,
    liveness: &'a dyn Liveness,
    worktree_prefix: String,
    stale_threshold: Duration,
    auto_cleanup_worktrees: bool,
}

impl<'a> Coordinator<'a> {
    /// Build a coordinator over the given store, worktree port, and
    /// liveness oracle, using default prefix/threshold/auto-cleanup
    /// settings.
    #[must_use]
    pub fn new(store: &'a Store, worktree: &'a dyn WorktreePort, liveness: &'a dyn Liveness) -> Self {
        Self {
            store,
            worktree,
            liveness,
            worktree_prefix: DEFAULT_WORKTREE_PREFIX.to_owned(),
            stale_threshold: Duration::minutes(DEFAULT_STALE_THRESHOLD_MINUTES),
            auto_cleanup_worktrees: true,
        }
    }

    /// Override the worktree name prefix.
    #[must_use]
    pub fn with_worktree_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.worktree_prefix = prefix.into();
        self
    }

    /// Override the staleness threshold used by `status` and `cleanup`.
    #[must_use]
    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    /// Canonicalize `repo_path` via `git rev-parse --show-toplevel`,
    /// falling back to the input verbatim (logged at `warn`) on failure.
    #[must_use]
    pub fn canonicalize_repo_path(repo_path: &Path) -> PathBuf {
        let output = Command::new("git")
            .args(["rev-parse", "--show-toplevel"])
            .current_dir(repo_path)
            .output();
        match output {
            Ok(out) if out.status.success() => {
                let text = String::from_utf8_lossy(&out.stdout).trim().to_owned();
                if text.is_empty() {
                    repo_path.to_path_buf()
                } else {
                    PathBuf::from(text)
                }
            }
            _ => {
                tracing::warn!(path = %repo_path.display(), "could not canonicalize repo path via git rev-parse, using as-is");
                repo_path.to_path_buf()
            }
        }
    }

    /// Register a session for `pid` against `repo_path` (§4.4).
    ///
    /// # Errors
    /// Returns [`crate::error::CoordError::Internal`] on a store failure.
    pub fn register(&self, repo_path: &Path, pid: u32) -> Result<RegisterResult> {
        let repo_path = Self::canonicalize_repo_path(repo_path);
        self.sweep_stale_sessions_best_effort(&repo_path);

        self.store.transaction(|tx| {
            let existing = sessions::list_for_repo(tx, &repo_path)?
                .into_iter()
                .find(|s| s.pid == pid);
            if let Some(session) = existing {
                let active_count = sessions::list_for_repo(tx, &repo_path)?
                    .iter()
                    .filter(|s| s.id != session.id && self.liveness.is_alive(s.pid))
                    .count();
                return Ok(RegisterResult {
                    session_id: session.id,
                    worktree_path: session.worktree_path,
                    worktree_name: session.worktree_name,
                    is_main_repo: session.is_main_repo,
                    parallel_sessions: active_count + 1,
                    is_new: false,
                    degraded_reason: None,
                });
            }

            let active_sessions = sessions::list_for_repo(tx, &repo_path)?;
            let active_count = active_sessions.iter().filter(|s| self.liveness.is_alive(s.pid)).count();

            let now = Utc::now();
            let (worktree_path, worktree_name, is_main_repo, degraded_reason) = if active_count == 0 {
                (repo_path.clone(), None, true, None)
            } else {
                let name = generate_worktree_name(&self.worktree_prefix);
                match self.worktree.create(&name, "HEAD") {
                    Ok(handle) => (handle.path, Some(handle.name), false, None),
                    Err(err) => {
                        tracing::error!(error = %err, "worktree creation failed, falling back to main checkout");
                        (repo_path.clone(), None, true, Some(err.to_string()))
                    }
                }
            };

            let session = Session {
                id: SessionId::new(),
                pid,
                repo_path: repo_path.clone(),
                worktree_path: worktree_path.clone(),
                worktree_name: worktree_name.clone(),
                is_main_repo,
                created_at: now,
                last_heartbeat: now,
                execution_mode: ExecutionMode::Local,
                sandbox_id: None,
                prompt: None,
                status: None,
                output_log: None,
                budget_limit_cents: None,
                template: None,
            };
            sessions::insert(tx, &session)?;

            Ok(RegisterResult {
                session_id: session.id,
                worktree_path,
                worktree_name,
                is_main_repo,
                parallel_sessions: active_count + 1,
                is_new: true,
                degraded_reason,
            })
        })
    }

    /// Update `pid`'s session heartbeat. Returns `true` if a session was
    /// found.
    ///
    /// # Errors
    /// Returns [`crate::error::CoordError::Internal`] on a store failure.
    pub fn heartbeat(&self, repo_path: &Path, pid: u32) -> Result<bool> {
        let repo_path = Self::canonicalize_repo_path(repo_path);
        self.store.transaction(|tx| {
            let session = sessions::list_for_repo(tx, &repo_path)?.into_iter().find(|s| s.pid == pid);
            match session {
                Some(session) => {
                    sessions::heartbeat(tx, session.id, Utc::now(), None)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })
    }

    /// Release `pid`'s session: release its claims, delete its row, and
    /// best-effort remove its worktree (§4.4).
    ///
    /// # Errors
    /// Returns [`crate::error::CoordError::Internal`] on a store failure.
    pub fn release(&self, repo_path: &Path, pid: u32) -> Result<ReleaseResult> {
        let repo_path = Self::canonicalize_repo_path(repo_path);
        let session = self
            .store
            .transaction(|tx| Ok(sessions::list_for_repo(tx, &repo_path)?.into_iter().find(|s| s.pid == pid)))?;

        let Some(session) = session else {
            return Ok(ReleaseResult::default());
        };

        self.store.transaction(|tx| {
            crate::store::claims::release_all_for_session(tx, session.id, Utc::now())?;
            sessions::delete(tx, session.id)
        })?;

        let mut worktree_removed = false;
        if self.auto_cleanup_worktrees {
            if let Some(name) = &session.worktree_name {
                match self.worktree.remove(name, false) {
                    Ok(()) => worktree_removed = true,
                    Err(err) => tracing::warn!(error = %err, worktree = %name, "worktree removal failed during release"),
                }
            }
        }

        Ok(ReleaseResult {
            released: true,
            worktree_removed,
        })
    }

    /// Snapshot every session for `repo_path` (or every session across all
    /// repos, if `None`), annotated with liveness and age.
    ///
    /// # Errors
    /// Returns [`crate::error::CoordError::Internal`] on a store failure.
    pub fn status(&self, repo_path: Option<&Path>) -> Result<StatusResult> {
        let now = Utc::now();
        let sessions = self.store.transaction(|tx| match repo_path {
            Some(p) => sessions::list_for_repo(tx, p),
            None => sessions::list_all(tx),
        })?;
        let annotated = sessions
            .into_iter()
            .map(|session| SessionStatus {
                is_alive: self.liveness.is_alive(session.pid),
                duration_minutes: (now - session.created_at).num_minutes(),
                session,
            })
            .collect();
        Ok(StatusResult {
            repo_path: repo_path.map(Path::to_path_buf),
            sessions: annotated,
        })
    }

    /// Sweep every session in the store whose process is dead or whose
    /// heartbeat is stale, releasing claims and removing worktrees
    /// best-effort (§4.4).
    ///
    /// Concurrent callers are serialized by an advisory CAS lock on
    /// `schema_metadata.last_claim_cleanup`: a sweeper that finds the lock
    /// held more recently than a minute ago returns
    /// [`CleanupResult::default`] immediately rather than blocking.
    ///
    /// # Errors
    /// Returns [`crate::error::CoordError::Internal`] on a store failure.
    pub fn cleanup(&self) -> Result<CleanupResult> {
        let now = Utc::now();
        let acquired = self.store.transaction(|tx| crate::store::schema_metadata::try_acquire_cleanup_lock(tx, now))?;
        if !acquired {
            return Ok(CleanupResult::default());
        }

        let stale_cutoff = now - self.stale_threshold;
        let stale_sessions = self.store.transaction(|tx| {
            let all = sessions::list_all(tx)?;
            let stale: Vec<Session> = all
                .into_iter()
                .filter(|s| !self.liveness.is_alive(s.pid) || s.last_heartbeat < stale_cutoff)
                .collect();
            for session in &stale {
                crate::store::claims::mark_all_deleted_stale_for_session(tx, session.id, now)?;
                sessions::delete(tx, session.id)?;
            }
            Ok(stale)
        })?;

        let mut worktrees_removed = 0usize;
        if self.auto_cleanup_worktrees {
            for session in &stale_sessions {
                if let Some(name) = &session.worktree_name {
                    match self.worktree.remove(name, false) {
                        Ok(()) => worktrees_removed += 1,
                        Err(err) => tracing::warn!(error = %err, worktree = %name, "worktree removal failed during cleanup sweep"),
                    }
                }
            }
        }

        Ok(CleanupResult {
            sessions: stale_sessions.len(),
            worktrees_removed,
        })
    }

    /// Best-effort opportunistic sweep run at the start of `register`,
    /// swallowing errors since a failed sweep must never block
    /// registration.
    fn sweep_stale_sessions_best_effort(&self, repo_path: &Path) {
        let now = Utc::now();
        let stale_cutoff = now - self.stale_threshold;
        let result = self.store.transaction(|tx| {
            let sessions_in_repo = sessions::list_for_repo(tx, repo_path)?;
            let stale: Vec<Session> = sessions_in_repo
                .into_iter()
                .filter(|s| !self.liveness.is_alive(s.pid) || s.last_heartbeat < stale_cutoff)
                .collect();
            for session in &stale {
                crate::store::claims::mark_all_deleted_stale_for_session(tx, session.id, now)?;
                sessions::delete(tx, session.id)?;
            }
            Ok(stale)
        });
        match result {
            Ok(stale) => {
                if self.auto_cleanup_worktrees {
                    for session in stale {
                        if let Some(name) = &session.worktree_name {
                            drop(self.worktree.remove(name, false));
                        }
                    }
                }
            }
            Err(err) => tracing::warn!(error = %err, "opportunistic stale-session sweep failed"),
        }
    }

    /// A claims manager scoped to this coordinator's store.
    #[must_use]
    pub fn claims(&self) -> ClaimsManager<'a> {
        ClaimsManager::new(self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::liveness::FakeLiveness;
    use crate::worktree::WorktreeHandle;
    use std::sync::Mutex;

    struct StubWorktree {
        fail: bool,
        created: Mutex<Vec<String>>,
        removed: Mutex<Vec<String>>,
    }

    impl StubWorktree {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                created: Mutex::new(Vec::new()),
                removed: Mutex::new(Vec::new()),
            }
        }
    }

    impl WorktreePort for StubWorktree {
        fn create(&self, name: &str, _base_ref: &str) -> Result<WorktreeHandle> {
            if self.fail {
                return Err(crate::error::CoordError::GitError {
                    command: "git worktree add".to_owned(),
                    stderr: "stub failure".to_owned(),
                });
            }
            self.created.lock().unwrap().push(name.to_owned());
            Ok(WorktreeHandle {
                name: name.to_owned(),
                path: PathBuf::from("/repo/ws").join(name),
                branch: name.to_owned(),
                head: "a".repeat(40),
            })
        }

        fn path_for(&self, name: &str) -> PathBuf {
            PathBuf::from("/repo/ws").join(name)
        }

        fn remove(&self, name: &str, _delete_branch: bool) -> Result<()> {
            self.removed.lock().unwrap().push(name.to_owned());
            Ok(())
        }

        fn list(&self) -> Result<Vec<WorktreeHandle>> {
            Ok(Vec::new())
        }
    }

    fn no_canon_repo() -> PathBuf {
        // canonicalize_repo_path shells out to git; in a non-repo tempdir it
        // falls back to the input path, which is what these unit tests want.
        std::env::temp_dir().join(format!("concord-test-{}", std::process::id()))
    }

    #[test]
    fn first_registration_becomes_main_repo() {
        let store = Store::open_in_memory().unwrap();
        let worktree = StubWorktree::new(false);
        let liveness = FakeLiveness::new(Utc::now());
        liveness.mark_alive(1);
        let coordinator = Coordinator::new(&store, &worktree, &liveness);
        let repo = no_canon_repo();
        let result = coordinator.register(&repo, 1).unwrap();
        assert!(result.is_main_repo);
        assert!(result.worktree_name.is_none());
        assert!(result.is_new);
    }

    #[test]
    fn second_registration_gets_a_worktree() {
        let store = Store::open_in_memory().unwrap();
        let worktree = StubWorktree::new(false);
        let liveness = FakeLiveness::new(Utc::now());
        liveness.mark_alive(1);
        liveness.mark_alive(2);
        let coordinator = Coordinator::new(&store, &worktree, &liveness);
        let repo = no_canon_repo();
        coordinator.register(&repo, 1).unwrap();
        let second = coordinator.register(&repo, 2).unwrap();
        assert!(!second.is_main_repo);
        assert!(second.worktree_name.is_some());
        assert_eq!(second.parallel_sessions, 2);
    }

    #[test]
    fn re_registering_same_pid_returns_existing_row() {
        let store = Store::open_in_memory().unwrap();
        let worktree = StubWorktree::new(false);
        let liveness = FakeLiveness::new(Utc::now());
        liveness.mark_alive(1);
        let coordinator = Coordinator::new(&store, &worktree, &liveness);
        let repo = no_canon_repo();
        let first = coordinator.register(&repo, 1).unwrap();
        let second = coordinator.register(&repo, 1).unwrap();
        assert_eq!(first.session_id, second.session_id);
        assert!(!second.is_new);
    }

    #[test]
    fn worktree_failure_falls_back_to_degraded_main_repo() {
        let store = Store::open_in_memory().unwrap();
        let worktree = StubWorktree::new(true);
        let liveness = FakeLiveness::new(Utc::now());
        liveness.mark_alive(1);
        liveness.mark_alive(2);
        let coordinator = Coordinator::new(&store, &worktree, &liveness);
        let repo = no_canon_repo();
        coordinator.register(&repo, 1).unwrap();
        let second = coordinator.register(&repo, 2).unwrap();
        assert!(second.is_main_repo);
        assert!(second.degraded_reason.is_some());
    }

    #[test]
    fn release_removes_session_and_worktree() {
        let store = Store::open_in_memory().unwrap();
        let worktree = StubWorktree::new(false);
        let liveness = FakeLiveness::new(Utc::now());
        liveness.mark_alive(1);
        liveness.mark_alive(2);
        let coordinator = Coordinator::new(&store, &worktree, &liveness);
        let repo = no_canon_repo();
        coordinator.register(&repo, 1).unwrap();
        let second = coordinator.register(&repo, 2).unwrap();
        let result = coordinator.release(&repo, 2).unwrap();
        assert!(result.released);
        assert!(result.worktree_removed);
        assert!(second.worktree_name.is_some());
    }

    #[test]
    fn release_unknown_pid_is_a_noop() {
        let store = Store::open_in_memory().unwrap();
        let worktree = StubWorktree::new(false);
        let liveness = FakeLiveness::new(Utc::now());
        let coordinator = Coordinator::new(&store, &worktree, &liveness);
        let repo = no_canon_repo();
        let result = coordinator.release(&repo, 999).unwrap();
        assert!(!result.released);
    }

    #[test]
    fn cleanup_sweeps_dead_sessions() {
        let store = Store::open_in_memory().unwrap();
        let worktree = StubWorktree::new(false);
        let liveness = FakeLiveness::new(Utc::now());
        liveness.mark_alive(1);
        let coordinator = Coordinator::new(&store, &worktree, &liveness);
        let repo = no_canon_repo();
        coordinator.register(&repo, 1).unwrap();
        liveness.mark_dead(1);
        let result = coordinator.cleanup().unwrap();
        assert_eq!(result.sessions, 1);
    }

    #[test]
    fn cleanup_called_twice_in_a_row_yields_nothing_the_second_time() {
        let store = Store::open_in_memory().unwrap();
        let worktree = StubWorktree::new(false);
        let liveness = FakeLiveness::new(Utc::now());
        liveness.mark_alive(1);
        let coordinator = Coordinator::new(&store, &worktree, &liveness);
        let repo = no_canon_repo();
        coordinator.register(&repo, 1).unwrap();
        liveness.mark_dead(1);
        let first = coordinator.cleanup().unwrap();
        assert_eq!(first.sessions, 1);
        let second = coordinator.cleanup().unwrap();
        assert_eq!(second.sessions, 0);
        assert_eq!(second.worktrees_removed, 0);
    }

    #[test]
    fn status_reports_liveness_and_duration() {
        let store = Store::open_in_memory().unwrap();
        let worktree = StubWorktree::new(false);
        let liveness = FakeLiveness::new(Utc::now());
        liveness.mark_alive(1);
        let coordinator = Coordinator::new(&store, &worktree, &liveness);
        let repo = no_canon_repo();
        coordinator.register(&repo, 1).unwrap();
        let status = coordinator.status(Some(&repo)).unwrap();
        assert_eq!(status.sessions.len(), 1);
        assert!(status.sessions[0].is_alive);
    }
}
