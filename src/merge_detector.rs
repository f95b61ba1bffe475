//! Merge Detector: a polling daemon that records branch→target merges and
//! fans out notifications and proactive conflict suggestions (§4.6).

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration as StdDuration;

use chrono::Utc;

use crate::conflict;
use crate::error::Result;
use crate::model::ids::{MergeEventId, SessionId};
use crate::model::merge_event::MergeEvent;
use crate::store::{merge_events, sessions, subscriptions, Store};
use crate::worktree::RepoPort;

/// Only the single highest-confidence suggestion per proactively-detected
/// conflict is persisted (§4.6 step 4); the full ranked set is available
/// on demand via [`crate::conflict::detect_conflicts`] if the session asks
/// for it directly.
const PROACTIVE_SUGGESTIONS_PER_CONFLICT: usize = 1;

/// Default poll interval (§4.6).
pub const DEFAULT_POLL_INTERVAL: StdDuration = StdDuration::from_secs(30);

/// A notification the Merge Detector hands off for delivery. Delivery
/// transport itself is out of scope (§4.6): the detector only guarantees
/// the sink accepted the enqueue before marking the event notified.
#[derive(Debug, Clone)]
pub struct MergeNotification {
    /// The session to notify.
    pub session_id: SessionId,
    /// The merge event that triggered this notification.
    pub event: MergeEvent,
}

/// Accepts notifications for delivery. Implementations decide the actual
/// transport (IPC, file, webhook, …).
pub trait NotificationSink: Send + Sync {
    /// Enqueue `notification` for delivery.
    ///
    /// # Errors
    /// Returns an error if the notification could not be accepted; the
    /// detector will not mark the underlying event notified in that case.
    fn enqueue(&self, notification: MergeNotification) -> Result<()>;
}

/// A `NotificationSink` that only records what it received, for tests.
#[derive(Default)]
pub struct RecordingSink {
    sent: std::sync::Mutex<Vec<MergeNotification>>,
}

impl RecordingSink {
    /// Snapshot every notification recorded so far.
    #[must_use]
    pub fn sent(&self) -> Vec<MergeNotification> {
        self.sent.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

impl NotificationSink for RecordingSink {
    fn enqueue(&self, notification: MergeNotification) -> Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification);
        }
        Ok(())
    }
}

/// One poll tick over a single repository (§4.6, steps 1-4).
///
/// # Errors
/// Returns an error only on store failure; a single repo's `fetch` or
/// `is_ancestor` failure is logged at `warn` and does not abort the tick.
pub fn poll_repo(
    store: &Store,
    repo: &dyn RepoPort,
    repo_path: &Path,
    sink: &dyn NotificationSink,
) -> Result<usize> {
    if let Err(err) = repo.fetch("origin") {
        tracing::warn!(error = %err, repo = %repo_path.display(), "merge-detector fetch failed, skipping this tick");
        return Ok(0);
    }

    let active_subs = store.transaction(|tx| {
        let mut seen_pairs = Vec::new();
        for session in sessions::list_for_repo(tx, repo_path)? {
            for sub in subscriptions::list_for_session(tx, session.id)? {
                seen_pairs.push(sub);
            }
        }
        Ok(seen_pairs)
    })?;

    let mut new_events = 0usize;
    let mut handled_pairs: Vec<(String, String)> = Vec::new();

    for sub in &active_subs {
        let pair = (sub.branch_name.clone(), sub.target_branch.clone());
        if handled_pairs.contains(&pair) {
            continue;
        }
        handled_pairs.push(pair);

        let (branch_tip, target_tip) = match (repo.rev_parse(&sub.branch_name), repo.rev_parse(&sub.target_branch)) {
            (Ok(b), Ok(t)) => (b, t),
            (branch_result, target_result) => {
                tracing::warn!(
                    branch = %sub.branch_name,
                    target = %sub.target_branch,
                    branch_error = ?branch_result.err(),
                    target_error = ?target_result.err(),
                    "merge-detector could not resolve refs, skipping pair"
                );
                continue;
            }
        };

        let is_merged = match repo.is_ancestor(&branch_tip, &target_tip) {
            Ok(merged) => merged,
            Err(err) => {
                tracing::warn!(error = %err, branch = %sub.branch_name, "is_ancestor check failed");
                continue;
            }
        };
        if !is_merged {
            continue;
        }

        let now = Utc::now();
        let event = MergeEvent {
            id: MergeEventId::new(),
            repo_path: repo_path.to_path_buf(),
            branch_name: sub.branch_name.clone(),
            source_commit: branch_tip,
            target_branch: sub.target_branch.clone(),
            target_commit: target_tip,
            merged_at: now,
            detected_at: now,
            notification_sent: false,
        };

        let inserted = store.transaction(|tx| merge_events::insert_if_new(tx, &event))?;
        if inserted {
            new_events += 1;
        }

        let matching = store.transaction(|tx| {
            subscriptions::list_active_matching(tx, repo_path, &event.branch_name, &event.target_branch)
        })?;

        for matching_sub in matching {
            let notification = MergeNotification {
                session_id: matching_sub.session_id,
                event: event.clone(),
            };
            if sink.enqueue(notification).is_ok() {
                store.transaction(|tx| {
                    subscriptions::mark_notified(tx, matching_sub.id, now)?;
                    merge_events::mark_notified(tx, event.id)
                })?;
            }
        }

        precompute_sibling_conflicts(store, repo, repo_path, &active_subs, &event);
    }

    Ok(new_events)
}

/// §4.6 step 4: for each active sibling session whose own branch differs
/// from the branch that just merged, proactively detect conflicts against
/// the new target tip and persist the highest-confidence suggestion. A
/// single repo/branch failure is logged at `warn` and does not abort the
/// tick.
fn precompute_sibling_conflicts(
    store: &Store,
    repo: &dyn RepoPort,
    repo_path: &Path,
    active_subs: &[crate::model::merge_event::Subscription],
    event: &MergeEvent,
) {
    let mut sibling_branches: Vec<(SessionId, String)> = Vec::new();
    for sub in active_subs {
        if sub.branch_name == event.branch_name {
            continue;
        }
        if !sibling_branches.iter().any(|(_, branch)| *branch == sub.branch_name) {
            sibling_branches.push((sub.session_id, sub.branch_name.clone()));
        }
    }

    let ast = conflict::ast::HeuristicAst;
    let chain = conflict::strategies::default_chain();
    let scorer = conflict::ConfidenceScorer::new();

    for (session_id, sibling_branch) in sibling_branches {
        let req = conflict::DetectConflictsRequest {
            current_branch: sibling_branch.clone(),
            target_branch: event.target_branch.clone(),
            analyze_semantics: false,
        };
        let report = match conflict::detect_conflicts(repo, &ast, &req) {
            Ok(report) => report,
            Err(err) => {
                tracing::warn!(error = %err, branch = %sibling_branch, "proactive conflict detection failed, skipping");
                continue;
            }
        };
        if report.conflicts.is_empty() {
            continue;
        }

        let sibling_tip = match repo.rev_parse(&sibling_branch) {
            Ok(tip) => tip,
            Err(err) => {
                tracing::warn!(error = %err, branch = %sibling_branch, "could not resolve sibling branch tip, skipping");
                continue;
            }
        };

        if let Err(err) = conflict::generate_suggestions(
            store,
            &chain,
            &scorer,
            Some(session_id),
            repo_path,
            &report,
            &sibling_tip,
            &event.target_commit,
            PROACTIVE_SUGGESTIONS_PER_CONFLICT,
        ) {
            tracing::warn!(error = %err, branch = %sibling_branch, "failed to persist proactive conflict suggestions");
        }
    }
}

/// Handle to a running Merge Detector daemon thread.
pub struct MergeDetectorHandle {
    shutdown_tx: mpsc::Sender<()>,
    join_handle: Option<JoinHandle<()>>,
}

impl MergeDetectorHandle {
    /// Signal the daemon to stop and join its thread.
    pub fn shutdown(mut self) {
        drop(self.shutdown_tx.send(()));
        if let Some(handle) = self.join_handle.take() {
            drop(handle.join());
        }
    }
}

/// Spawn the Merge Detector as a dedicated OS thread polling every
/// `interval`, over the repos in `repo_paths` (§4.6, §5: no async runtime).
pub fn spawn(
    store: Arc<Store>,
    repo: Arc<dyn RepoPort>,
    sink: Arc<dyn NotificationSink>,
    repo_paths: Vec<PathBuf>,
    interval: StdDuration,
) -> MergeDetectorHandle {
    let (shutdown_tx, shutdown_rx) = mpsc::channel();
    let join_handle = thread::spawn(move || loop {
        for repo_path in &repo_paths {
            if let Err(err) = poll_repo(&store, repo.as_ref(), repo_path, sink.as_ref()) {
                tracing::warn!(error = %err, repo = %repo_path.display(), "merge-detector tick failed for repo");
            }
        }
        match shutdown_rx.recv_timeout(interval) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }
    });
    MergeDetectorHandle {
        shutdown_tx,
        join_handle: Some(join_handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ids::SubscriptionId;
    use crate::model::merge_event::Subscription;
    use crate::model::session::{ExecutionMode, Session};
    use crate::worktree::{CommitOid, MergeTreeOutcome};

    struct StubRepo {
        branch_tip: String,
        target_tip: String,
        ancestor: bool,
    }

    impl RepoPort for StubRepo {
        fn fetch(&self, _remote: &str) -> Result<()> {
            Ok(())
        }

        fn is_ancestor(&self, _ancestor: &str, _descendant: &str) -> Result<bool> {
            Ok(self.ancestor)
        }

        fn merge_base(&self, _a: &str, _b: &str) -> Result<Option<CommitOid>> {
            Ok(None)
        }

        fn merge_tree(&self, _base: &str, _ours: &str, _theirs: &str) -> Result<MergeTreeOutcome> {
            Ok(MergeTreeOutcome {
                clean: true,
                tree_oid: None,
                raw_output: String::new(),
            })
        }

        fn rev_parse(&self, refname: &str) -> Result<CommitOid> {
            if refname.contains("main") {
                Ok(self.target_tip.clone())
            } else {
                Ok(self.branch_tip.clone())
            }
        }
    }

    fn make_session(store: &Store, repo_path: &Path) -> Session {
        let session = Session {
            id: SessionId::new(),
            pid: std::process::id(),
            repo_path: repo_path.to_path_buf(),
            worktree_path: repo_path.to_path_buf(),
            worktree_name: None,
            is_main_repo: true,
            created_at: Utc::now(),
            last_heartbeat: Utc::now(),
            execution_mode: ExecutionMode::Local,
            sandbox_id: None,
            prompt: None,
            status: None,
            output_log: None,
            budget_limit_cents: None,
            template: None,
        };
        store.transaction(|tx| sessions::insert(tx, &session)).unwrap();
        session
    }

    #[test]
    fn poll_records_merge_event_and_notifies_subscriber() {
        let store = Store::open_in_memory().unwrap();
        let repo_path = Path::new("/repo");
        let session = make_session(&store, repo_path);
        let sub = Subscription {
            id: SubscriptionId::new(),
            session_id: session.id,
            repo_path: repo_path.to_path_buf(),
            branch_name: "agent-1".to_owned(),
            target_branch: "main".to_owned(),
            created_at: Utc::now(),
            notified_at: None,
            is_active: true,
        };
        store.transaction(|tx| subscriptions::insert(tx, &sub)).unwrap();

        let repo = StubRepo {
            branch_tip: "a".repeat(40),
            target_tip: "b".repeat(40),
            ancestor: true,
        };
        let sink = RecordingSink::default();
        let new_events = poll_repo(&store, &repo, repo_path, &sink).unwrap();
        assert_eq!(new_events, 1);
        assert_eq!(sink.sent().len(), 1);
    }

    struct MultiBranchRepo;

    impl RepoPort for MultiBranchRepo {
        fn fetch(&self, _remote: &str) -> Result<()> {
            Ok(())
        }

        fn is_ancestor(&self, ancestor: &str, _descendant: &str) -> Result<bool> {
            Ok(ancestor == "agent-1-tip")
        }

        fn merge_base(&self, _a: &str, _b: &str) -> Result<Option<CommitOid>> {
            Ok(Some("base".repeat(8)))
        }

        fn merge_tree(&self, _base: &str, _ours: &str, _theirs: &str) -> Result<MergeTreeOutcome> {
            Ok(MergeTreeOutcome {
                clean: false,
                tree_oid: None,
                raw_output: "f.rs\n<<<<<<< HEAD\nours side\n=======\ntheirs side\n>>>>>>> feature\n".to_owned(),
            })
        }

        fn rev_parse(&self, refname: &str) -> Result<CommitOid> {
            Ok(format!("{refname}-tip"))
        }
    }

    #[test]
    fn poll_precomputes_suggestions_for_sibling_sessions_on_merge() {
        let store = Store::open_in_memory().unwrap();
        let repo_path = Path::new("/repo");
        let merged_session = make_session(&store, repo_path);
        let sibling_session = make_session(&store, repo_path);

        let merged_sub = Subscription {
            id: SubscriptionId::new(),
            session_id: merged_session.id,
            repo_path: repo_path.to_path_buf(),
            branch_name: "agent-1".to_owned(),
            target_branch: "main".to_owned(),
            created_at: Utc::now(),
            notified_at: None,
            is_active: true,
        };
        let sibling_sub = Subscription {
            id: SubscriptionId::new(),
            session_id: sibling_session.id,
            repo_path: repo_path.to_path_buf(),
            branch_name: "agent-2".to_owned(),
            target_branch: "main".to_owned(),
            created_at: Utc::now(),
            notified_at: None,
            is_active: true,
        };
        store.transaction(|tx| subscriptions::insert(tx, &merged_sub)).unwrap();
        store.transaction(|tx| subscriptions::insert(tx, &sibling_sub)).unwrap();

        let sink = RecordingSink::default();
        poll_repo(&store, &MultiBranchRepo, repo_path, &sink).unwrap();

        let suggestion_count: i64 = store
            .transaction(|tx| Ok(tx.query_row("SELECT COUNT(*) FROM auto_fix_suggestions", [], |r| r.get(0))?))
            .unwrap();
        assert_eq!(suggestion_count, 1);
    }

    #[test]
    fn poll_skips_unmerged_branches() {
        let store = Store::open_in_memory().unwrap();
        let repo_path = Path::new("/repo");
        let session = make_session(&store, repo_path);
        let sub = Subscription {
            id: SubscriptionId::new(),
            session_id: session.id,
            repo_path: repo_path.to_path_buf(),
            branch_name: "agent-1".to_owned(),
            target_branch: "main".to_owned(),
            created_at: Utc::now(),
            notified_at: None,
            is_active: true,
        };
        store.transaction(|tx| subscriptions::insert(tx, &sub)).unwrap();

        let repo = StubRepo {
            branch_tip: "a".repeat(40),
            target_tip: "b".repeat(40),
            ancestor: false,
        };
        let sink = RecordingSink::default();
        let new_events = poll_repo(&store, &repo, repo_path, &sink).unwrap();
        assert_eq!(new_events, 0);
        assert!(sink.sent().is_empty());
    }
}
