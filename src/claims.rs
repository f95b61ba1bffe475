//! Claims Manager: acquire/release/escalate/cleanup over file claims
//! (§4.5).

use std::path::Path;

use chrono::{Duration, Utc};

use crate::error::{CoordError, Result};
use crate::model::claim::{ClaimMode, FileClaim};
use crate::model::ids::{ClaimId, SessionId};
use crate::model::session::Session;
use crate::store::{claims, sessions, Store};

/// Default claim TTL, absent an explicit `ttl_hours` (§4.5).
pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Request parameters for [`ClaimsManager::acquire_claim`].
#[derive(Debug, Clone)]
pub struct AcquireClaimRequest {
    /// The requesting session.
    pub session_id: SessionId,
    /// Canonical git toplevel path.
    pub repo_path: std::path::PathBuf,
    /// Repo-relative file path.
    pub file_path: std::path::PathBuf,
    /// Requested compatibility mode.
    pub mode: ClaimMode,
    /// Optional caller-supplied metadata.
    pub metadata: Option<serde_json::Value>,
    /// Claim lifetime; defaults to [`DEFAULT_TTL_HOURS`] when `None`.
    pub ttl_hours: Option<i64>,
}

/// Coordinates cooperative file-level locking on top of the store (§4.5).
pub struct ClaimsManager<'a> {
    store: &'a Store,
}

impl<'a> ClaimsManager<'a> {
    /// Build a claims manager over `store`.
    #[must_use]
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Acquire a new claim, failing with [`CoordError::Conflict`] if an
    /// incompatible active claim already exists on the file (§4.5).
    ///
    /// # Errors
    /// Returns [`CoordError::Validation`] for a bad file path,
    /// [`CoordError::NotFound`] if the session does not exist, or
    /// [`CoordError::Conflict`] if the requested mode is incompatible with
    /// an existing active claim.
    pub fn acquire_claim(&self, req: AcquireClaimRequest) -> Result<FileClaim> {
        crate::model::ids::validate_file_path(&req.file_path.to_string_lossy())?;
        let ttl = Duration::hours(req.ttl_hours.unwrap_or(DEFAULT_TTL_HOURS));

        self.store.transaction(|tx| {
            sessions::get(tx, req.session_id)?;
            let now = Utc::now();
            let active = claims::list_active_for_file(tx, &req.repo_path, &req.file_path, now, Some(req.session_id))?;
            if let Some(conflicting) = active.into_iter().find(|c| !req.mode.compatible_with(c.claim_mode)) {
                return Err(CoordError::Conflict {
                    detail: format!(
                        "{} claim on {} conflicts with an active {} claim",
                        mode_label(req.mode),
                        req.file_path.display(),
                        mode_label(conflicting.claim_mode)
                    ),
                    conflicting_claim: Some(Box::new(conflicting)),
                });
            }

            let claim = FileClaim {
                id: ClaimId::new(),
                session_id: req.session_id,
                repo_path: req.repo_path.clone(),
                file_path: req.file_path.clone(),
                claim_mode: req.mode,
                claimed_at: now,
                expires_at: now + ttl,
                last_heartbeat: now,
                escalated_from: None,
                metadata: req.metadata.clone(),
                is_active: true,
                released_at: None,
                deleted_at: None,
                deleted_reason: None,
            };
            claims::insert(tx, &claim)?;
            Ok(claim)
        })
    }

    /// Release a claim. Unless `force`, the caller's `session_id` must own
    /// the claim; on a mismatch this returns `Ok(false)` without mutating
    /// anything (§4.5).
    ///
    /// # Errors
    /// Returns [`CoordError::NotFound`] if the claim does not exist, or
    /// [`CoordError::Internal`] on a store failure.
    pub fn release_claim(&self, id: ClaimId, session_id: SessionId, force: bool) -> Result<bool> {
        self.store.transaction(|tx| {
            let claim = crate::store::claims::get(tx, id)?;
            if !force && claim.session_id != session_id {
                return Ok(false);
            }
            claims::release(tx, id, Utc::now(), "explicit")?;
            Ok(true)
        })
    }

    /// List active claims for a session.
    ///
    /// # Errors
    /// Returns [`CoordError::Internal`] on a store failure.
    pub fn list_for_session(&self, session_id: SessionId) -> Result<Vec<FileClaim>> {
        self.store.transaction(|tx| claims::list_for_session(tx, session_id))
    }

    /// Escalate a claim to a stronger mode. Only forward moves (`INTENT <
    /// SHARED < EXCLUSIVE`) are permitted, and the same compatibility check
    /// as `acquire_claim` applies against other sessions' active claims
    /// (§4.5).
    ///
    /// # Errors
    /// Returns [`CoordError::Validation`] if `new_mode` is not a forward
    /// move, [`CoordError::NotFound`] if the claim does not exist, or
    /// [`CoordError::Conflict`] if the new mode is incompatible with
    /// another active claim.
    pub fn escalate_claim(&self, id: ClaimId, new_mode: ClaimMode) -> Result<FileClaim> {
        self.store.transaction(|tx| {
            let claim = crate::store::claims::get(tx, id)?;
            if new_mode <= claim.claim_mode {
                return Err(CoordError::Validation {
                    field: "new_mode".to_owned(),
                    reason: format!(
                        "{} is not stronger than the current mode {}",
                        mode_label(new_mode),
                        mode_label(claim.claim_mode)
                    ),
                });
            }
            let now = Utc::now();
            let active = claims::list_active_for_file(tx, &claim.repo_path, &claim.file_path, now, Some(claim.session_id))?;
            if let Some(conflicting) = active.into_iter().find(|c| !new_mode.compatible_with(c.claim_mode)) {
                return Err(CoordError::Conflict {
                    detail: format!("escalating to {} conflicts with an active claim", mode_label(new_mode)),
                    conflicting_claim: Some(Box::new(conflicting)),
                });
            }
            claims::escalate(tx, id, new_mode, claim.claim_mode, now)?;
            crate::store::claims::get(tx, id)
        })
    }

    /// Release every active claim held by `session_id` (called on session
    /// release).
    ///
    /// # Errors
    /// Returns [`CoordError::Internal`] on a store failure.
    pub fn release_all_for_session(&self, session_id: SessionId) -> Result<usize> {
        self.store.transaction(|tx| claims::release_all_for_session(tx, session_id, Utc::now()))
    }

    /// Sweep every stale claim: expired, or whose heartbeat exceeds
    /// `heartbeat_timeout`, or whose owning session is no longer alive/is
    /// stale per `liveness`.
    ///
    /// Serialized against [`crate::coordinator::Coordinator::cleanup`] by
    /// the same advisory CAS lock on `schema_metadata.last_claim_cleanup`:
    /// a sweeper that finds the lock held more recently than a minute ago
    /// returns `0` immediately rather than blocking.
    ///
    /// # Errors
    /// Returns [`CoordError::Internal`] on a store failure.
    pub fn cleanup_stale_claims(&self, heartbeat_timeout: Duration, liveness: &dyn crate::liveness::Liveness) -> Result<usize> {
        let now = Utc::now();
        let acquired = self.store.transaction(|tx| crate::store::schema_metadata::try_acquire_cleanup_lock(tx, now))?;
        if !acquired {
            return Ok(0);
        }

        self.store.transaction(|tx| {
            let stale = claims::list_stale(tx, now, now - heartbeat_timeout)?;
            let mut swept = 0usize;
            for claim in stale {
                claims::mark_deleted_stale(tx, claim.id, now)?;
                swept += 1;
            }
            // Also sweep claims whose owning session's process has died,
            // even if the claim's own timers have not yet expired.
            let sessions_in_repo: Vec<Session> = sessions::list_all(tx)?;
            for session in sessions_in_repo {
                if !liveness.is_alive(session.pid) {
                    let held = claims::list_for_session(tx, session.id)?;
                    for claim in held {
                        claims::mark_deleted_stale(tx, claim.id, now)?;
                        swept += 1;
                    }
                }
            }
            Ok(swept)
        })
    }

    /// Validate a repo-relative file path without performing any store
    /// operation. Exposed for callers that want to fail fast before
    /// building a request.
    ///
    /// # Errors
    /// Returns [`CoordError::Validation`] if the path is invalid.
    pub fn validate_path(path: &Path) -> Result<()> {
        Ok(crate::model::ids::validate_file_path(&path.to_string_lossy())?)
    }
}

fn mode_label(mode: ClaimMode) -> &'static str {
    mode.as_str()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::session::ExecutionMode;

    fn make_session(store: &Store, pid: u32) -> Session {
        let session = Session {
            id: SessionId::new(),
            pid,
            repo_path: "/repo".into(),
            worktree_path: "/repo".into(),
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

    fn req(session_id: SessionId, mode: ClaimMode) -> AcquireClaimRequest {
        AcquireClaimRequest {
            session_id,
            repo_path: "/repo".into(),
            file_path: "src/x.rs".into(),
            mode,
            metadata: None,
            ttl_hours: None,
        }
    }

    #[test]
    fn acquire_succeeds_when_uncontested() {
        let store = Store::open_in_memory().unwrap();
        let session = make_session(&store, 1);
        let manager = ClaimsManager::new(&store);
        let claim = manager.acquire_claim(req(session.id, ClaimMode::Shared)).unwrap();
        assert_eq!(claim.claim_mode, ClaimMode::Shared);
    }

    #[test]
    fn acquire_exclusive_conflicts_with_existing_shared() {
        let store = Store::open_in_memory().unwrap();
        let a = make_session(&store, 1);
        let b = make_session(&store, 2);
        let manager = ClaimsManager::new(&store);
        manager.acquire_claim(req(a.id, ClaimMode::Shared)).unwrap();
        let err = manager.acquire_claim(req(b.id, ClaimMode::Exclusive)).unwrap_err();
        assert!(matches!(err, CoordError::Conflict { .. }));
    }

    #[test]
    fn acquire_rejects_invalid_path() {
        let store = Store::open_in_memory().unwrap();
        let session = make_session(&store, 1);
        let manager = ClaimsManager::new(&store);
        let mut r = req(session.id, ClaimMode::Shared);
        r.file_path = "../escape".into();
        let err = manager.acquire_claim(r).unwrap_err();
        assert!(matches!(err, CoordError::Validation { .. }));
    }

    #[test]
    fn escalate_forward_move_succeeds() {
        let store = Store::open_in_memory().unwrap();
        let session = make_session(&store, 1);
        let manager = ClaimsManager::new(&store);
        let claim = manager.acquire_claim(req(session.id, ClaimMode::Intent)).unwrap();
        let escalated = manager.escalate_claim(claim.id, ClaimMode::Exclusive).unwrap();
        assert_eq!(escalated.claim_mode, ClaimMode::Exclusive);
        assert_eq!(escalated.escalated_from, Some(ClaimMode::Intent));
    }

    #[test]
    fn escalate_backward_move_rejected() {
        let store = Store::open_in_memory().unwrap();
        let session = make_session(&store, 1);
        let manager = ClaimsManager::new(&store);
        let claim = manager.acquire_claim(req(session.id, ClaimMode::Exclusive)).unwrap();
        let err = manager.escalate_claim(claim.id, ClaimMode::Shared).unwrap_err();
        assert!(matches!(err, CoordError::Validation { .. }));
    }

    #[test]
    fn release_claim_by_non_owner_without_force_is_noop() {
        let store = Store::open_in_memory().unwrap();
        let owner = make_session(&store, 1);
        let other = make_session(&store, 2);
        let manager = ClaimsManager::new(&store);
        let claim = manager.acquire_claim(req(owner.id, ClaimMode::Shared)).unwrap();
        let released = manager.release_claim(claim.id, other.id, false).unwrap();
        assert!(!released);
        assert_eq!(manager.list_for_session(owner.id).unwrap().len(), 1);
    }

    #[test]
    fn release_claim_with_force_succeeds_for_non_owner() {
        let store = Store::open_in_memory().unwrap();
        let owner = make_session(&store, 1);
        let other = make_session(&store, 2);
        let manager = ClaimsManager::new(&store);
        let claim = manager.acquire_claim(req(owner.id, ClaimMode::Shared)).unwrap();
        let released = manager.release_claim(claim.id, other.id, true).unwrap();
        assert!(released);
        assert!(manager.list_for_session(owner.id).unwrap().is_empty());
    }

    #[test]
    fn release_all_for_session_releases_every_claim() {
        let store = Store::open_in_memory().unwrap();
        let session = make_session(&store, 1);
        let manager = ClaimsManager::new(&store);
        let mut r1 = req(session.id, ClaimMode::Shared);
        r1.file_path = "a.rs".into();
        let mut r2 = req(session.id, ClaimMode::Shared);
        r2.file_path = "b.rs".into();
        manager.acquire_claim(r1).unwrap();
        manager.acquire_claim(r2).unwrap();
        let released = manager.release_all_for_session(session.id).unwrap();
        assert_eq!(released, 2);
        assert!(manager.list_for_session(session.id).unwrap().is_empty());
    }

    #[test]
    fn cleanup_stale_claims_sweeps_dead_session_claims() {
        let store = Store::open_in_memory().unwrap();
        let session = make_session(&store, 424_242);
        let manager = ClaimsManager::new(&store);
        manager.acquire_claim(req(session.id, ClaimMode::Shared)).unwrap();
        let fake = crate::liveness::FakeLiveness::new(Utc::now());
        let swept = manager.cleanup_stale_claims(Duration::hours(1), &fake).unwrap();
        assert_eq!(swept, 1);
    }

    #[test]
    fn cleanup_stale_claims_called_twice_in_a_row_yields_zero_the_second_time() {
        let store = Store::open_in_memory().unwrap();
        let session = make_session(&store, 424_242);
        let manager = ClaimsManager::new(&store);
        manager.acquire_claim(req(session.id, ClaimMode::Shared)).unwrap();
        let fake = crate::liveness::FakeLiveness::new(Utc::now());
        assert_eq!(manager.cleanup_stale_claims(Duration::hours(1), &fake).unwrap(), 1);
        assert_eq!(manager.cleanup_stale_claims(Duration::hours(1), &fake).unwrap(), 0);
    }
}
