//! File-claim data model and compatibility matrix (§3, §4.5).

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ids::{ClaimId, SessionId};

/// The three claim compatibility modes.
///
/// Level order for escalation purposes: `Intent < Shared < Exclusive`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimMode {
    /// Weakest: signals intent to edit, compatible with everything but
    /// EXCLUSIVE.
    Intent,
    /// Compatible with other SHARED and INTENT claims, not with EXCLUSIVE.
    Shared,
    /// Strongest: excludes every other active claim on the same file.
    Exclusive,
}

impl ClaimMode {
    /// Parse from the store's persisted column value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "INTENT" => Some(Self::Intent),
            "SHARED" => Some(Self::Shared),
            "EXCLUSIVE" => Some(Self::Exclusive),
            _ => None,
        }
    }

    /// The store's persisted column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Intent => "INTENT",
            Self::Shared => "SHARED",
            Self::Exclusive => "EXCLUSIVE",
        }
    }

    /// Whether a request for `self` is compatible with an already-held
    /// claim of mode `held`, per the compatibility matrix in §4.5.
    ///
    /// EXCLUSIVE is incompatible with everything including itself; SHARED
    /// and INTENT are mutually compatible with each other and themselves.
    #[must_use]
    pub const fn compatible_with(self, held: Self) -> bool {
        !matches!(self, Self::Exclusive) && !matches!(held, Self::Exclusive)
    }
}

/// A cooperative, time-bounded advisory lock on one file held by one
/// session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileClaim {
    /// Unique claim identifier.
    pub id: ClaimId,
    /// The session holding this claim.
    pub session_id: SessionId,
    /// Canonical git toplevel path of the repository this claim applies to.
    pub repo_path: PathBuf,
    /// Repo-relative file path.
    pub file_path: PathBuf,
    /// The requested compatibility mode.
    pub claim_mode: ClaimMode,
    /// When the claim was acquired (or last escalated).
    pub claimed_at: DateTime<Utc>,
    /// When the claim expires absent a heartbeat or renewal.
    pub expires_at: DateTime<Utc>,
    /// Last heartbeat on this claim.
    pub last_heartbeat: DateTime<Utc>,
    /// The claim's mode prior to its most recent escalation, if any.
    pub escalated_from: Option<ClaimMode>,
    /// Opaque caller-supplied metadata.
    pub metadata: Option<Value>,
    /// Whether the claim is currently active.
    pub is_active: bool,
    /// When the claim was released, if it has been.
    pub released_at: Option<DateTime<Utc>>,
    /// Tombstone: when the claim was administratively deleted (e.g. stale
    /// sweep), if ever.
    pub deleted_at: Option<DateTime<Utc>>,
    /// Tombstone: why (`"stale"`, `"session_release"`, `"explicit"`, …).
    pub deleted_reason: Option<String>,
}

impl FileClaim {
    /// Whether this claim has passed its TTL as of `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Whether this claim's heartbeat is stale as of `now` given
    /// `heartbeat_timeout`.
    #[must_use]
    pub fn heartbeat_is_stale(&self, now: DateTime<Utc>, heartbeat_timeout: chrono::Duration) -> bool {
        now - self.last_heartbeat > heartbeat_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_ordering_is_monotonic() {
        assert!(ClaimMode::Intent < ClaimMode::Shared);
        assert!(ClaimMode::Shared < ClaimMode::Exclusive);
    }

    #[test]
    fn mode_roundtrips() {
        for mode in [ClaimMode::Intent, ClaimMode::Shared, ClaimMode::Exclusive] {
            assert_eq!(ClaimMode::parse(mode.as_str()), Some(mode));
        }
    }

    // Compatibility matrix from §4.5, exhaustively.
    #[test]
    fn exclusive_is_incompatible_with_everything() {
        for held in [ClaimMode::Exclusive, ClaimMode::Shared, ClaimMode::Intent] {
            assert!(!ClaimMode::Exclusive.compatible_with(held));
        }
    }

    #[test]
    fn shared_incompatible_with_exclusive_compatible_otherwise() {
        assert!(!ClaimMode::Shared.compatible_with(ClaimMode::Exclusive));
        assert!(ClaimMode::Shared.compatible_with(ClaimMode::Shared));
        assert!(ClaimMode::Shared.compatible_with(ClaimMode::Intent));
    }

    #[test]
    fn intent_incompatible_with_exclusive_compatible_otherwise() {
        assert!(!ClaimMode::Intent.compatible_with(ClaimMode::Exclusive));
        assert!(ClaimMode::Intent.compatible_with(ClaimMode::Shared));
        assert!(ClaimMode::Intent.compatible_with(ClaimMode::Intent));
    }

    #[test]
    fn compatibility_is_symmetric() {
        for a in [ClaimMode::Exclusive, ClaimMode::Shared, ClaimMode::Intent] {
            for b in [ClaimMode::Exclusive, ClaimMode::Shared, ClaimMode::Intent] {
                assert_eq!(a.compatible_with(b), b.compatible_with(a));
            }
        }
    }

    fn sample_claim(expires_at: DateTime<Utc>, last_heartbeat: DateTime<Utc>) -> FileClaim {
        FileClaim {
            id: ClaimId::new(),
            session_id: SessionId::new(),
            repo_path: "/repo".into(),
            file_path: "src/x.ts".into(),
            claim_mode: ClaimMode::Shared,
            claimed_at: Utc::now(),
            expires_at,
            last_heartbeat,
            escalated_from: None,
            metadata: None,
            is_active: true,
            released_at: None,
            deleted_at: None,
            deleted_reason: None,
        }
    }

    #[test]
    fn expiry_boundary() {
        let now = Utc::now();
        let claim = sample_claim(now - chrono::Duration::seconds(1), now);
        assert!(claim.is_expired(now));
        let claim = sample_claim(now + chrono::Duration::seconds(1), now);
        assert!(!claim.is_expired(now));
    }

    #[test]
    fn heartbeat_staleness_boundary() {
        let now = Utc::now();
        let timeout = chrono::Duration::minutes(5);
        let stale = sample_claim(now + chrono::Duration::hours(1), now - chrono::Duration::minutes(6));
        assert!(stale.heartbeat_is_stale(now, timeout));
        let fresh = sample_claim(now + chrono::Duration::hours(1), now - chrono::Duration::minutes(1));
        assert!(!fresh.heartbeat_is_stale(now, timeout));
    }
}
