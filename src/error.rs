//! Unified error type for concord coordination operations.
//!
//! Defines [`CoordError`], the error type returned by every public operation
//! in this crate. Error messages are designed to be agent-friendly: each
//! variant's `Display` impl states what happened and, where there's an
//! obvious next step, how to fix it — mirroring the guidance style an
//! operator would give another operator.

use std::fmt;
use std::path::PathBuf;

use crate::model::claim::{ClaimMode, FileClaim};

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, CoordError>;

/// Unified error type for all concord operations.
#[derive(Debug)]
pub enum CoordError {
    /// An input failed validation (bad path, bad enum value, out-of-range
    /// number, oversized payload).
    Validation {
        /// What was being validated.
        field: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A claim or workspace-registration request conflicts with existing
    /// state.
    Conflict {
        /// Human-readable description of the conflict.
        detail: String,
        /// The existing claim that blocks the request, if applicable.
        conflicting_claim: Option<Box<FileClaim>>,
    },

    /// The requested entity does not exist.
    NotFound {
        /// What kind of entity (`"session"`, `"claim"`, `"suggestion"`, …).
        kind: &'static str,
        /// The identifier that was not found.
        id: String,
    },

    /// A remote sandbox credential was missing or rejected.
    Auth {
        /// Human-readable description.
        detail: String,
    },

    /// The remote sandbox provider reported a quota violation.
    Quota {
        /// Human-readable description.
        detail: String,
    },

    /// A remote operation failed due to connectivity or timed out.
    Network {
        /// The operation that failed (e.g. `"upload chunk 2/3"`).
        operation: String,
        /// Underlying description.
        detail: String,
    },

    /// A sandbox's configured cost budget was exceeded; the sandbox has
    /// already been terminated by the time this is returned.
    BudgetExceeded {
        /// Cost accrued at the time of termination, in integer cents.
        cost_cents: u64,
        /// The configured limit, in integer cents.
        limit_cents: u64,
    },

    /// A hard timeout was reached; the sandbox has already been terminated.
    Timeout {
        /// Minutes elapsed at termination.
        elapsed_minutes: u64,
    },

    /// A conflict-resolution strategy failed to produce a valid result for
    /// a specific conflict.
    Resolution {
        /// The file the resolution was attempted on.
        file_path: PathBuf,
        /// Why the strategy failed.
        detail: String,
    },

    /// A schema migration failed; the database has been rolled back to its
    /// pre-migration backup.
    Migration {
        /// The migration script that failed.
        script: String,
        /// Human-readable description.
        detail: String,
    },

    /// A git (or other external process) command failed.
    GitError {
        /// The command that was run (e.g. `"git worktree add"`).
        command: String,
        /// Captured stderr.
        stderr: String,
    },

    /// A configuration file could not be loaded or parsed.
    ConfigError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Human-readable description of the problem.
        detail: String,
    },

    /// An I/O error occurred.
    Io(std::io::Error),

    /// An unexpected internal error (store corruption, poisoned lock, …).
    Internal(String),
}

impl CoordError {
    /// The exit code this error maps to on the CLI boundary (§6).
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } => 1,
            Self::Conflict { .. } => 2,
            Self::NotFound { .. } => 3,
            Self::BudgetExceeded { .. } | Self::Timeout { .. } => 4,
            Self::Auth { .. }
            | Self::Quota { .. }
            | Self::Network { .. }
            | Self::Resolution { .. }
            | Self::Migration { .. }
            | Self::GitError { .. }
            | Self::ConfigError { .. }
            | Self::Io(_)
            | Self::Internal(_) => 5,
        }
    }

    /// A short machine-readable kind name, for logging and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::Conflict { .. } => "conflict",
            Self::NotFound { .. } => "not_found",
            Self::Auth { .. } => "auth",
            Self::Quota { .. } => "quota",
            Self::Network { .. } => "network",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::Timeout { .. } => "timeout",
            Self::Resolution { .. } => "resolution",
            Self::Migration { .. } => "migration",
            Self::GitError { .. } => "git_error",
            Self::ConfigError { .. } => "config_error",
            Self::Io(_) => "io",
            Self::Internal(_) => "internal",
        }
    }
}

impl fmt::Display for CoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Validation { field, reason } => {
                write!(f, "invalid {field}: {reason}")
            }
            Self::Conflict {
                detail,
                conflicting_claim,
            } => {
                write!(f, "{detail}")?;
                if let Some(c) = conflicting_claim {
                    write!(
                        f,
                        "\n  Held by claim {} ({} on {}).\n  To fix: wait for the holder to release it, or request a compatible mode.",
                        c.id,
                        mode_name(c.claim_mode),
                        c.file_path.display()
                    )?;
                }
                Ok(())
            }
            Self::NotFound { kind, id } => {
                write!(f, "{kind} '{id}' not found")
            }
            Self::Auth { detail } => {
                write!(
                    f,
                    "sandbox authentication failed: {detail}\n  To fix: check CONCORD_SANDBOX_API_KEY."
                )
            }
            Self::Quota { detail } => {
                write!(f, "sandbox quota exceeded: {detail}")
            }
            Self::Network { operation, detail } => {
                write!(f, "network error during {operation}: {detail}")
            }
            Self::BudgetExceeded {
                cost_cents,
                limit_cents,
            } => {
                write!(
                    f,
                    "budget exceeded: spent ${:.2} against a ${:.2} limit; the sandbox has been terminated",
                    *cost_cents as f64 / 100.0,
                    *limit_cents as f64 / 100.0
                )
            }
            Self::Timeout { elapsed_minutes } => {
                write!(
                    f,
                    "hard timeout reached after {elapsed_minutes} minutes; the sandbox has been terminated"
                )
            }
            Self::Resolution { file_path, detail } => {
                write!(
                    f,
                    "could not resolve conflict in {}: {detail}",
                    file_path.display()
                )
            }
            Self::Migration { script, detail } => {
                write!(f, "migration '{script}' failed: {detail}; rolled back")
            }
            Self::GitError { command, stderr } => {
                write!(f, "`{command}` failed")?;
                if !stderr.is_empty() {
                    write!(f, ": {stderr}")?;
                }
                Ok(())
            }
            Self::ConfigError { path, detail } => {
                write!(f, "configuration error in '{}': {detail}", path.display())
            }
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Internal(detail) => write!(f, "internal error: {detail}"),
        }
    }
}

const fn mode_name(mode: ClaimMode) -> &'static str {
    match mode {
        ClaimMode::Exclusive => "EXCLUSIVE",
        ClaimMode::Shared => "SHARED",
        ClaimMode::Intent => "INTENT",
    }
}

impl std::error::Error for CoordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for CoordError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<rusqlite::Error> for CoordError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<crate::model::ValidationError> for CoordError {
    fn from(err: crate::model::ValidationError) -> Self {
        Self::Validation {
            field: err.field,
            reason: err.reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::claim::{ClaimId, FileClaim};
    use crate::model::session::SessionId;

    fn sample_claim() -> FileClaim {
        FileClaim {
            id: ClaimId::new(),
            session_id: SessionId::new(),
            repo_path: "/repo".into(),
            file_path: "src/x.ts".into(),
            claim_mode: ClaimMode::Exclusive,
            claimed_at: chrono::Utc::now(),
            expires_at: chrono::Utc::now(),
            last_heartbeat: chrono::Utc::now(),
            escalated_from: None,
            metadata: None,
            is_active: true,
            released_at: None,
            deleted_at: None,
            deleted_reason: None,
        }
    }

    #[test]
    fn validation_display() {
        let err = CoordError::Validation {
            field: "file_path".to_owned(),
            reason: "contains '..'".to_owned(),
        };
        assert_eq!(format!("{err}"), "invalid file_path: contains '..'");
    }

    #[test]
    fn conflict_display_includes_claim() {
        let claim = sample_claim();
        let id = claim.id;
        let err = CoordError::Conflict {
            detail: "file already claimed".to_owned(),
            conflicting_claim: Some(Box::new(claim)),
        };
        let msg = format!("{err}");
        assert!(msg.contains("file already claimed"));
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains("EXCLUSIVE"));
    }

    #[test]
    fn budget_exceeded_formats_dollars() {
        let err = CoordError::BudgetExceeded {
            cost_cents: 8_050,
            limit_cents: 5_000,
        };
        let msg = format!("{err}");
        assert!(msg.contains("$80.50"));
        assert!(msg.contains("$50.00"));
    }

    #[test]
    fn exit_codes_match_kinds() {
        assert_eq!(
            CoordError::Validation {
                field: "x".into(),
                reason: "y".into()
            }
            .exit_code(),
            1
        );
        assert_eq!(
            CoordError::NotFound {
                kind: "session",
                id: "x".into()
            }
            .exit_code(),
            3
        );
        assert_eq!(CoordError::Timeout { elapsed_minutes: 60 }.exit_code(), 4);
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::other("disk full");
        let err: CoordError = io_err.into();
        assert!(matches!(err, CoordError::Io(_)));
    }
}
