//! Opaque identifier newtypes and the shared validation error type.
//!
//! Every entity in the data model (§3) is keyed by a 128-bit UUID. Each gets
//! its own newtype so a `SessionId` and a `ClaimId` can never be swapped by
//! accident at a call site, even though both are "just" a `Uuid` underneath.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A validation error for concord core types: which field, and why.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationError {
    /// The field or value that failed validation.
    pub field: String,
    /// Human-readable explanation.
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

impl std::error::Error for ValidationError {}

macro_rules! uuid_id {
    ($name:ident) => {
        #[doc = concat!("An opaque identifier for a [`", stringify!($name), "`].")]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID (used when reconstructing rows from the store).
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Return the inner UUID.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }
    };
}

uuid_id!(SessionId);
uuid_id!(ClaimId);
uuid_id!(MergeEventId);
uuid_id!(SubscriptionId);
uuid_id!(ConflictResolutionId);
uuid_id!(SuggestionId);
uuid_id!(BudgetPeriodId);
uuid_id!(SandboxId);

/// Validate a repo-relative file path: no traversal, no absolute paths, no
/// NUL bytes.
///
/// # Errors
/// Returns a [`ValidationError`] describing the first problem found.
pub fn validate_file_path(path: &str) -> Result<(), ValidationError> {
    if path.is_empty() {
        return Err(ValidationError {
            field: "file_path".to_owned(),
            reason: "must not be empty".to_owned(),
        });
    }
    if path.contains('\0') {
        return Err(ValidationError {
            field: "file_path".to_owned(),
            reason: "must not contain NUL bytes".to_owned(),
        });
    }
    if std::path::Path::new(path).is_absolute() {
        return Err(ValidationError {
            field: "file_path".to_owned(),
            reason: "must be repo-relative, not absolute".to_owned(),
        });
    }
    if path.split('/').any(|segment| segment == "..") {
        return Err(ValidationError {
            field: "file_path".to_owned(),
            reason: "must not contain '..' path traversal segments".to_owned(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_roundtrips_through_display_and_parse() {
        let id = SessionId::new();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn id_serde_roundtrip() {
        let id = ClaimId::new();
        let json = serde_json::to_string(&id).unwrap();
        let decoded: ClaimId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn distinct_ids_do_not_collide() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn file_path_rejects_absolute() {
        assert!(validate_file_path("/etc/passwd").is_err());
    }

    #[test]
    fn file_path_rejects_traversal() {
        assert!(validate_file_path("../../etc/passwd").is_err());
        assert!(validate_file_path("src/../../etc/passwd").is_err());
    }

    #[test]
    fn file_path_rejects_nul() {
        assert!(validate_file_path("src/x\0.rs").is_err());
    }

    #[test]
    fn file_path_rejects_empty() {
        assert!(validate_file_path("").is_err());
    }

    #[test]
    fn file_path_accepts_normal_relative_path() {
        assert!(validate_file_path("src/lib.rs").is_ok());
        assert!(validate_file_path("a/b/c.ts").is_ok());
    }
}
