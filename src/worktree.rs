//! Worktree and repository port traits: the pluggable boundary between
//! coordination logic and the underlying git repository (§4.3).

use std::path::{Path, PathBuf};

use crate::error::Result;

/// Characters allowed in a generated or caller-supplied worktree name.
const NAME_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// A git commit object id, as a lowercase hex SHA string.
pub type CommitOid = String;

/// A created or discovered worktree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorktreeHandle {
    /// The worktree's name (the directory name under the worktree prefix).
    pub name: String,
    /// Absolute path to the worktree.
    pub path: PathBuf,
    /// The branch checked out in the worktree.
    pub branch: String,
    /// The worktree's current HEAD commit.
    pub head: CommitOid,
}

/// The outcome of a `git merge-tree` simulation (§4.3, §4.7).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeTreeOutcome {
    /// Whether the merge would be clean (no conflicts).
    pub clean: bool,
    /// The resulting tree object id, when clean.
    pub tree_oid: Option<CommitOid>,
    /// Raw merge output, including conflict markers when not clean.
    pub raw_output: String,
}

/// Validate a worktree name: must be non-empty and contain only
/// `[A-Za-z0-9._-]` (§4.3).
///
/// # Errors
/// Returns [`crate::error::CoordError::Validation`] if the name is empty or
/// contains a disallowed character.
pub fn validate_worktree_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(crate::error::CoordError::Validation {
            field: "worktree_name".to_owned(),
            reason: "must not be empty".to_owned(),
        });
    }
    if !name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-') {
        return Err(crate::error::CoordError::Validation {
            field: "worktree_name".to_owned(),
            reason: "must contain only letters, digits, '.', '_', or '-'".to_owned(),
        });
    }
    Ok(())
}

/// Generate a worktree name from `prefix` and a short random base36
/// suffix.
#[must_use]
pub fn generate_worktree_name(prefix: &str) -> String {
    use rand::Rng;
    let mut rng = rand::rng();
    let suffix: String = (0..8)
        .map(|_| {
            let idx = rng.random_range(0..NAME_CHARSET.len());
            NAME_CHARSET[idx] as char
        })
        .collect();
    format!("{prefix}{suffix}")
}

/// Mutating worktree lifecycle operations. Called only by the
/// [`crate::coordinator::Coordinator`].
pub trait WorktreePort: Send + Sync {
    /// Create a new worktree named `name`, checked out (detached) at
    /// `base_ref`.
    ///
    /// # Errors
    /// Returns [`crate::error::CoordError::GitError`] if the underlying
    /// `git worktree add` fails, or [`crate::error::CoordError::Validation`]
    /// if `name` is invalid.
    fn create(&self, name: &str, base_ref: &str) -> Result<WorktreeHandle>;

    /// The filesystem path a worktree named `name` would live at, whether
    /// or not it currently exists.
    fn path_for(&self, name: &str) -> PathBuf;

    /// Remove a worktree, optionally deleting its branch too.
    ///
    /// # Errors
    /// Returns [`crate::error::CoordError::GitError`] if removal fails.
    fn remove(&self, name: &str, delete_branch: bool) -> Result<()>;

    /// List every worktree currently registered with the repository.
    ///
    /// # Errors
    /// Returns [`crate::error::CoordError::GitError`] if `git worktree
    /// list` fails.
    fn list(&self) -> Result<Vec<WorktreeHandle>>;
}

/// Read-only merge queries, used by the Merge Detector and Conflict Engine.
/// Never mutates the working tree.
pub trait RepoPort: Send + Sync {
    /// Fetch updates from `remote`.
    ///
    /// # Errors
    /// Returns [`crate::error::CoordError::GitError`] or
    /// [`crate::error::CoordError::Network`] on failure.
    fn fetch(&self, remote: &str) -> Result<()>;

    /// Whether `ancestor` is an ancestor of `descendant`.
    ///
    /// # Errors
    /// Returns [`crate::error::CoordError::GitError`] if either ref cannot
    /// be resolved.
    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool>;

    /// The best common ancestor of `a` and `b`, or `None` if they share no
    /// history.
    ///
    /// # Errors
    /// Returns [`crate::error::CoordError::GitError`] if either ref cannot
    /// be resolved.
    fn merge_base(&self, a: &str, b: &str) -> Result<Option<CommitOid>>;

    /// Simulate merging `theirs` into `ours` against `base`, without
    /// touching the working tree.
    ///
    /// # Errors
    /// Returns [`crate::error::CoordError::GitError`] if the underlying
    /// `git merge-tree` invocation fails outright (a conflicted-but-valid
    /// result is not an error — see [`MergeTreeOutcome::clean`]).
    fn merge_tree(&self, base: &str, ours: &str, theirs: &str) -> Result<MergeTreeOutcome>;

    /// Resolve a refname to a commit id.
    ///
    /// # Errors
    /// Returns [`crate::error::CoordError::GitError`] if the ref does not
    /// resolve.
    fn rev_parse(&self, refname: &str) -> Result<CommitOid>;
}
