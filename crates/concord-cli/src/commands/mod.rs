//! Subcommand implementations, grouped to match the CLI surface (§6).

pub mod budget;
pub mod claim;
pub mod conflict;
pub mod merge;
pub mod sandbox;
pub mod session;

use std::path::{Path, PathBuf};

use concord::error::{CoordError, Result};
use concord::liveness::OsLiveness;
use concord::model::ids::SessionId;
use concord::store::Store;

use concord_git::CliGitRepo;

/// Shared state every subcommand needs: the open store, the resolved repo
/// root, and the git shim used to create/list worktrees.
pub struct Context {
    pub store: Store,
    pub repo_path: PathBuf,
    pub git: CliGitRepo,
    pub liveness: OsLiveness,
    pub pid: u32,
}

impl Context {
    /// Resolve the repo path, open (or create) the store, and build the
    /// git shim.
    ///
    /// # Errors
    /// Returns [`CoordError::ConfigError`] if the repository cannot be
    /// discovered, or a store error if the database cannot be opened.
    pub fn build(repo: Option<PathBuf>, store_path: Option<PathBuf>) -> Result<Self> {
        let cwd = std::env::current_dir().map_err(CoordError::Io)?;
        let start = repo.unwrap_or(cwd);
        let repo_path = concord_git::discover_repo_root(&start).unwrap_or(start);

        let store_path = store_path.unwrap_or_else(|| repo_path.join(".concord").join("state.db"));
        if let Some(parent) = store_path.parent() {
            std::fs::create_dir_all(parent).map_err(CoordError::Io)?;
        }
        let store = Store::open(&store_path)?;

        let git = CliGitRepo::new(repo_path.clone(), repo_path.join(".concord").join("worktrees"));

        Ok(Self {
            store,
            repo_path,
            git,
            liveness: OsLiveness::new(),
            pid: std::process::id(),
        })
    }

    /// The active session id from `CONCORD_SESSION_ID`.
    ///
    /// # Errors
    /// Returns [`CoordError::Validation`] if the variable is unset or not a
    /// valid session id.
    pub fn session_id(&self) -> Result<SessionId> {
        let raw = std::env::var("CONCORD_SESSION_ID").map_err(|_| CoordError::Validation {
            field: "CONCORD_SESSION_ID".to_owned(),
            reason: "not set; run `concord register` first and export the returned session id".to_owned(),
        })?;
        raw.parse().map_err(|_| CoordError::Validation {
            field: "CONCORD_SESSION_ID".to_owned(),
            reason: "not a valid session id".to_owned(),
        })
    }

    /// Resolve a CLI-supplied path argument relative to `repo_path`.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.repo_path.join(path)
        }
    }
}

/// Print `value` as pretty JSON, falling back to `{:?}` on serialization
/// failure (never expected for library-internal types).
pub fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(err) => tracing::error!(error = %err, "failed to serialize output"),
    }
}
