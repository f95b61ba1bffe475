//! CLI-backed implementation of [`concord::worktree::WorktreePort`] and
//! [`concord::worktree::RepoPort`].
//!
//! `concord`'s git boundary is a pair of narrow traits rather than a direct
//! dependency on a git library, so the coordination logic in the root crate
//! never shells out or links a git backend itself. This crate provides one
//! concrete implementation: a thin shim over the `git` binary, invoked via
//! `std::process::Command`. `git worktree`, `git merge-tree`, and `git
//! merge-base` are porcelain-level operations without a stable programmatic
//! equivalent, so a CLI shim is the pragmatic backend for them; it is also
//! the easiest to keep correct across git versions, at the cost of spawning
//! a process per call.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use concord::error::{CoordError, Result};
use concord::worktree::{validate_worktree_name, CommitOid, MergeTreeOutcome, RepoPort, WorktreeHandle, WorktreePort};

/// A `git` CLI shim rooted at a repository's working directory.
pub struct CliGitRepo {
    /// The repository's top-level working directory (`git rev-parse
    /// --show-toplevel`), used as `-C` for every invocation.
    repo_root: PathBuf,
    /// Directory under which new worktrees are created, e.g.
    /// `<repo_root>/.concord/worktrees`.
    worktree_prefix: PathBuf,
}

impl CliGitRepo {
    /// Build a shim for the repository at `repo_root`, creating worktrees
    /// under `worktree_prefix`.
    #[must_use]
    pub fn new(repo_root: PathBuf, worktree_prefix: PathBuf) -> Self {
        Self { repo_root, worktree_prefix }
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_root)
            .args(args)
            .output()
            .map_err(|err| CoordError::GitError {
                command: format!("git {}", args.join(" ")),
                stderr: err.to_string(),
            })?;
        Ok(output)
    }

    fn run_ok(&self, args: &[&str]) -> Result<String> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(CoordError::GitError {
                command: format!("git {}", args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }
}

impl WorktreePort for CliGitRepo {
    fn create(&self, name: &str, base_ref: &str) -> Result<WorktreeHandle> {
        validate_worktree_name(name)?;
        let path = self.path_for(name);
        let path_str = path.to_string_lossy().into_owned();
        self.run_ok(&["worktree", "add", "--detach", &path_str, base_ref])?;
        let head = self.run_ok(&["-C", &path_str, "rev-parse", "HEAD"])?;
        Ok(WorktreeHandle {
            name: name.to_owned(),
            path,
            branch: base_ref.to_owned(),
            head,
        })
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.worktree_prefix.join(name)
    }

    fn remove(&self, name: &str, delete_branch: bool) -> Result<()> {
        let path_str = self.path_for(name).to_string_lossy().into_owned();
        self.run_ok(&["worktree", "remove", "--force", &path_str])?;
        if delete_branch {
            // Branch deletion failure after a successful worktree removal is
            // not fatal: the worktree is already gone, which is the caller's
            // primary concern.
            if let Err(err) = self.run_ok(&["branch", "-D", name]) {
                tracing::warn!(error = %err, branch = name, "worktree removed but branch deletion failed");
            }
        }
        Ok(())
    }

    fn list(&self) -> Result<Vec<WorktreeHandle>> {
        let raw = self.run_ok(&["worktree", "list", "--porcelain"])?;
        Ok(parse_worktree_list(&raw))
    }
}

impl RepoPort for CliGitRepo {
    fn fetch(&self, remote: &str) -> Result<()> {
        self.run_ok(&["fetch", remote]).map(|_| ())
    }

    fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool> {
        let output = self.run(&["merge-base", "--is-ancestor", ancestor, descendant])?;
        match output.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(CoordError::GitError {
                command: format!("git merge-base --is-ancestor {ancestor} {descendant}"),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            }),
        }
    }

    fn merge_base(&self, a: &str, b: &str) -> Result<Option<CommitOid>> {
        let output = self.run(&["merge-base", a, b])?;
        if output.status.success() {
            return Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_owned()));
        }
        // Exit code 1 with empty stderr means "no common ancestor"; any
        // other failure is a real error.
        if output.status.code() == Some(1) {
            return Ok(None);
        }
        Err(CoordError::GitError {
            command: format!("git merge-base {a} {b}"),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn merge_tree(&self, base: &str, ours: &str, theirs: &str) -> Result<MergeTreeOutcome> {
        let output = self.run(&["merge-tree", "--write-tree", "--merge-base", base, ours, theirs])?;
        let raw_output = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            let tree_oid = raw_output.lines().next().map(str::to_owned);
            return Ok(MergeTreeOutcome {
                clean: true,
                tree_oid,
                raw_output,
            });
        }
        // `git merge-tree` exits nonzero on conflicts but still writes a
        // conflict-annotated tree to stdout; exit codes above 1 indicate a
        // real invocation failure rather than "merge has conflicts".
        if output.status.code() == Some(1) {
            return Ok(MergeTreeOutcome {
                clean: false,
                tree_oid: None,
                raw_output,
            });
        }
        Err(CoordError::GitError {
            command: format!("git merge-tree {base} {ours} {theirs}"),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn rev_parse(&self, refname: &str) -> Result<CommitOid> {
        self.run_ok(&["rev-parse", refname])
    }
}

/// Parse `git worktree list --porcelain` output into handles. Each worktree
/// is a blank-line-delimited record of `key value` lines; `detached`
/// worktrees have no `branch` line, so they're reported with an empty
/// branch rather than dropped.
fn parse_worktree_list(raw: &str) -> Vec<WorktreeHandle> {
    let mut handles = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut head: Option<String> = None;
    let mut branch = String::new();

    let flush = |path: &mut Option<PathBuf>, head: &mut Option<String>, branch: &mut String, handles: &mut Vec<WorktreeHandle>| {
        if let (Some(p), Some(h)) = (path.take(), head.take()) {
            let name = p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            handles.push(WorktreeHandle {
                name,
                path: p,
                branch: std::mem::take(branch),
                head: h,
            });
        }
    };

    for line in raw.lines() {
        if line.is_empty() {
            flush(&mut path, &mut head, &mut branch, &mut handles);
            continue;
        }
        if let Some(value) = line.strip_prefix("worktree ") {
            path = Some(PathBuf::from(value));
        } else if let Some(value) = line.strip_prefix("HEAD ") {
            head = Some(value.to_owned());
        } else if let Some(value) = line.strip_prefix("branch ") {
            branch = value.trim_start_matches("refs/heads/").to_owned();
        }
    }
    flush(&mut path, &mut head, &mut branch, &mut handles);
    handles
}

/// Discover the top-level working directory of the git repository
/// containing `start`.
///
/// # Errors
/// Returns [`CoordError::GitError`] if `start` is not inside a git
/// repository.
pub fn discover_repo_root(start: &Path) -> Result<PathBuf> {
    let output = Command::new("git")
        .arg("-C")
        .arg(start)
        .args(["rev-parse", "--show-toplevel"])
        .output()
        .map_err(|err| CoordError::GitError {
            command: "git rev-parse --show-toplevel".to_owned(),
            stderr: err.to_string(),
        })?;
    if !output.status.success() {
        return Err(CoordError::GitError {
            command: "git rev-parse --show-toplevel".to_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(PathBuf::from(String::from_utf8_lossy(&output.stdout).trim()))
}
