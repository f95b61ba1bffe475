//! Downloading changed files back from a sandbox (§4.8 `download_changes`).

use std::path::Path;

use crate::error::{CoordError, Result};
use crate::model::ids::SandboxId;

use super::validate::validate_remote_path;
use super::SandboxProvider;

/// One file reported as changed by a remote porcelain status listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    /// The two-letter status code (e.g. `"M "`, `"A "`, `"R "`).
    pub status: String,
    /// The file's current path. For renames this is the *new* name.
    pub path: String,
}

/// Parse `git status --porcelain`-style output: each line is `XY filename`,
/// with renames written as `XY old -> new`. Only the new name is kept for
/// renames, since that is what should be fetched.
#[must_use]
pub fn parse_porcelain_status(output: &str) -> Vec<ChangedFile> {
    output
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let status = line[..2].to_owned();
            let rest = line[3..].trim();
            let path = rest.split_once(" -> ").map_or(rest, |(_old, new)| new).to_owned();
            ChangedFile { status, path }
        })
        .collect()
}

/// Single-quote `path` for inclusion in a remote shell command line,
/// doubling embedded single quotes via the close/escape/open idiom
/// (`'...'"'"'...'`). Control characters other than newline/tab are
/// stripped first, since they have no legitimate place in a path.
#[must_use]
pub fn shell_quote(path: &str) -> String {
    let sanitized: String = path.chars().filter(|c| !c.is_control() || *c == '\n' || *c == '\t').collect();
    let mut quoted = String::with_capacity(sanitized.len() + 2);
    quoted.push('\'');
    for c in sanitized.chars() {
        if c == '\'' {
            quoted.push_str("'\"'\"'");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Build the shell-escaped argument list for a remote tar/cp command
/// fetching exactly `files`.
///
/// # Errors
/// Returns [`CoordError::Validation`] if `files` is empty.
pub fn build_remote_argument_list(files: &[ChangedFile]) -> Result<String> {
    if files.is_empty() {
        return Err(CoordError::Validation {
            field: "changed_files".to_owned(),
            reason: "no changed files to fetch".to_owned(),
        });
    }
    Ok(files.iter().map(|f| shell_quote(&f.path)).collect::<Vec<_>>().join(" "))
}

/// Query which files changed under `remote_path` on sandbox `id`, fetch
/// exactly those files as a tarball, and extract them into `local_path`
/// (§4.8 `download_changes`). Returns the list of files that were pulled
/// down; an empty remote changeset is a no-op, not an error.
///
/// # Errors
/// Returns [`CoordError::Validation`] if `remote_path` is malformed, or a
/// provider error on transport failure or archive extraction.
pub fn download_changes(provider: &dyn SandboxProvider, id: SandboxId, remote_path: &str, local_path: &Path) -> Result<Vec<ChangedFile>> {
    validate_remote_path(remote_path)?;

    let status_output = provider.remote_changed_files(id, remote_path)?;
    let changed = parse_porcelain_status(&status_output);
    if changed.is_empty() {
        return Ok(changed);
    }

    let file_args = build_remote_argument_list(&changed)?;
    let archive_bytes = provider.download_archive(id, remote_path, &file_args)?;

    let archive_path = std::env::temp_dir().join(format!("concord-download-{id}.tar.gz"));
    std::fs::write(&archive_path, &archive_bytes)?;
    let extraction = extract_archive(&archive_path, local_path);
    drop(std::fs::remove_file(&archive_path));
    extraction?;

    Ok(changed)
}

fn extract_archive(archive_path: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    let file = std::fs::File::open(archive_path)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    archive.unpack(dest)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_modified_and_added_entries() {
        let output = " M src/lib.rs\nA  src/new.rs\n";
        let files = parse_porcelain_status(output);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "src/lib.rs");
        assert_eq!(files[1].path, "src/new.rs");
    }

    #[test]
    fn parses_rename_keeping_new_name() {
        let output = "R  src/old.rs -> src/new.rs\n";
        let files = parse_porcelain_status(output);
        assert_eq!(files[0].path, "src/new.rs");
    }

    #[test]
    fn shell_quote_escapes_embedded_quotes() {
        assert_eq!(shell_quote("it's.rs"), "'it'\"'\"'s.rs'");
    }

    #[test]
    fn shell_quote_strips_control_characters() {
        let quoted = shell_quote("a\u{0007}b.rs");
        assert_eq!(quoted, "'ab.rs'");
    }

    #[test]
    fn build_remote_argument_list_joins_quoted_paths() {
        let files = vec![
            ChangedFile {
                status: " M".to_owned(),
                path: "a.rs".to_owned(),
            },
            ChangedFile {
                status: "A ".to_owned(),
                path: "b.rs".to_owned(),
            },
        ];
        assert_eq!(build_remote_argument_list(&files).unwrap(), "'a.rs' 'b.rs'");
    }

    #[test]
    fn build_remote_argument_list_rejects_empty() {
        assert!(build_remote_argument_list(&[]).is_err());
    }

    struct StubProvider {
        porcelain: String,
        archive_bytes: Vec<u8>,
    }

    impl SandboxProvider for StubProvider {
        fn create(&self, _api_key: &str) -> Result<crate::sandbox::SandboxHandle> {
            unreachable!("not exercised in these tests")
        }

        fn current_cost_cents(&self, _id: SandboxId) -> Result<u64> {
            unreachable!("not exercised in these tests")
        }

        fn kill(&self, _id: SandboxId) -> Result<()> {
            unreachable!("not exercised in these tests")
        }

        fn remote_changed_files(&self, _id: SandboxId, _remote_path: &str) -> Result<String> {
            Ok(self.porcelain.clone())
        }

        fn download_archive(&self, _id: SandboxId, _remote_path: &str, _file_args: &str) -> Result<Vec<u8>> {
            Ok(self.archive_bytes.clone())
        }
    }

    #[test]
    fn download_changes_extracts_reported_files() {
        let source_dir = tempfile::tempdir().unwrap();
        std::fs::write(source_dir.path().join("changed.rs"), b"fn main() {}").unwrap();
        let archive_dir = tempfile::tempdir().unwrap();
        let archive_path = archive_dir.path().join("out.tar.gz");
        crate::sandbox::upload::build_archive(source_dir.path(), &archive_path).unwrap();

        let provider = StubProvider {
            porcelain: " M changed.rs\n".to_owned(),
            archive_bytes: std::fs::read(&archive_path).unwrap(),
        };
        let dest_dir = tempfile::tempdir().unwrap();
        let changed = download_changes(&provider, SandboxId::new(), "/workspace", dest_dir.path()).unwrap();
        assert_eq!(changed.len(), 1);
        assert!(dest_dir.path().join("changed.rs").is_file());
    }

    #[test]
    fn download_changes_is_a_no_op_when_nothing_changed() {
        let provider = StubProvider {
            porcelain: String::new(),
            archive_bytes: Vec::new(),
        };
        let dest_dir = tempfile::tempdir().unwrap();
        let changed = download_changes(&provider, SandboxId::new(), "/workspace", dest_dir.path()).unwrap();
        assert!(changed.is_empty());
    }

    #[test]
    fn download_changes_rejects_a_bad_remote_path() {
        let provider = StubProvider {
            porcelain: String::new(),
            archive_bytes: Vec::new(),
        };
        let dest_dir = tempfile::tempdir().unwrap();
        let err = download_changes(&provider, SandboxId::new(), "relative", dest_dir.path()).unwrap_err();
        assert!(matches!(err, CoordError::Validation { .. }));
    }
}
