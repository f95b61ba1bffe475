//! Workspace upload: exclusion-aware tar.gz archive, chunked transfer for
//! large archives (§4.8 `upload_workspace`).

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use ignore::WalkBuilder;

use crate::error::{CoordError, Result};
use crate::model::ids::SandboxId;

use super::validate::validate_remote_path;
use super::SandboxProvider;

/// Archives over this size are split into chunks rather than uploaded in
/// one shot.
pub const CHUNK_THRESHOLD_BYTES: u64 = 50 * 1024 * 1024;

/// Per-chunk upload deadline.
pub const CHUNK_UPLOAD_TIMEOUT: Duration = Duration::from_secs(2 * 60);

/// Single-shot upload deadline for archives under the chunk threshold.
pub const SINGLE_SHOT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Byte-count tolerance allowed between local archive size and what the
/// remote reports after upload.
const BYTE_TOLERANCE_FRACTION: f64 = 0.01;

/// Glob patterns always excluded regardless of `.gitignore`/`.concordignore`
/// contents, since they are near-certain to hold secrets.
const ALWAYS_EXCLUDED: &[&str] = &[".env", ".env.*", "*.pem", "*.key", "id_rsa*", "*credentials*", "*.p12", "*.pfx"];

/// Heavy directories excluded even if not gitignored, since they are
/// reconstructable and would otherwise dominate archive size.
const HEAVY_DIRS: &[&str] = &["node_modules", ".git", "target", "dist", "build", ".next", "__pycache__"];

/// Build the exclusion matcher for `workspace_root`: always-excluded secret
/// patterns, heavy directories, and the union of `.gitignore` and
/// `.concordignore` (blank lines and `#` comments dropped, per each file's
/// own semantics since `GitignoreBuilder` parses those itself).
///
/// # Errors
/// Returns [`CoordError::Validation`] if a pattern fails to compile.
pub fn build_exclusion_matcher(workspace_root: &Path) -> Result<ignore::gitignore::Gitignore> {
    let mut builder = GitignoreBuilder::new(workspace_root);

    for pattern in ALWAYS_EXCLUDED.iter().chain(HEAVY_DIRS) {
        builder.add_line(None, pattern).map_err(|err| CoordError::Validation {
            field: "exclusion_pattern".to_owned(),
            reason: err.to_string(),
        })?;
    }

    for name in [".gitignore", ".concordignore"] {
        let path = workspace_root.join(name);
        if path.is_file() {
            if let Some(err) = builder.add(&path) {
                tracing::warn!(error = %err, file = name, "failed to load ignore file, skipping its rules");
            }
        }
    }

    builder.build().map_err(|err| CoordError::Validation {
        field: "exclusion_patterns".to_owned(),
        reason: err.to_string(),
    })
}

/// Walk `workspace_root`, returning the absolute paths of every file not
/// excluded by `matcher`. Shared by [`build_archive`] (to pack them) and
/// [`count_archived_files`] (to count them for [`verify_upload`]).
fn walk_included_files(workspace_root: &Path, matcher: &Gitignore) -> Result<Vec<std::path::PathBuf>> {
    let walker = WalkBuilder::new(workspace_root).hidden(false).git_ignore(false).git_exclude(false).build();
    let mut files = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|err| CoordError::Internal(err.to_string()))?;
        let path = entry.path();
        if path == workspace_root {
            continue;
        }
        let relative = path.strip_prefix(workspace_root).unwrap_or(path);
        if matcher.matched(relative, path.is_dir()).is_ignore() {
            continue;
        }
        if entry.file_type().is_some_and(|t| t.is_file()) {
            files.push(path.to_path_buf());
        }
    }
    Ok(files)
}

/// Build a gzip tar archive of `workspace_root` at `dest_path`, respecting
/// the exclusion matcher. Returns the archive's byte length.
///
/// # Errors
/// Returns [`CoordError::Io`] on any filesystem failure.
pub fn build_archive(workspace_root: &Path, dest_path: &Path) -> Result<u64> {
    let matcher = build_exclusion_matcher(workspace_root)?;
    let file = File::create(dest_path)?;
    let encoder = GzEncoder::new(file, Compression::new(6));
    let mut builder = tar::Builder::new(encoder);

    for path in walk_included_files(workspace_root, &matcher)? {
        let relative = path.strip_prefix(workspace_root).unwrap_or(&path);
        builder.append_path_with_name(&path, relative)?;
    }

    let encoder = builder.into_inner()?;
    encoder.finish()?;
    Ok(std::fs::metadata(dest_path)?.len())
}

/// Count the files [`build_archive`] would pack for `workspace_root`,
/// without writing an archive. Used to check the local side of
/// [`verify_upload`].
///
/// # Errors
/// Returns [`CoordError::Io`] on any filesystem failure.
pub fn count_archived_files(workspace_root: &Path) -> Result<u64> {
    let matcher = build_exclusion_matcher(workspace_root)?;
    Ok(walk_included_files(workspace_root, &matcher)?.len() as u64)
}

/// One zero-padded chunk of a split archive.
#[derive(Debug, Clone)]
pub struct ArchiveChunk {
    /// Zero-padded sequence name (e.g. `"part-0000"`), lexicographic order
    /// equals numeric order.
    pub name: String,
    /// The chunk's raw bytes.
    pub data: Vec<u8>,
}

/// Split an archive file into fixed-size chunks, zero-padded so
/// lexicographic glob order matches numeric order on the remote side.
///
/// # Errors
/// Returns [`CoordError::Io`] on read failure.
pub fn split_into_chunks(archive_path: &Path, chunk_size: usize) -> Result<Vec<ArchiveChunk>> {
    let mut reader = BufReader::new(File::open(archive_path)?);
    let mut chunks = Vec::new();
    let mut index = 0usize;
    loop {
        let mut buf = vec![0u8; chunk_size];
        let mut filled = 0;
        while filled < chunk_size {
            let n = reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        buf.truncate(filled);
        chunks.push(ArchiveChunk {
            name: format!("part-{index:04}"),
            data: buf,
        });
        index += 1;
    }
    Ok(chunks)
}

/// Verify the remote reported the same number of files and byte count
/// (within tolerance) as the local archive.
#[must_use]
pub fn verify_upload(local_bytes: u64, local_file_count: u64, remote_bytes: u64, remote_file_count: u64) -> bool {
    if local_file_count != remote_file_count {
        return false;
    }
    let diff = local_bytes.abs_diff(remote_bytes) as f64;
    diff <= local_bytes as f64 * BYTE_TOLERANCE_FRACTION
}

/// Outcome of [`upload_workspace`].
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// Local archive size, in bytes.
    pub archive_bytes: u64,
    /// Whether the archive was split into chunks rather than sent in one shot.
    pub chunked: bool,
}

/// Archive `workspace_root`, transfer it to `remote_path` on the sandbox
/// `id` via `provider`, and verify what the remote reports landed matches
/// the local archive within tolerance (§4.8 `upload_workspace`).
///
/// Archives over [`CHUNK_THRESHOLD_BYTES`] are split and uploaded chunk by
/// chunk under [`CHUNK_UPLOAD_TIMEOUT`] each; smaller archives go up in one
/// shot under [`SINGLE_SHOT_UPLOAD_TIMEOUT`].
///
/// # Errors
/// Returns [`CoordError::Validation`] if `remote_path` is malformed or the
/// post-transfer verification fails, or a provider error on transport
/// failure.
pub fn upload_workspace(provider: &dyn SandboxProvider, id: SandboxId, workspace_root: &Path, remote_path: &str) -> Result<UploadOutcome> {
    validate_remote_path(remote_path)?;

    let archive_path = std::env::temp_dir().join(format!("concord-upload-{id}.tar.gz"));
    let archive_bytes = build_archive(workspace_root, &archive_path)?;
    let local_file_count = count_archived_files(workspace_root)?;

    let chunked = archive_bytes > CHUNK_THRESHOLD_BYTES;
    let chunk_names = if chunked {
        let chunks = split_into_chunks(&archive_path, CHUNK_THRESHOLD_BYTES as usize)?;
        for chunk in &chunks {
            provider.upload_chunk(id, remote_path, &chunk.name, &chunk.data, CHUNK_UPLOAD_TIMEOUT)?;
        }
        chunks.into_iter().map(|c| c.name).collect::<Vec<_>>()
    } else {
        let data = std::fs::read(&archive_path)?;
        let name = "part-0000".to_owned();
        provider.upload_chunk(id, remote_path, &name, &data, SINGLE_SHOT_UPLOAD_TIMEOUT)?;
        vec![name]
    };

    let (remote_bytes, remote_file_count) = provider.finalize_upload(id, remote_path, &chunk_names)?;
    drop(std::fs::remove_file(&archive_path));

    if !verify_upload(archive_bytes, local_file_count, remote_bytes, remote_file_count) {
        return Err(CoordError::Validation {
            field: "upload".to_owned(),
            reason: format!(
                "remote reports {remote_file_count} files / {remote_bytes} bytes, local archive has {local_file_count} files / {archive_bytes} bytes"
            ),
        });
    }

    Ok(UploadOutcome { archive_bytes, chunked })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn exclusion_matcher_excludes_secrets_and_heavy_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let matcher = build_exclusion_matcher(dir.path()).unwrap();
        assert!(matcher.matched(dir.path().join(".env"), false).is_ignore());
        assert!(matcher.matched(dir.path().join("node_modules"), true).is_ignore());
        assert!(!matcher.matched(dir.path().join("src/main.rs"), false).is_ignore());
    }

    #[test]
    fn build_archive_produces_nonempty_gzip() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        fs::create_dir_all(dir.path().join("node_modules")).unwrap();
        fs::write(dir.path().join("node_modules/x.js"), b"ignored").unwrap();

        let dest = dir.path().join("out.tar.gz");
        let size = build_archive(dir.path(), &dest).unwrap();
        assert!(size > 0);
    }

    #[test]
    fn chunks_roundtrip_to_original_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blob.bin");
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
        fs::write(&path, &data).unwrap();

        let chunks = split_into_chunks(&path, 4096).unwrap();
        let mut reassembled = Vec::new();
        for chunk in &chunks {
            reassembled.extend_from_slice(&chunk.data);
        }
        assert_eq!(reassembled, data);
        assert_eq!(chunks[0].name, "part-0000");
    }

    #[test]
    fn verify_upload_accepts_small_tolerance() {
        assert!(verify_upload(1_000_000, 10, 1_005_000, 10));
        assert!(!verify_upload(1_000_000, 10, 1_200_000, 10));
        assert!(!verify_upload(1_000_000, 10, 1_000_000, 9));
    }

    struct EchoProvider {
        reported_bytes: std::sync::Mutex<u64>,
        reported_files: u64,
    }

    impl SandboxProvider for EchoProvider {
        fn create(&self, _api_key: &str) -> Result<crate::sandbox::SandboxHandle> {
            unreachable!("not exercised in these tests")
        }

        fn current_cost_cents(&self, _id: SandboxId) -> Result<u64> {
            unreachable!("not exercised in these tests")
        }

        fn kill(&self, _id: SandboxId) -> Result<()> {
            unreachable!("not exercised in these tests")
        }

        fn upload_chunk(&self, _id: SandboxId, _remote_path: &str, _chunk_name: &str, data: &[u8], _timeout: std::time::Duration) -> Result<()> {
            *self.reported_bytes.lock().unwrap() += data.len() as u64;
            Ok(())
        }

        fn finalize_upload(&self, _id: SandboxId, _remote_path: &str, _chunk_names: &[String]) -> Result<(u64, u64)> {
            Ok((*self.reported_bytes.lock().unwrap(), self.reported_files))
        }
    }

    #[test]
    fn upload_workspace_round_trips_through_a_stub_provider() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();
        let local_file_count = count_archived_files(dir.path()).unwrap();

        let provider = EchoProvider {
            reported_bytes: std::sync::Mutex::new(0),
            reported_files: local_file_count,
        };
        let outcome = upload_workspace(&provider, SandboxId::new(), dir.path(), "/workspace").unwrap();
        assert!(outcome.archive_bytes > 0);
        assert!(!outcome.chunked);
    }

    #[test]
    fn upload_workspace_rejects_a_bad_remote_path() {
        let dir = tempfile::tempdir().unwrap();
        let provider = EchoProvider {
            reported_bytes: std::sync::Mutex::new(0),
            reported_files: 0,
        };
        let err = upload_workspace(&provider, SandboxId::new(), dir.path(), "relative/path").unwrap_err();
        assert!(matches!(err, CoordError::Validation { .. }));
    }

    #[test]
    fn upload_workspace_rejects_a_mismatched_remote_report() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let provider = EchoProvider {
            reported_bytes: std::sync::Mutex::new(0),
            reported_files: 999,
        };
        let err = upload_workspace(&provider, SandboxId::new(), dir.path(), "/workspace").unwrap_err();
        assert!(matches!(err, CoordError::Validation { .. }));
    }
}
