//! Conflict marker parsing: splits `git merge-tree` output into per-file
//! blocks and parses `<<<<<<<`/`|||||||`/`=======`/`>>>>>>>` regions within
//! each (§4.7 step 3).

use std::path::{Path, PathBuf};

/// Fallback file path used when a block's header cannot be parsed (§9 Open
/// Question (a)).
pub const UNKNOWN_FILE_PATH: &str = "unknown";

/// One file's raw conflicted body, as sliced out of `merge-tree` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBlock {
    /// Repo-relative file path, or [`UNKNOWN_FILE_PATH`].
    pub file_path: PathBuf,
    /// The file's raw body, markers included.
    pub body: String,
}

/// One `<<<<<<<` ... `>>>>>>>` region within a file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MarkerRegion {
    /// Content between `|||||||` and `=======`, present only for diff3
    /// (three-way) markers.
    pub base: Option<String>,
    /// Content between `<<<<<<<` (or the base marker) and `=======`.
    pub ours: String,
    /// Content between `=======` and `>>>>>>>`.
    pub theirs: String,
}

/// Every marker region found in a single file's body, plus the body
/// verbatim for audit/storage.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConflictMarkers {
    /// The unparsed body this was extracted from.
    pub raw: String,
    /// Each conflicted region, in file order.
    pub regions: Vec<MarkerRegion>,
}

/// Split raw `git merge-tree` output into one [`FileBlock`] per file that
/// contains conflict markers. `merge-tree` emits a `changed in both` header
/// per conflicted path followed by the file's content with markers inlined;
/// the exact header format varies across git versions, so this scans for
/// the `<<<<<<<` marker and walks backward for the nearest path-looking
/// header line, falling back to [`UNKNOWN_FILE_PATH`] when none is found.
#[must_use]
pub fn split_into_blocks(raw_output: &str) -> Vec<FileBlock> {
    let mut blocks = Vec::new();
    let lines: Vec<&str> = raw_output.lines().collect();
    let mut i = 0;
    while i < lines.len() {
        if lines[i].starts_with("<<<<<<<") {
            let file_path = find_header_path(&lines, i);
            let start = i;
            let mut end = i;
            while end < lines.len() && !lines[end].starts_with(">>>>>>>") {
                end += 1;
            }
            end = (end + 1).min(lines.len());
            let body = lines[start..end].join("\n");
            blocks.push(FileBlock {
                file_path,
                body,
            });
            i = end;
        } else {
            i += 1;
        }
    }
    blocks
}

/// Walk backward from a `<<<<<<<` line looking for a line that looks like a
/// file path (no conflict-marker prefix, contains a `/` or a `.`).
fn find_header_path(lines: &[&str], marker_idx: usize) -> PathBuf {
    for idx in (0..marker_idx).rev() {
        let line = lines[idx].trim();
        if line.is_empty() || line.starts_with("<<<<<<<") || line.starts_with(">>>>>>>") {
            continue;
        }
        if let Some(path) = line.strip_prefix("+++ b/").or_else(|| line.strip_prefix("--- a/")) {
            return PathBuf::from(path);
        }
        if (line.contains('/') || line.contains('.')) && !line.contains(' ') {
            return PathBuf::from(line);
        }
    }
    PathBuf::from(UNKNOWN_FILE_PATH)
}

/// Parse every `<<<<<<<`/`|||||||`/`=======`/`>>>>>>>` region out of a raw
/// body. Regions with malformed or missing markers are skipped.
#[must_use]
pub fn parse_markers(body: &str) -> ConflictMarkers {
    let lines: Vec<&str> = body.lines().collect();
    let mut regions = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        if !lines[i].starts_with("<<<<<<<") {
            i += 1;
            continue;
        }
        let ours_start = i + 1;
        let mut cursor = ours_start;
        let mut base_end = None;
        while cursor < lines.len() && !lines[cursor].starts_with("=======") && !lines[cursor].starts_with("|||||||") {
            cursor += 1;
        }
        if cursor < lines.len() && lines[cursor].starts_with("|||||||") {
            base_end = Some(cursor);
            cursor += 1;
            while cursor < lines.len() && !lines[cursor].starts_with("=======") {
                cursor += 1;
            }
        }
        let Some(sep_idx) = (cursor < lines.len() && lines[cursor].starts_with("=======")).then_some(cursor) else {
            i += 1;
            continue;
        };
        let theirs_start = sep_idx + 1;
        let mut theirs_end = theirs_start;
        while theirs_end < lines.len() && !lines[theirs_end].starts_with(">>>>>>>") {
            theirs_end += 1;
        }
        if theirs_end >= lines.len() {
            i += 1;
            continue;
        }

        let (ours_end, base) = if let Some(base_marker) = base_end {
            (base_marker, Some(lines[ours_start..base_marker].join("\n")))
        } else {
            (sep_idx, None)
        };
        let ours = lines[ours_start..ours_end].join("\n");
        let theirs = lines[theirs_start..theirs_end].join("\n");

        regions.push(MarkerRegion {
            base,
            ours,
            theirs,
        });
        i = theirs_end + 1;
    }

    ConflictMarkers {
        raw: body.to_owned(),
        regions,
    }
}
