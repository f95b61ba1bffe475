//! Input validation for sandbox operations (§4.8): remote paths and prompts
//! crossing into a shell command line on the remote side.

use crate::error::{CoordError, Result};

/// Characters permitted in a remote path component.
const ALLOWED_PATH_CHARS: fn(char) -> bool = |c: char| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '.' | '-');

/// Largest prompt accepted, in bytes.
pub const MAX_PROMPT_BYTES: usize = 100 * 1024;

/// Validate a remote path: must be absolute, drawn from
/// `[A-Za-z0-9/_.-]`, free of `..` traversal and `//` runs, and free of any
/// `.`/`..` path component.
///
/// # Errors
/// Returns [`CoordError::Validation`] on any of the above.
pub fn validate_remote_path(path: &str) -> Result<()> {
    let reject = |reason: &str| {
        Err(CoordError::Validation {
            field: "remote_path".to_owned(),
            reason: reason.to_owned(),
        })
    };

    if !path.starts_with('/') {
        return reject("must be an absolute path");
    }
    if let Some(bad) = path.chars().find(|c| !ALLOWED_PATH_CHARS(*c)) {
        return reject(&format!("contains disallowed character '{bad}'"));
    }
    if path.contains("..") {
        return reject("must not contain '..'");
    }
    if path.contains("//") {
        return reject("must not contain consecutive slashes");
    }
    if path.split('/').any(|segment| segment == "." || segment == "..") {
        return reject("must not contain '.' or '..' path components");
    }
    Ok(())
}

/// Validate a prompt: non-empty and within [`MAX_PROMPT_BYTES`].
///
/// # Errors
/// Returns [`CoordError::Validation`] if the prompt is empty or oversized.
pub fn validate_prompt(prompt: &str) -> Result<()> {
    if prompt.is_empty() {
        return Err(CoordError::Validation {
            field: "prompt".to_owned(),
            reason: "must not be empty".to_owned(),
        });
    }
    if prompt.len() > MAX_PROMPT_BYTES {
        return Err(CoordError::Validation {
            field: "prompt".to_owned(),
            reason: format!("exceeds {MAX_PROMPT_BYTES} byte limit"),
        });
    }
    Ok(())
}

/// Strip control characters (other than newline/tab) from a prompt before it
/// reaches a remote shell command line, mirroring
/// [`crate::sandbox::download::shell_quote`]'s path sanitization.
#[must_use]
pub fn sanitize_prompt(prompt: &str) -> String {
    prompt.chars().filter(|c| !c.is_control() || *c == '\n' || *c == '\t').collect()
}
