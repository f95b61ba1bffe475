//! Sandbox Controller: provisions and supervises remote execution sandboxes
//! for agent sessions (§4.8).

pub mod budget_guard;
pub mod download;
pub mod http_provider;
pub mod scan;
pub mod upload;
pub mod validate;

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::{CoordError, Result};
use crate::model::ids::SandboxId;

pub use budget_guard::{BudgetWarning, TimeoutWarning};
pub use scan::{scan_for_credentials, ScanReport};

/// Default soft warning thresholds, in minutes elapsed since creation.
pub const DEFAULT_TIMEOUT_WARNING_MINUTES: [u64; 2] = [30, 50];

/// The hard cap past which a sandbox is killed outright.
pub const HARD_TIMEOUT_MINUTES: u64 = 60;

/// Default cost-fraction thresholds for budget warnings.
pub const DEFAULT_BUDGET_WARNING_FRACTIONS: [f64; 2] = [0.5, 0.8];

/// A provisioned remote sandbox and the bookkeeping needed to police it.
#[derive(Debug, Clone)]
pub struct SandboxHandle {
    /// Unique identifier.
    pub id: SandboxId,
    /// When the sandbox was created.
    pub created_at: DateTime<Utc>,
    /// Minutes past `created_at` at which the sandbox is force-killed.
    pub hard_timeout_minutes: u64,
    /// Minutes past `created_at` at which a soft warning fires.
    pub warning_thresholds_minutes: Vec<u64>,
    /// Optional cost ceiling, in integer cents.
    pub budget_limit_cents: Option<u64>,
    /// Estimated cost rate, in integer cents per hour.
    pub hourly_rate_cents: u64,
}

/// The pluggable boundary to a remote sandbox provider. Implementations
/// drive the actual provisioning API; this crate's coordination logic only
/// depends on this trait.
pub trait SandboxProvider: Send + Sync {
    /// Provision a new sandbox, authenticating with `api_key`.
    ///
    /// # Errors
    /// Returns [`CoordError::Auth`] on a rejected credential,
    /// [`CoordError::Quota`] if the account is over its sandbox quota, or
    /// [`CoordError::Network`] on a connection failure or timeout.
    fn create(&self, api_key: &str) -> Result<SandboxHandle>;

    /// Current accrued cost, in integer cents.
    ///
    /// # Errors
    /// Returns [`CoordError::Network`] if the provider cannot be reached.
    fn current_cost_cents(&self, id: SandboxId) -> Result<u64>;

    /// Terminate a sandbox immediately.
    ///
    /// # Errors
    /// Returns [`CoordError::Network`] if the provider cannot be reached.
    fn kill(&self, id: SandboxId) -> Result<()>;

    /// Upload one chunk of archived workspace data to `remote_path`, named
    /// `chunk_name` (zero-padded so lexicographic order equals numeric
    /// order). A single-shot transfer uploads the whole archive as one
    /// chunk.
    ///
    /// The default implementation reports the operation as unsupported;
    /// providers that can actually move bytes override it.
    ///
    /// # Errors
    /// Returns [`CoordError::Network`] on transport failure or timeout.
    fn upload_chunk(&self, id: SandboxId, remote_path: &str, chunk_name: &str, data: &[u8], timeout: Duration) -> Result<()> {
        let _ = (id, remote_path, chunk_name, data, timeout);
        Err(unsupported_transfer("upload_chunk"))
    }

    /// Ask the sandbox to concatenate every chunk uploaded for `remote_path`
    /// (in `chunk_names` order) and extract the result, reporting what
    /// landed as `(total_bytes, file_count)`.
    ///
    /// # Errors
    /// Returns [`CoordError::Network`] on transport failure.
    fn finalize_upload(&self, id: SandboxId, remote_path: &str, chunk_names: &[String]) -> Result<(u64, u64)> {
        let _ = (id, remote_path, chunk_names);
        Err(unsupported_transfer("finalize_upload"))
    }

    /// Fetch `git status --porcelain`-style output for `remote_path` on the
    /// sandbox.
    ///
    /// # Errors
    /// Returns [`CoordError::Network`] on transport failure.
    fn remote_changed_files(&self, id: SandboxId, remote_path: &str) -> Result<String> {
        let _ = (id, remote_path);
        Err(unsupported_transfer("remote_changed_files"))
    }

    /// Request a tarball rooted at `remote_path` containing exactly the
    /// shell-escaped file argument list built by
    /// [`download::build_remote_argument_list`], and return its raw bytes.
    ///
    /// # Errors
    /// Returns [`CoordError::Network`] on transport failure.
    fn download_archive(&self, id: SandboxId, remote_path: &str, file_args: &str) -> Result<Vec<u8>> {
        let _ = (id, remote_path, file_args);
        Err(unsupported_transfer("download_archive"))
    }
}

fn unsupported_transfer(operation: &'static str) -> CoordError {
    CoordError::Network {
        operation: operation.to_owned(),
        detail: "this sandbox provider does not support transfer operations".to_owned(),
    }
}

/// Resolve the sandbox API credential from an explicit argument or the
/// `CONCORD_SANDBOX_API_KEY` environment variable.
///
/// # Errors
/// Returns [`CoordError::Auth`] if neither source provides a credential.
pub fn resolve_api_key(explicit: Option<&str>) -> Result<String> {
    if let Some(key) = explicit {
        if !key.is_empty() {
            return Ok(key.to_owned());
        }
    }
    std::env::var("CONCORD_SANDBOX_API_KEY")
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CoordError::Auth {
            detail: "no sandbox API key provided and CONCORD_SANDBOX_API_KEY is unset".to_owned(),
        })
}

/// Provisions and supervises sandboxes, tracking which timeout/budget
/// thresholds have already fired so each fires exactly once per sandbox
/// (§4.8).
pub struct SandboxController<'a> {
    provider: &'a dyn SandboxProvider,
    fired_timeout: Mutex<HashSet<(SandboxId, u64)>>,
    fired_budget: Mutex<HashSet<(SandboxId, u64)>>,
}

impl<'a> SandboxController<'a> {
    /// Construct a controller backed by `provider`.
    #[must_use]
    pub fn new(provider: &'a dyn SandboxProvider) -> Self {
        Self {
            provider,
            fired_timeout: Mutex::new(HashSet::new()),
            fired_budget: Mutex::new(HashSet::new()),
        }
    }

    /// Provision a new sandbox.
    ///
    /// # Errors
    /// See [`SandboxProvider::create`].
    pub fn create_sandbox(&self, api_key: Option<&str>) -> Result<SandboxHandle> {
        let key = resolve_api_key(api_key)?;
        self.provider.create(&key)
    }

    /// Check elapsed time against the sandbox's configured thresholds,
    /// killing it outright past the hard cap.
    ///
    /// # Errors
    /// See [`SandboxProvider::kill`].
    pub fn enforce_timeout(&self, handle: &SandboxHandle, now: DateTime<Utc>) -> Result<Option<TimeoutWarning>> {
        budget_guard::enforce_timeout(self.provider, &self.fired_timeout, handle, now)
    }

    /// Check accrued cost against the sandbox's budget, terminating it if
    /// the limit has been reached.
    ///
    /// # Errors
    /// Returns [`CoordError::BudgetExceeded`] if the limit was reached (the
    /// sandbox has already been killed), or a provider error.
    pub fn check_budget_limit(&self, handle: &SandboxHandle) -> Result<Option<BudgetWarning>> {
        budget_guard::check_budget_limit(self.provider, &self.fired_budget, handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct StubProvider {
        cost_cents: StdMutex<u64>,
        killed: StdMutex<Vec<SandboxId>>,
    }

    impl SandboxProvider for StubProvider {
        fn create(&self, _api_key: &str) -> Result<SandboxHandle> {
            Ok(SandboxHandle {
                id: SandboxId::new(),
                created_at: Utc::now(),
                hard_timeout_minutes: HARD_TIMEOUT_MINUTES,
                warning_thresholds_minutes: DEFAULT_TIMEOUT_WARNING_MINUTES.to_vec(),
                budget_limit_cents: Some(1000),
                hourly_rate_cents: 100,
            })
        }

        fn current_cost_cents(&self, _id: SandboxId) -> Result<u64> {
            Ok(*self.cost_cents.lock().unwrap())
        }

        fn kill(&self, id: SandboxId) -> Result<()> {
            self.killed.lock().unwrap().push(id);
            Ok(())
        }
    }

    #[test]
    fn resolve_api_key_prefers_explicit_argument() {
        assert_eq!(resolve_api_key(Some("explicit")).unwrap(), "explicit");
    }

    #[test]
    fn resolve_api_key_falls_back_to_env_or_errors() {
        // SAFETY-free: asserting absence is fine since the test harness does
        // not set this variable.
        if std::env::var("CONCORD_SANDBOX_API_KEY").is_err() {
            assert!(resolve_api_key(None).is_err());
        }
    }

    #[test]
    fn create_sandbox_uses_explicit_key() {
        let provider = StubProvider {
            cost_cents: StdMutex::new(0),
            killed: StdMutex::new(Vec::new()),
        };
        let controller = SandboxController::new(&provider);
        let handle = controller.create_sandbox(Some("k")).unwrap();
        assert_eq!(handle.budget_limit_cents, Some(1000));
    }
}
