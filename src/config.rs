//! Concord configuration: `.concord/config.toml` (repo-local), a
//! user-profile override, a dot-path `get`/`set` API, and a debounced
//! background writer (§4.9, §6).

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Debounce window for coalescing bursts of writes on the background
/// thread.
const WRITE_DEBOUNCE: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level Concord configuration.
///
/// Parsed from `.concord/config.toml`. Missing fields use sensible
/// defaults; a missing file means all defaults, not an error.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ConcordConfig {
    /// Budget / cost-tracking settings.
    #[serde(default)]
    pub budget: BudgetConfig,
}

/// Budget settings (§4.9, §6).
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BudgetConfig {
    /// Monthly spend ceiling, in integer cents. Zero disables the monthly
    /// cap.
    #[serde(default = "default_monthly_limit_cents")]
    pub monthly_limit_cents: u64,
    /// Default per-session spend ceiling, in integer cents. Zero disables
    /// the per-session cap.
    #[serde(default = "default_per_session_cents")]
    pub per_session_default_cents: u64,
    /// Fractions of a limit, in `[0, 1]`, at which a warning fires.
    #[serde(default = "default_warning_thresholds")]
    pub warning_thresholds: Vec<f64>,
    /// Estimated sandbox cost rate, in integer cents per hour.
    #[serde(default = "default_hourly_rate_cents")]
    pub sandbox_hourly_rate_cents: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            monthly_limit_cents: default_monthly_limit_cents(),
            per_session_default_cents: default_per_session_cents(),
            warning_thresholds: default_warning_thresholds(),
            sandbox_hourly_rate_cents: default_hourly_rate_cents(),
        }
    }
}

const fn default_monthly_limit_cents() -> u64 {
    0
}

const fn default_per_session_cents() -> u64 {
    500
}

fn default_warning_thresholds() -> Vec<f64> {
    vec![0.5, 0.8]
}

const fn default_hourly_rate_cents() -> u64 {
    50
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

/// Error loading or validating a Concord configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path being loaded, if known.
    pub path: Option<PathBuf>,
    /// Human-readable message, with line-level detail when available.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConcordConfig {
    /// Load from `path`, resetting to defaults (logged at `warn`, never an
    /// error) if the file is missing, unreadable, or invalid.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        match Self::load_checked(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                tracing::warn!(error = %err, "invalid config file, resetting to defaults");
                Self::default()
            }
        }
    }

    /// Load from `path`, surfacing parse/validation failures.
    ///
    /// # Errors
    /// Returns [`ConfigError`] on I/O errors other than not-found, on
    /// invalid TOML, or on a value that fails [`Self::validate`].
    pub fn load_checked(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                })
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse from a TOML string and validate the result.
    ///
    /// # Errors
    /// Returns [`ConfigError`] on invalid TOML, unknown fields, or a value
    /// that fails [`Self::validate`].
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(toml_str).map_err(|e| {
            let message = e.message().to_owned();
            let message = e.span().map_or_else(
                || message.clone(),
                |span| {
                    let line = toml_str[..span.start].chars().filter(|&c| c == '\n').count() + 1;
                    format!("line {line}: {message}")
                },
            );
            ConfigError { path: None, message }
        })?;
        cfg.validate().map_err(|message| ConfigError { path: None, message })?;
        Ok(cfg)
    }

    /// Validate budget invariants: warning thresholds lie within `[0, 1]`.
    ///
    /// # Errors
    /// Returns a message describing the first invalid field found.
    pub fn validate(&self) -> Result<(), String> {
        for &t in &self.budget.warning_thresholds {
            if !(0.0..=1.0).contains(&t) {
                return Err(format!("budget.warning_thresholds entry {t} is outside [0, 1]"));
            }
        }
        Ok(())
    }

    /// The repo-local config path, `.concord/config.toml` under `repo_root`.
    #[must_use]
    pub fn repo_local_path(repo_root: &Path) -> PathBuf {
        repo_root.join(".concord").join("config.toml")
    }

    /// The user-profile override path, under `dirs::config_dir()`.
    #[must_use]
    pub fn user_profile_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("concord").join("config.toml"))
    }

    /// Load the repo-local config, then apply the user-profile file (if
    /// present) as an override. Since both are strict structs
    /// (`deny_unknown_fields`), "override" here means the user-profile file
    /// wins outright when present, rather than a per-field merge.
    #[must_use]
    pub fn load_layered(repo_root: &Path) -> Self {
        let repo_cfg = Self::load(&Self::repo_local_path(repo_root));
        match Self::user_profile_path() {
            Some(path) if path.is_file() => Self::load(&path),
            _ => repo_cfg,
        }
    }
}

// ---------------------------------------------------------------------------
// Dot-path JSON API with a debounced writer
// ---------------------------------------------------------------------------

/// A live, mutable configuration document backed by a TOML file, exposing a
/// dot-path `get`/`set` API over JSON values and writing changes back to
/// disk on a debounced background thread (§4.9).
pub struct ConfigStore {
    path: PathBuf,
    document: Arc<Mutex<toml::Value>>,
    write_tx: mpsc::Sender<()>,
    writer: Option<JoinHandle<()>>,
}

impl ConfigStore {
    /// Open (or initialize empty) the document at `path` and start its
    /// debounced writer thread.
    #[must_use]
    pub fn open(path: PathBuf) -> Self {
        let initial = std::fs::read_to_string(&path)
            .ok()
            .and_then(|s| toml::from_str(&s).ok())
            .unwrap_or(toml::Value::Table(toml::value::Table::new()));

        let document = Arc::new(Mutex::new(initial));
        let (write_tx, write_rx) = mpsc::channel::<()>();

        let writer = {
            let document = Arc::clone(&document);
            let path = path.clone();
            thread::Builder::new()
                .name("concord-config-writer".to_owned())
                .spawn(move || Self::writer_loop(&write_rx, &document, &path))
                .ok()
        };

        Self {
            path,
            document,
            write_tx,
            writer,
        }
    }

    /// Drain `write_rx` for signals, coalescing any that arrive within the
    /// debounce window into a single write, until the sender side is
    /// dropped (i.e. the [`ConfigStore`] itself is dropped).
    fn writer_loop(write_rx: &mpsc::Receiver<()>, document: &Mutex<toml::Value>, path: &Path) {
        loop {
            let Ok(()) = write_rx.recv() else {
                return;
            };
            while write_rx.recv_timeout(WRITE_DEBOUNCE).is_ok() {}
            if let Ok(document) = document.lock() {
                Self::write_document(path, &document);
            }
        }
    }

    /// Fetch the value at `dot.path`, if present.
    #[must_use]
    pub fn get(&self, dot_path: &str) -> Option<serde_json::Value> {
        let document = self.document.lock().ok()?;
        navigate(&document, dot_path).map(toml_to_json)
    }

    /// Set the value at `dot.path`, auto-creating intermediate tables, and
    /// schedule a debounced write on the background thread.
    pub fn set(&self, dot_path: &str, value: serde_json::Value) {
        let Ok(mut document) = self.document.lock() else {
            return;
        };
        set_path(&mut document, dot_path, json_to_toml(value));
        drop(document);
        drop(self.write_tx.send(()));
    }

    /// Force the current document to disk synchronously, bypassing the
    /// debounce window. For tests and graceful shutdown.
    pub fn flush_sync(&self) {
        let Ok(document) = self.document.lock() else {
            return;
        };
        Self::write_document(&self.path, &document);
    }

    fn write_document(path: &Path, document: &toml::Value) {
        let Ok(rendered) = toml::to_string_pretty(document) else {
            tracing::warn!("failed to render config document to TOML, not writing");
            return;
        };
        if let Some(parent) = path.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                tracing::warn!(error = %err, path = %parent.display(), "failed to create config directory");
                return;
            }
        }
        if let Err(err) = std::fs::write(path, rendered) {
            tracing::warn!(error = %err, path = %path.display(), "failed to write config file");
        }
    }
}

impl Drop for ConfigStore {
    fn drop(&mut self) {
        self.flush_sync();
        if let Some(handle) = self.writer.take() {
            drop(handle.join());
        }
    }
}

fn navigate<'a>(document: &'a toml::Value, dot_path: &str) -> Option<&'a toml::Value> {
    let mut current = document;
    for segment in dot_path.split('.').filter(|s| !s.is_empty()) {
        current = current.as_table()?.get(segment)?;
    }
    Some(current)
}

fn set_path(document: &mut toml::Value, dot_path: &str, value: toml::Value) {
    let segments: Vec<&str> = dot_path.split('.').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };

    let mut current = document;
    for segment in parents {
        if !matches!(current, toml::Value::Table(_)) {
            *current = toml::Value::Table(toml::value::Table::new());
        }
        let table = current.as_table_mut().expect("just ensured Table above");
        current = table.entry((*segment).to_owned()).or_insert_with(|| toml::Value::Table(toml::value::Table::new()));
    }

    if !matches!(current, toml::Value::Table(_)) {
        *current = toml::Value::Table(toml::value::Table::new());
    }
    let table = current.as_table_mut().expect("just ensured Table above");
    table.insert((*last).to_owned(), value);
}

fn toml_to_json(value: &toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s.clone()),
        toml::Value::Integer(i) => serde_json::Value::from(*i),
        toml::Value::Float(f) => serde_json::Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number),
        toml::Value::Boolean(b) => serde_json::Value::Bool(*b),
        toml::Value::Datetime(d) => serde_json::Value::String(d.to_string()),
        toml::Value::Array(arr) => serde_json::Value::Array(arr.iter().map(toml_to_json).collect()),
        toml::Value::Table(tbl) => serde_json::Value::Object(tbl.iter().map(|(k, v)| (k.clone(), toml_to_json(v))).collect()),
    }
}

fn json_to_toml(value: serde_json::Value) -> toml::Value {
    match value {
        serde_json::Value::Null => toml::Value::String(String::new()),
        serde_json::Value::Bool(b) => toml::Value::Boolean(b),
        serde_json::Value::Number(n) => n.as_i64().map_or_else(
            || toml::Value::Float(n.as_f64().unwrap_or_default()),
            toml::Value::Integer,
        ),
        serde_json::Value::String(s) => toml::Value::String(s),
        serde_json::Value::Array(arr) => toml::Value::Array(arr.into_iter().map(json_to_toml).collect()),
        serde_json::Value::Object(obj) => {
            let mut table = toml::value::Table::new();
            for (k, v) in obj {
                table.insert(k, json_to_toml(v));
            }
            toml::Value::Table(table)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_all_fields() {
        let cfg = ConcordConfig::default();
        assert_eq!(cfg.budget.monthly_limit_cents, 0);
        assert_eq!(cfg.budget.per_session_default_cents, 500);
        assert_eq!(cfg.budget.warning_thresholds, vec![0.5, 0.8]);
        assert_eq!(cfg.budget.sandbox_hourly_rate_cents, 50);
    }

    #[test]
    fn parse_empty_string_uses_defaults() {
        let cfg = ConcordConfig::parse("").unwrap();
        assert_eq!(cfg, ConcordConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let toml = r"
[budget]
monthly_limit_cents = 50000
per_session_default_cents = 1000
warning_thresholds = [0.6, 0.9]
sandbox_hourly_rate_cents = 75
";
        let cfg = ConcordConfig::parse(toml).unwrap();
        assert_eq!(cfg.budget.monthly_limit_cents, 50_000);
        assert_eq!(cfg.budget.warning_thresholds, vec![0.6, 0.9]);
    }

    #[test]
    fn parse_rejects_unknown_field() {
        let err = ConcordConfig::parse("unknown_field = true").unwrap_err();
        assert!(err.message.contains("unknown field"));
    }

    #[test]
    fn parse_rejects_out_of_range_threshold() {
        let toml = "[budget]\nwarning_thresholds = [1.5]\n";
        let err = ConcordConfig::parse(toml).unwrap_err();
        assert!(err.message.contains("outside"));
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let cfg = ConcordConfig::load(Path::new("/nonexistent/concord/config.toml"));
        assert_eq!(cfg, ConcordConfig::default());
    }

    #[test]
    fn load_invalid_file_resets_to_defaults_without_erroring() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "not valid [[[toml").unwrap();
        let cfg = ConcordConfig::load(&path);
        assert_eq!(cfg, ConcordConfig::default());
    }

    #[test]
    fn repo_local_path_is_dotconcord_config_toml() {
        let path = ConcordConfig::repo_local_path(Path::new("/repo"));
        assert_eq!(path, PathBuf::from("/repo/.concord/config.toml"));
    }

    #[test]
    fn config_store_get_set_roundtrips_and_creates_intermediates() {
        let dir = tempfile::tempdir().unwrap();
        let store = ConfigStore::open(dir.path().join("config.toml"));
        store.set("budget.monthly_limit_cents", serde_json::json!(12345));
        assert_eq!(store.get("budget.monthly_limit_cents"), Some(serde_json::json!(12345)));
        assert!(store.get("budget.nonexistent").is_none());
    }

    #[test]
    fn config_store_flush_sync_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let store = ConfigStore::open(path.clone());
        store.set("budget.monthly_limit_cents", serde_json::json!(500));
        store.flush_sync();
        assert!(path.is_file());
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("monthly_limit_cents"));
    }
}
