//! An HTTP-backed [`SandboxProvider`], talking to a remote sandbox API over
//! `reqwest::blocking` (§4.8, §5: no async runtime in the core).

use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;

use crate::error::{CoordError, Result};
use crate::model::ids::SandboxId;

use super::{SandboxHandle, SandboxProvider, DEFAULT_TIMEOUT_WARNING_MINUTES, HARD_TIMEOUT_MINUTES};

const CREATE_TIMEOUT: Duration = Duration::from_secs(30);
const STATUS_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct CostResponse {
    cost_cents: u64,
}

#[derive(Debug, Deserialize)]
struct FinalizeResponse {
    total_bytes: u64,
    file_count: u64,
}

#[derive(Debug, Deserialize)]
struct ChangedFilesResponse {
    porcelain: String,
}

/// A [`SandboxProvider`] backed by a remote HTTP API at `base_url`.
///
/// Wire contract (intentionally minimal, matching whatever the provider
/// actually exposes is the integrator's job to adapt):
/// - `POST {base_url}/sandboxes` → `{"id": "..."}`
/// - `GET {base_url}/sandboxes/{id}/cost` → `{"cost_cents": N}`
/// - `DELETE {base_url}/sandboxes/{id}`
/// - `PUT {base_url}/sandboxes/{id}/files/{remote_path}/chunks/{chunk_name}` (raw body)
/// - `POST {base_url}/sandboxes/{id}/files/{remote_path}/finalize` `{"chunks": [...]}` → `{"total_bytes": N, "file_count": N}`
/// - `GET {base_url}/sandboxes/{id}/files/{remote_path}/status` → `{"porcelain": "..."}`
/// - `GET {base_url}/sandboxes/{id}/files/{remote_path}/archive?files=...` → raw tar.gz bytes
pub struct HttpSandboxProvider {
    base_url: String,
    client: reqwest::blocking::Client,
    budget_limit_cents: Option<u64>,
    hourly_rate_cents: u64,
}

impl HttpSandboxProvider {
    /// Build a provider pointed at `base_url`, with the given per-sandbox
    /// budget limit and estimated hourly cost rate (both typically sourced
    /// from [`crate::config::BudgetConfig`]).
    ///
    /// # Errors
    /// Returns [`CoordError::Internal`] if the underlying HTTP client
    /// cannot be constructed (TLS backend initialization failure).
    pub fn new(base_url: impl Into<String>, budget_limit_cents: Option<u64>, hourly_rate_cents: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(CREATE_TIMEOUT)
            .build()
            .map_err(|err| CoordError::Internal(err.to_string()))?;
        Ok(Self {
            base_url: base_url.into(),
            client,
            budget_limit_cents,
            hourly_rate_cents,
        })
    }

    fn map_transport_err(err: &reqwest::Error) -> CoordError {
        if err.is_timeout() {
            CoordError::Network {
                operation: "sandbox_http".to_owned(),
                detail: "request timed out".to_owned(),
            }
        } else {
            CoordError::Network {
                operation: "sandbox_http".to_owned(),
                detail: err.to_string(),
            }
        }
    }
}

impl SandboxProvider for HttpSandboxProvider {
    fn create(&self, api_key: &str) -> Result<SandboxHandle> {
        let response = self
            .client
            .post(format!("{}/sandboxes", self.base_url))
            .bearer_auth(api_key)
            .send()
            .map_err(|err| Self::map_transport_err(&err))?;

        match response.status() {
            reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN => {
                return Err(CoordError::Auth {
                    detail: "sandbox provider rejected the credential".to_owned(),
                })
            }
            reqwest::StatusCode::TOO_MANY_REQUESTS => {
                return Err(CoordError::Quota {
                    detail: "sandbox provider reports the account is over quota".to_owned(),
                })
            }
            status if !status.is_success() => {
                return Err(CoordError::Network {
                    operation: "sandbox_create".to_owned(),
                    detail: format!("unexpected status {status}"),
                })
            }
            _ => {}
        }

        let body: CreateResponse = response.json().map_err(|err| Self::map_transport_err(&err))?;
        let id: SandboxId = body.id.parse().map_err(|_| CoordError::Internal("sandbox provider returned a malformed id".to_owned()))?;

        Ok(SandboxHandle {
            id,
            created_at: Utc::now(),
            hard_timeout_minutes: HARD_TIMEOUT_MINUTES,
            warning_thresholds_minutes: DEFAULT_TIMEOUT_WARNING_MINUTES.to_vec(),
            budget_limit_cents: self.budget_limit_cents,
            hourly_rate_cents: self.hourly_rate_cents,
        })
    }

    fn current_cost_cents(&self, id: SandboxId) -> Result<u64> {
        let response = self
            .client
            .get(format!("{}/sandboxes/{id}/cost", self.base_url))
            .timeout(STATUS_TIMEOUT)
            .send()
            .map_err(|err| Self::map_transport_err(&err))?;
        if !response.status().is_success() {
            return Err(CoordError::Network {
                operation: "sandbox_cost".to_owned(),
                detail: format!("unexpected status {}", response.status()),
            });
        }
        let body: CostResponse = response.json().map_err(|err| Self::map_transport_err(&err))?;
        Ok(body.cost_cents)
    }

    fn kill(&self, id: SandboxId) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/sandboxes/{id}", self.base_url))
            .timeout(STATUS_TIMEOUT)
            .send()
            .map_err(|err| Self::map_transport_err(&err))?;
        if !response.status().is_success() && response.status() != reqwest::StatusCode::NOT_FOUND {
            return Err(CoordError::Network {
                operation: "sandbox_kill".to_owned(),
                detail: format!("unexpected status {}", response.status()),
            });
        }
        Ok(())
    }

    fn upload_chunk(&self, id: SandboxId, remote_path: &str, chunk_name: &str, data: &[u8], timeout: Duration) -> Result<()> {
        let response = self
            .client
            .put(format!("{}/sandboxes/{id}/files{remote_path}/chunks/{chunk_name}", self.base_url))
            .timeout(timeout)
            .body(data.to_vec())
            .send()
            .map_err(|err| Self::map_transport_err(&err))?;
        if !response.status().is_success() {
            return Err(CoordError::Network {
                operation: "upload_chunk".to_owned(),
                detail: format!("unexpected status {}", response.status()),
            });
        }
        Ok(())
    }

    fn finalize_upload(&self, id: SandboxId, remote_path: &str, chunk_names: &[String]) -> Result<(u64, u64)> {
        let response = self
            .client
            .post(format!("{}/sandboxes/{id}/files{remote_path}/finalize", self.base_url))
            .timeout(STATUS_TIMEOUT)
            .json(&serde_json::json!({ "chunks": chunk_names }))
            .send()
            .map_err(|err| Self::map_transport_err(&err))?;
        if !response.status().is_success() {
            return Err(CoordError::Network {
                operation: "finalize_upload".to_owned(),
                detail: format!("unexpected status {}", response.status()),
            });
        }
        let body: FinalizeResponse = response.json().map_err(|err| Self::map_transport_err(&err))?;
        Ok((body.total_bytes, body.file_count))
    }

    fn remote_changed_files(&self, id: SandboxId, remote_path: &str) -> Result<String> {
        let response = self
            .client
            .get(format!("{}/sandboxes/{id}/files{remote_path}/status", self.base_url))
            .timeout(STATUS_TIMEOUT)
            .send()
            .map_err(|err| Self::map_transport_err(&err))?;
        if !response.status().is_success() {
            return Err(CoordError::Network {
                operation: "remote_changed_files".to_owned(),
                detail: format!("unexpected status {}", response.status()),
            });
        }
        let body: ChangedFilesResponse = response.json().map_err(|err| Self::map_transport_err(&err))?;
        Ok(body.porcelain)
    }

    fn download_archive(&self, id: SandboxId, remote_path: &str, file_args: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(format!("{}/sandboxes/{id}/files{remote_path}/archive", self.base_url))
            .query(&[("files", file_args)])
            .timeout(super::upload::SINGLE_SHOT_UPLOAD_TIMEOUT)
            .send()
            .map_err(|err| Self::map_transport_err(&err))?;
        if !response.status().is_success() {
            return Err(CoordError::Network {
                operation: "download_archive".to_owned(),
                detail: format!("unexpected status {}", response.status()),
            });
        }
        Ok(response.bytes().map_err(|err| Self::map_transport_err(&err))?.to_vec())
    }
}
