//! `concord sandbox create|upload|download|status|destroy`.

use std::path::PathBuf;

use clap::Subcommand;

use concord::error::{CoordError, Result};
use concord::model::ids::SandboxId;
use concord::sandbox::download::download_changes;
use concord::sandbox::http_provider::HttpSandboxProvider;
use concord::sandbox::upload::upload_workspace;
use concord::sandbox::{scan_for_credentials, SandboxController, SandboxProvider};

use super::Context;

#[derive(Subcommand)]
pub enum SandboxCommand {
    /// Provision a new remote sandbox.
    Create {
        /// Sandbox provider base URL.
        #[arg(long)]
        provider_url: String,
        /// Per-sandbox budget limit, in integer cents.
        #[arg(long)]
        budget_limit_cents: Option<u64>,
        /// Estimated cost rate, in integer cents per hour.
        #[arg(long, default_value_t = 50)]
        hourly_rate_cents: u64,
        /// Explicit API key (otherwise read from `CONCORD_SANDBOX_API_KEY`).
        #[arg(long)]
        api_key: Option<String>,
    },
    /// Scan the workspace for credential-shaped content, then archive and
    /// upload it to a sandbox.
    Upload {
        /// Sandbox id.
        id: String,
        /// Provider base URL.
        #[arg(long)]
        provider_url: String,
        /// Remote path to upload into.
        #[arg(long)]
        remote_path: String,
        /// Workspace directory to archive. Defaults to the repo root.
        #[arg(long)]
        workspace: Option<PathBuf>,
        /// Skip the pre-upload credential scan.
        #[arg(long)]
        skip_scan: bool,
    },
    /// Fetch the sandbox's changed files back into a local directory.
    Download {
        /// Sandbox id.
        id: String,
        /// Provider base URL.
        #[arg(long)]
        provider_url: String,
        /// Remote path holding the workspace.
        #[arg(long)]
        remote_path: String,
        /// Local directory to extract changed files into. Defaults to the
        /// repo root.
        #[arg(long)]
        local_path: Option<PathBuf>,
    },
    /// Check a sandbox's elapsed time and accrued cost against its
    /// configured thresholds.
    Status {
        /// Sandbox id.
        id: String,
        /// Provider base URL.
        #[arg(long)]
        provider_url: String,
    },
    /// Terminate a sandbox.
    Destroy {
        /// Sandbox id.
        id: String,
        /// Provider base URL.
        #[arg(long)]
        provider_url: String,
    },
}

fn parse_sandbox_id(raw: &str) -> Result<SandboxId> {
    raw.parse().map_err(|_| CoordError::Validation {
        field: "id".to_owned(),
        reason: "not a valid sandbox id".to_owned(),
    })
}

pub fn run(ctx: &Context, cmd: SandboxCommand) -> Result<()> {
    match cmd {
        SandboxCommand::Create {
            provider_url,
            budget_limit_cents,
            hourly_rate_cents,
            api_key,
        } => {
            let provider = HttpSandboxProvider::new(provider_url, budget_limit_cents, hourly_rate_cents)?;
            let controller = SandboxController::new(&provider);
            let handle = controller.create_sandbox(api_key.as_deref())?;
            println!("sandbox_id={}", handle.id);
            println!("created_at={}", handle.created_at);
            println!("hard_timeout_minutes={}", handle.hard_timeout_minutes);
        }
        SandboxCommand::Upload {
            id,
            provider_url,
            remote_path,
            workspace,
            skip_scan,
        } => {
            let workspace = workspace.unwrap_or_else(|| ctx.repo_path.clone());
            if !skip_scan {
                let report = scan_for_credentials(&workspace)?;
                if report.has_findings() {
                    if let Some(msg) = report.recommendation() {
                        println!("warning: {msg}");
                    }
                }
            }
            let provider = HttpSandboxProvider::new(provider_url, None, 0)?;
            let outcome = upload_workspace(&provider, parse_sandbox_id(&id)?, &workspace, &remote_path)?;
            println!("archive_bytes={}", outcome.archive_bytes);
            println!("chunked={}", outcome.chunked);
        }
        SandboxCommand::Download {
            id,
            provider_url,
            remote_path,
            local_path,
        } => {
            let local_path = local_path.unwrap_or_else(|| ctx.repo_path.clone());
            let provider = HttpSandboxProvider::new(provider_url, None, 0)?;
            let changed = download_changes(&provider, parse_sandbox_id(&id)?, &remote_path, &local_path)?;
            println!("files_downloaded={}", changed.len());
            for file in &changed {
                println!("{} {}", file.status, file.path);
            }
        }
        SandboxCommand::Status { id, provider_url } => {
            let provider = HttpSandboxProvider::new(provider_url, None, 0)?;
            let cost = provider.current_cost_cents(parse_sandbox_id(&id)?)?;
            println!("current_cost_cents={cost}");
        }
        SandboxCommand::Destroy { id, provider_url } => {
            let provider = HttpSandboxProvider::new(provider_url, None, 0)?;
            provider.kill(parse_sandbox_id(&id)?)?;
            println!("destroyed=true");
        }
    }
    Ok(())
}
