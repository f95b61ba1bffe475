//! `concord claim acquire|release|escalate|list`.

use std::path::PathBuf;

use clap::Subcommand;

use concord::claims::{AcquireClaimRequest, ClaimsManager};
use concord::error::{CoordError, Result};
use concord::model::claim::ClaimMode;
use concord::model::ids::ClaimId;

use super::Context;

#[derive(Subcommand)]
pub enum ClaimCommand {
    /// Acquire a file claim for the current session.
    Acquire {
        /// Repo-relative file path.
        file: PathBuf,
        /// Compatibility mode: intent, shared, or exclusive.
        #[arg(long, default_value = "exclusive")]
        mode: String,
        /// Claim lifetime, in hours.
        #[arg(long)]
        ttl_hours: Option<i64>,
    },
    /// Release a claim by id.
    Release {
        /// Claim id.
        id: String,
        /// Release even if owned by a different session.
        #[arg(long)]
        force: bool,
    },
    /// Escalate a claim to a stronger mode.
    Escalate {
        /// Claim id.
        id: String,
        /// New mode: shared or exclusive.
        mode: String,
    },
    /// List active claims for the current session.
    List,
}

fn parse_mode(raw: &str) -> Result<ClaimMode> {
    match raw.to_ascii_uppercase().as_str() {
        "INTENT" => Ok(ClaimMode::Intent),
        "SHARED" => Ok(ClaimMode::Shared),
        "EXCLUSIVE" => Ok(ClaimMode::Exclusive),
        _ => Err(CoordError::Validation {
            field: "mode".to_owned(),
            reason: format!("`{raw}` is not one of intent, shared, exclusive"),
        }),
    }
}

fn parse_claim_id(raw: &str) -> Result<ClaimId> {
    raw.parse().map_err(|_| CoordError::Validation {
        field: "id".to_owned(),
        reason: "not a valid claim id".to_owned(),
    })
}

pub fn run(ctx: &Context, cmd: ClaimCommand) -> Result<()> {
    let manager = ClaimsManager::new(&ctx.store);
    match cmd {
        ClaimCommand::Acquire { file, mode, ttl_hours } => {
            let claim = manager.acquire_claim(AcquireClaimRequest {
                session_id: ctx.session_id()?,
                repo_path: ctx.repo_path.clone(),
                file_path: file,
                mode: parse_mode(&mode)?,
                metadata: None,
                ttl_hours,
            })?;
            println!("claim_id={}", claim.id);
            println!("mode={}", claim.claim_mode.as_str());
            println!("expires_at={}", claim.expires_at);
        }
        ClaimCommand::Release { id, force } => {
            let released = manager.release_claim(parse_claim_id(&id)?, ctx.session_id()?, force)?;
            println!("released={released}");
        }
        ClaimCommand::Escalate { id, mode } => {
            let claim = manager.escalate_claim(parse_claim_id(&id)?, parse_mode(&mode)?)?;
            println!("mode={}", claim.claim_mode.as_str());
        }
        ClaimCommand::List => {
            for claim in manager.list_for_session(ctx.session_id()?)? {
                println!("{} {} {}", claim.id, claim.claim_mode.as_str(), claim.file_path.display());
            }
        }
    }
    Ok(())
}
