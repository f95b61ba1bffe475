//! `concord conflict detect|suggest|apply`.

use chrono::Utc;
use clap::Subcommand;

use concord::conflict::ast::HeuristicAst;
use concord::conflict::confidence::ConfidenceScorer;
use concord::conflict::strategies::default_chain;
use concord::conflict::{apply_suggestion, detect_conflicts, generate_suggestions, DetectConflictsRequest};
use concord::error::{CoordError, Result};
use concord::model::ids::SuggestionId;
use concord::store::suggestions;
use concord::worktree::RepoPort;

use super::Context;

#[derive(Subcommand)]
pub enum ConflictCommand {
    /// Simulate a merge and classify any conflicts found.
    Detect {
        /// The current session's branch.
        current: String,
        /// The branch to merge into.
        target: String,
        /// Skip AST-based structural/semantic classification.
        #[arg(long)]
        no_semantics: bool,
    },
    /// Detect conflicts, then generate and persist resolution suggestions.
    Suggest {
        current: String,
        target: String,
        /// Maximum suggestions to keep per conflicted file.
        #[arg(long, default_value_t = 3)]
        max: usize,
    },
    /// Apply a previously generated suggestion.
    Apply {
        /// Suggestion id.
        id: String,
        /// Mark the suggestion as auto-applied rather than human-applied.
        #[arg(long)]
        auto: bool,
    },
}

pub fn run(ctx: &Context, cmd: ConflictCommand) -> Result<()> {
    let ast = HeuristicAst;
    match cmd {
        ConflictCommand::Detect { current, target, no_semantics } => {
            let report = detect_conflicts(
                &ctx.git,
                &ast,
                &DetectConflictsRequest {
                    current_branch: current,
                    target_branch: target,
                    analyze_semantics: !no_semantics,
                },
            )?;
            println!("base_commit={:?}", report.base_commit);
            for conflict in &report.conflicts {
                println!("{} type={:?} severity={:?}", conflict.file_path.display(), conflict.conflict_type, conflict.severity);
            }
        }
        ConflictCommand::Suggest { current, target, max } => {
            let source_commit = ctx.git.rev_parse(&current)?;
            let target_commit = ctx.git.rev_parse(&target)?;
            let report = detect_conflicts(
                &ctx.git,
                &ast,
                &DetectConflictsRequest {
                    current_branch: current,
                    target_branch: target,
                    analyze_semantics: true,
                },
            )?;
            let chain = default_chain();
            let scorer = ConfidenceScorer::new();
            let suggestions = generate_suggestions(
                &ctx.store,
                &chain,
                &scorer,
                ctx.session_id().ok(),
                &ctx.repo_path,
                &report,
                &source_commit,
                &target_commit,
                max,
            )?;
            for s in &suggestions {
                println!("{} suggestion_id={} confidence={:.2}", s.file_path.display(), s.id, s.confidence_score);
            }
        }
        ConflictCommand::Apply { id, auto } => {
            let id: SuggestionId = id.parse().map_err(|_| CoordError::Validation {
                field: "id".to_owned(),
                reason: "not a valid suggestion id".to_owned(),
            })?;
            let mut suggestion = ctx.store.transaction(|tx| suggestions::get(tx, id))?;
            let outcome = apply_suggestion(&ctx.repo_path, &mut suggestion, auto)?;
            ctx.store.transaction(|tx| suggestions::mark_applied(tx, id, Utc::now(), auto))?;
            println!("verified={}", outcome.verified);
            println!("backup_path={}", outcome.backup_path.display());
        }
    }
    Ok(())
}
