//! `concord` — command-line front end over the coordination library (§2.10,
//! §6 CLI surface).

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use concord::error::CoordError;

/// Parallel development-session coordinator for AI coding agents sharing a
/// git repository.
#[derive(Parser)]
#[command(name = "concord", version, about)]
struct Cli {
    /// Path to the repository. Defaults to discovering the current
    /// directory's git toplevel.
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    /// Path to the coordination store. Defaults to `<repo>/.concord/state.db`.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register this process as a coordination session.
    Register,
    /// Send a liveness heartbeat for the current session.
    Heartbeat,
    /// Release the current session and its worktree.
    Release,
    /// Show session status.
    Status {
        /// Limit to one repository.
        #[arg(long)]
        repo_filter: Option<PathBuf>,
        /// Keep refreshing the view (requires the `tui` feature).
        #[arg(long)]
        watch: bool,
    },
    /// Sweep stale sessions and worktrees.
    Cleanup,
    /// File claim operations.
    Claim {
        #[command(subcommand)]
        action: commands::claim::ClaimCommand,
    },
    /// Merge detection operations.
    Merge {
        #[command(subcommand)]
        action: commands::merge::MergeCommand,
    },
    /// Conflict engine operations.
    Conflict {
        #[command(subcommand)]
        action: commands::conflict::ConflictCommand,
    },
    /// Sandbox controller operations.
    Sandbox {
        #[command(subcommand)]
        action: commands::sandbox::SandboxCommand,
    },
    /// Budget tracking operations.
    Budget {
        #[command(subcommand)]
        action: commands::budget::BudgetCommand,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let ctx = match commands::Context::build(cli.repo, cli.store) {
        Ok(ctx) => ctx,
        Err(err) => return report(&err),
    };

    let result = match cli.command {
        Commands::Register => commands::session::register(&ctx),
        Commands::Heartbeat => commands::session::heartbeat(&ctx),
        Commands::Release => commands::session::release(&ctx),
        Commands::Status { repo_filter, watch } => commands::session::status(&ctx, repo_filter.as_deref(), watch),
        Commands::Cleanup => commands::session::cleanup(&ctx),
        Commands::Claim { action } => commands::claim::run(&ctx, action),
        Commands::Merge { action } => commands::merge::run(&ctx, action),
        Commands::Conflict { action } => commands::conflict::run(&ctx, action),
        Commands::Sandbox { action } => commands::sandbox::run(&ctx, action),
        Commands::Budget { action } => commands::budget::run(&ctx, action),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(&err),
    }
}

fn report(err: &CoordError) -> ExitCode {
    eprintln!("error: {err}");
    ExitCode::from(u8::try_from(err.exit_code()).unwrap_or(5))
}
