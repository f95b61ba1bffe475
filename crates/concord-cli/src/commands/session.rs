//! `concord register|heartbeat|release|status|cleanup`.

use std::path::Path;

use concord::coordinator::Coordinator;
use concord::error::Result;

use super::Context;

fn coordinator<'a>(ctx: &'a Context) -> Coordinator<'a> {
    Coordinator::new(&ctx.store, &ctx.git, &ctx.liveness)
}

pub fn register(ctx: &Context) -> Result<()> {
    let result = coordinator(ctx).register(&ctx.repo_path, ctx.pid)?;
    println!("session_id={}", result.session_id);
    println!("worktree_path={}", result.worktree_path.display());
    if let Some(name) = &result.worktree_name {
        println!("worktree_name={name}");
    }
    println!("is_main_repo={}", result.is_main_repo);
    println!("parallel_sessions={}", result.parallel_sessions);
    if let Some(reason) = &result.degraded_reason {
        println!("degraded_reason={reason}");
    }
    println!("\nexport CONCORD_SESSION_ID={}", result.session_id);
    Ok(())
}

pub fn heartbeat(ctx: &Context) -> Result<()> {
    let found = coordinator(ctx).heartbeat(&ctx.repo_path, ctx.pid)?;
    println!("found={found}");
    Ok(())
}

pub fn release(ctx: &Context) -> Result<()> {
    let result = coordinator(ctx).release(&ctx.repo_path, ctx.pid)?;
    println!("released={}", result.released);
    println!("worktree_removed={}", result.worktree_removed);
    Ok(())
}

pub fn status(ctx: &Context, repo_filter: Option<&Path>, watch: bool) -> Result<()> {
    if watch {
        #[cfg(feature = "tui")]
        {
            return concord_tui::run_dashboard(&ctx.store, &ctx.liveness, repo_filter);
        }
        #[cfg(not(feature = "tui"))]
        {
            println!("--watch requires the `tui` feature; falling back to a single snapshot");
        }
    }

    let result = coordinator(ctx).status(repo_filter)?;
    if let Some(repo) = &result.repo_path {
        println!("repo={}", repo.display());
    }
    for s in &result.sessions {
        println!(
            "{} pid={} status={:?} alive={} age_min={} worktree={:?}",
            s.session.id, s.session.pid, s.session.status, s.is_alive, s.duration_minutes, s.session.worktree_path
        );
    }
    Ok(())
}

pub fn cleanup(ctx: &Context) -> Result<()> {
    let result = coordinator(ctx).cleanup()?;
    println!("sessions_removed={}", result.sessions);
    println!("worktrees_removed={}", result.worktrees_removed);
    Ok(())
}
