//! `concord merge subscribe|detect`.

use chrono::Utc;
use clap::Subcommand;

use concord::error::Result;
use concord::merge_detector::{poll_repo, RecordingSink};
use concord::model::ids::SubscriptionId;
use concord::model::merge_event::Subscription;
use concord::store::subscriptions;

use super::Context;

#[derive(Subcommand)]
pub enum MergeCommand {
    /// Subscribe the current session to merges of `branch` into
    /// `target`.
    Subscribe {
        /// The branch to watch.
        branch: String,
        /// The branch it should merge into.
        target: String,
    },
    /// Run a single Merge Detector poll tick for this repository now,
    /// printing every notification it would have sent.
    Detect,
}

pub fn run(ctx: &Context, cmd: MergeCommand) -> Result<()> {
    match cmd {
        MergeCommand::Subscribe { branch, target } => {
            let session_id = ctx.session_id()?;
            let sub = Subscription {
                id: SubscriptionId::new(),
                session_id,
                repo_path: ctx.repo_path.clone(),
                branch_name: branch,
                target_branch: target,
                created_at: Utc::now(),
                notified_at: None,
                is_active: true,
            };
            ctx.store.transaction(|tx| subscriptions::insert(tx, &sub))?;
            println!("subscription_id={}", sub.id);
        }
        MergeCommand::Detect => {
            let sink = RecordingSink::default();
            let count = poll_repo(&ctx.store, &ctx.git, &ctx.repo_path, &sink)?;
            println!("new_merge_events={count}");
            for notification in sink.sent() {
                println!("notify session={} event={}", notification.session_id, notification.event.id);
            }
        }
    }
    Ok(())
}
