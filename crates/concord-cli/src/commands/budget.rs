//! `concord budget show|record`.

use chrono::Utc;
use clap::{Subcommand, ValueEnum};

use concord::budget::BudgetTracker;
use concord::config::ConcordConfig;
use concord::model::budget::BudgetPeriodKind;

use super::Context;

#[derive(Clone, Copy, ValueEnum)]
pub enum PeriodArg {
    Daily,
    Weekly,
    Monthly,
}

impl From<PeriodArg> for BudgetPeriodKind {
    fn from(value: PeriodArg) -> Self {
        match value {
            PeriodArg::Daily => Self::Daily,
            PeriodArg::Weekly => Self::Weekly,
            PeriodArg::Monthly => Self::Monthly,
        }
    }
}

#[derive(Subcommand)]
pub enum BudgetCommand {
    /// Show the current period's spend against its configured limit.
    Show {
        #[arg(long, value_enum, default_value_t = PeriodArg::Monthly)]
        period: PeriodArg,
    },
    /// Record spend against the current period, printing any warning
    /// threshold that was just crossed.
    Record {
        #[arg(long, value_enum, default_value_t = PeriodArg::Monthly)]
        period: PeriodArg,
        /// Amount to record, in integer cents.
        amount_cents: u64,
    },
}

pub fn run(ctx: &Context, cmd: BudgetCommand) -> concord::error::Result<()> {
    let config = ConcordConfig::load_layered(&ctx.repo_path);
    let tracker = BudgetTracker::new(&ctx.store, config.budget.warning_thresholds.clone());
    let now = Utc::now();

    match cmd {
        BudgetCommand::Show { period } => {
            let kind = BudgetPeriodKind::from(period);
            let limit_cents = default_limit_cents(&config, kind);
            let current = tracker.ensure_period(kind, limit_cents, now)?;
            println!("period={}", current.period.as_str());
            println!("period_start={}", current.period_start);
            println!("spent_cents={}", current.spent_cents);
            println!("budget_limit_cents={}", current.budget_limit_cents);
            if !current.is_disabled() {
                println!("fraction_spent={:.3}", current.fraction_spent());
            }
        }
        BudgetCommand::Record { period, amount_cents } => {
            let kind = BudgetPeriodKind::from(period);
            let limit_cents = default_limit_cents(&config, kind);
            tracker.ensure_period(kind, limit_cents, now)?;
            let crossing = tracker.record_cost(kind, amount_cents, now)?;
            println!("recorded_cents={amount_cents}");
            if let Some(crossing) = crossing {
                println!(
                    "threshold_crossed={} spent_cents={} limit_cents={}",
                    crossing.fraction, crossing.spent_cents, crossing.limit_cents
                );
            }
        }
    }
    Ok(())
}

fn default_limit_cents(config: &ConcordConfig, kind: BudgetPeriodKind) -> u64 {
    match kind {
        BudgetPeriodKind::Monthly => config.budget.monthly_limit_cents,
        BudgetPeriodKind::Daily | BudgetPeriodKind::Weekly => config.budget.per_session_default_cents,
    }
}
