//! Budget-period data model (§3, §4.9).

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::ids::BudgetPeriodId;

/// A budget accounting window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetPeriodKind {
    /// Resets at midnight UTC.
    Daily,
    /// Resets at the Monday of the current ISO week.
    Weekly,
    /// Resets on the first of the month.
    Monthly,
}

impl BudgetPeriodKind {
    /// Parse from the store's persisted column value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "daily" => Some(Self::Daily),
            "weekly" => Some(Self::Weekly),
            "monthly" => Some(Self::Monthly),
            _ => None,
        }
    }

    /// The store's persisted column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }

    /// The canonical `period_start` date for `now` under this period kind
    /// (§4.9): today, the Monday of this ISO week, or the first of this
    /// month.
    #[must_use]
    pub fn period_start(self, now: DateTime<Utc>) -> NaiveDate {
        let today = now.date_naive();
        match self {
            Self::Daily => today,
            Self::Weekly => {
                let iso = today.iso_week();
                NaiveDate::from_isoywd_opt(iso.year(), iso.week(), chrono::Weekday::Mon)
                    .unwrap_or(today)
            }
            Self::Monthly => today.with_day(1).unwrap_or(today),
        }
    }
}

/// A single (period, period_start) spend accumulator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BudgetPeriod {
    /// Unique identifier.
    pub id: BudgetPeriodId,
    /// Which accounting window this row tracks.
    pub period: BudgetPeriodKind,
    /// The canonical start date of this window.
    pub period_start: NaiveDate,
    /// The configured limit, in integer cents. Zero means disabled.
    pub budget_limit_cents: u64,
    /// Amount spent so far, in integer cents.
    pub spent_cents: u64,
    /// When this row was first created.
    pub created_at: DateTime<Utc>,
}

impl BudgetPeriod {
    /// Whether this period is disabled (no limit enforced).
    #[must_use]
    pub const fn is_disabled(&self) -> bool {
        self.budget_limit_cents == 0
    }

    /// Fraction of the limit spent, in `[0, +inf)`. Returns `0.0` when
    /// disabled.
    #[must_use]
    pub fn fraction_spent(&self) -> f64 {
        if self.is_disabled() {
            return 0.0;
        }
        self.spent_cents as f64 / self.budget_limit_cents as f64
    }

    /// Whether spending has reached or exceeded the limit. Always `false`
    /// when disabled.
    #[must_use]
    pub const fn is_exceeded(&self) -> bool {
        !self.is_disabled() && self.spent_cents >= self.budget_limit_cents
    }
}
