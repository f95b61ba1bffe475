//! Budget tracking business logic: period keying, cost recording, and
//! threshold-crossing notifications (§4.9).

use chrono::{DateTime, Utc};

use crate::error::{CoordError, Result};
use crate::model::budget::{BudgetPeriod, BudgetPeriodKind};
use crate::store::{budget, Store};

/// A threshold that was just crossed by a [`BudgetTracker::record_cost`]
/// call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdCrossing {
    /// The threshold fraction that was crossed (e.g. `0.8`).
    pub fraction: f64,
    /// Cost after recording, in integer cents.
    pub spent_cents: u64,
    /// The period's configured limit, in integer cents.
    pub limit_cents: u64,
}

/// Business-logic layer over [`crate::store::budget`]: keys periods by the
/// current time, enforces non-negative cost recording, and reports
/// threshold crossings at most once per period (§4.9).
pub struct BudgetTracker<'a> {
    store: &'a Store,
    warning_thresholds: Vec<f64>,
}

impl<'a> BudgetTracker<'a> {
    /// Construct a tracker with the given warning thresholds (fractions in
    /// `[0, 1]`, validated on use rather than construction since they come
    /// from config that may be reloaded).
    #[must_use]
    pub fn new(store: &'a Store, warning_thresholds: Vec<f64>) -> Self {
        Self {
            store,
            warning_thresholds,
        }
    }

    /// Ensure the current period for `kind` exists, creating it with
    /// `limit_cents` if absent.
    ///
    /// # Errors
    /// Returns a store error on failure.
    pub fn ensure_period(&self, kind: BudgetPeriodKind, limit_cents: u64, now: DateTime<Utc>) -> Result<BudgetPeriod> {
        let period_start = kind.period_start(now);
        self.store.transaction(|tx| budget::ensure(tx, kind, period_start, limit_cents, now))
    }

    /// Record `amount_cents` of spend against the current period for
    /// `kind`, returning the largest newly-crossed threshold, if any.
    ///
    /// # Errors
    /// Returns [`CoordError::Validation`] if `amount_cents` would be
    /// negative (it cannot be, being unsigned, but a caller computing a
    /// delta from floats should check before calling); returns
    /// [`CoordError::NotFound`] if the period has not been created via
    /// [`Self::ensure_period`].
    pub fn record_cost(&self, kind: BudgetPeriodKind, amount_cents: u64, now: DateTime<Utc>) -> Result<Option<ThresholdCrossing>> {
        let period_start = kind.period_start(now);
        self.store.transaction(|tx| {
            let before = budget::get(tx, kind, period_start)?.ok_or(CoordError::NotFound {
                kind: "budget_period",
                id: format!("{}/{period_start}", kind.as_str()),
            })?;
            if before.is_disabled() {
                budget::record_cost(tx, kind, period_start, amount_cents)?;
                return Ok(None);
            }

            let after = budget::record_cost(tx, kind, period_start, amount_cents)?;
            let fraction_before = before.fraction_spent();
            let fraction_after = after.fraction_spent();

            let crossing = self
                .warning_thresholds
                .iter()
                .copied()
                .filter(|&t| (0.0..=1.0).contains(&t))
                .filter(|&t| fraction_before < t && fraction_after >= t)
                .fold(None::<f64>, |acc, t| Some(acc.map_or(t, |a| a.max(t))));

            Ok(crossing.map(|fraction| ThresholdCrossing {
                fraction,
                spent_cents: after.spent_cents,
                limit_cents: after.budget_limit_cents,
            }))
        })
    }

    /// Fetch the current period's summary for `kind`, if it exists.
    ///
    /// # Errors
    /// Returns a store error on failure.
    pub fn current_period(&self, kind: BudgetPeriodKind, now: DateTime<Utc>) -> Result<Option<BudgetPeriod>> {
        let period_start = kind.period_start(now);
        self.store.transaction(|tx| budget::get(tx, kind, period_start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_period_creates_then_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let tracker = BudgetTracker::new(&store, vec![0.5, 0.8]);
        let now = Utc::now();
        let first = tracker.ensure_period(BudgetPeriodKind::Monthly, 10_000, now).unwrap();
        let second = tracker.ensure_period(BudgetPeriodKind::Monthly, 99_999, now).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.budget_limit_cents, 10_000);
    }

    #[test]
    fn record_cost_accumulates() {
        let store = Store::open_in_memory().unwrap();
        let tracker = BudgetTracker::new(&store, vec![0.5, 0.8]);
        let now = Utc::now();
        tracker.ensure_period(BudgetPeriodKind::Daily, 10_000, now).unwrap();
        tracker.record_cost(BudgetPeriodKind::Daily, 3_000, now).unwrap();
        let period = tracker.current_period(BudgetPeriodKind::Daily, now).unwrap().unwrap();
        assert_eq!(period.spent_cents, 3_000);
    }

    #[test]
    fn threshold_fires_once_per_period() {
        let store = Store::open_in_memory().unwrap();
        let tracker = BudgetTracker::new(&store, vec![0.5]);
        let now = Utc::now();
        tracker.ensure_period(BudgetPeriodKind::Daily, 10_000, now).unwrap();

        let first = tracker.record_cost(BudgetPeriodKind::Daily, 5_000, now).unwrap();
        assert_eq!(first.unwrap().fraction, 0.5);

        let second = tracker.record_cost(BudgetPeriodKind::Daily, 100, now).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn disabled_period_never_crosses_thresholds() {
        let store = Store::open_in_memory().unwrap();
        let tracker = BudgetTracker::new(&store, vec![0.5, 0.8]);
        let now = Utc::now();
        tracker.ensure_period(BudgetPeriodKind::Weekly, 0, now).unwrap();
        let crossing = tracker.record_cost(BudgetPeriodKind::Weekly, 1_000_000, now).unwrap();
        assert!(crossing.is_none());
    }

    #[test]
    fn recording_without_ensuring_period_errors() {
        let store = Store::open_in_memory().unwrap();
        let tracker = BudgetTracker::new(&store, vec![0.5]);
        let result = tracker.record_cost(BudgetPeriodKind::Monthly, 100, Utc::now());
        assert!(matches!(result, Err(CoordError::NotFound { .. })));
    }
}
