//! Budget period upsert/get operations (§4.1, §4.9).

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row, Transaction};

use super::format_datetime;
use crate::error::{CoordError, Result};
use crate::model::budget::{BudgetPeriod, BudgetPeriodKind};
use crate::model::ids::BudgetPeriodId;

fn from_row(row: &Row<'_>) -> rusqlite::Result<BudgetPeriod> {
    let id: String = row.get("id")?;
    let period: String = row.get("period")?;
    let period_start: String = row.get("period_start")?;
    Ok(BudgetPeriod {
        id: id.parse().unwrap_or_else(|_| BudgetPeriodId::new()),
        period: BudgetPeriodKind::parse(&period).unwrap_or(BudgetPeriodKind::Daily),
        period_start: NaiveDate::parse_from_str(&period_start, "%Y-%m-%d").unwrap_or_default(),
        budget_limit_cents: row.get::<_, i64>("budget_limit_cents")? as u64,
        spent_cents: row.get::<_, i64>("spent_cents")? as u64,
        created_at: super::parse_datetime(&row.get::<_, String>("created_at")?).unwrap_or_default(),
    })
}

/// Fetch the budget period row for `(period, period_start)`, if it exists.
///
/// # Errors
/// Returns [`CoordError::Internal`] on a store failure.
pub fn get(tx: &Transaction<'_>, period: BudgetPeriodKind, period_start: NaiveDate) -> Result<Option<BudgetPeriod>> {
    tx.query_row(
        "SELECT * FROM budget_tracking WHERE period = ?1 AND period_start = ?2",
        params![period.as_str(), period_start.format("%Y-%m-%d").to_string()],
        from_row,
    )
    .optional()
    .map_err(CoordError::from)
}

/// Create the budget period row for `(period, period_start)` if absent,
/// with `limit_cents` as its configured limit.
///
/// # Errors
/// Returns [`CoordError::Internal`] on a store failure.
pub fn ensure(
    tx: &Transaction<'_>,
    period: BudgetPeriodKind,
    period_start: NaiveDate,
    limit_cents: u64,
    now: DateTime<Utc>,
) -> Result<BudgetPeriod> {
    tx.execute(
        "INSERT OR IGNORE INTO budget_tracking (id, period, period_start, budget_limit_cents, spent_cents, created_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        params![
            BudgetPeriodId::new().to_string(),
            period.as_str(),
            period_start.format("%Y-%m-%d").to_string(),
            limit_cents as i64,
            format_datetime(now),
        ],
    )?;
    get(tx, period, period_start)?.ok_or_else(|| CoordError::Internal("budget_tracking upsert failed to produce a row".to_owned()))
}

/// Add `amount_cents` to the period's spend, rejecting negative deltas at
/// the call site (the signature takes an unsigned amount).
///
/// # Errors
/// Returns [`CoordError::NotFound`] if the period row does not exist.
pub fn record_cost(tx: &Transaction<'_>, period: BudgetPeriodKind, period_start: NaiveDate, amount_cents: u64) -> Result<BudgetPeriod> {
    let affected = tx.execute(
        "UPDATE budget_tracking SET spent_cents = spent_cents + ?1 WHERE period = ?2 AND period_start = ?3",
        params![amount_cents as i64, period.as_str(), period_start.format("%Y-%m-%d").to_string()],
    )?;
    if affected == 0 {
        return Err(CoordError::NotFound {
            kind: "budget_period",
            id: format!("{}:{period_start}", period.as_str()),
        });
    }
    get(tx, period, period_start)?.ok_or_else(|| CoordError::Internal("budget_tracking row vanished after update".to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;

    #[test]
    fn ensure_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let today = Utc::now().date_naive();
        let first = store
            .transaction(|tx| ensure(tx, BudgetPeriodKind::Daily, today, 5_000, Utc::now()))
            .unwrap();
        let second = store
            .transaction(|tx| ensure(tx, BudgetPeriodKind::Daily, today, 9_999, Utc::now()))
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.budget_limit_cents, 5_000);
    }

    #[test]
    fn record_cost_accumulates() {
        let store = Store::open_in_memory().unwrap();
        let today = Utc::now().date_naive();
        store
            .transaction(|tx| ensure(tx, BudgetPeriodKind::Daily, today, 5_000, Utc::now()))
            .unwrap();
        store.transaction(|tx| record_cost(tx, BudgetPeriodKind::Daily, today, 1_000)).unwrap();
        let after = store
            .transaction(|tx| record_cost(tx, BudgetPeriodKind::Daily, today, 2_000))
            .unwrap();
        assert_eq!(after.spent_cents, 3_000);
    }

    #[test]
    fn record_cost_missing_period_is_not_found() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .transaction(|tx| record_cost(tx, BudgetPeriodKind::Monthly, Utc::now().date_naive(), 1))
            .unwrap_err();
        assert!(matches!(err, CoordError::NotFound { .. }));
    }
}
