//! Timeout and budget threshold enforcement for running sandboxes (§4.8).

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use super::{SandboxHandle, SandboxProvider};
use crate::error::{CoordError, Result};
use crate::model::ids::SandboxId;

/// A soft warning that a sandbox is approaching its hard timeout.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutWarning {
    /// The threshold, in minutes, that was just crossed.
    pub threshold_minutes: u64,
    /// Minutes actually elapsed.
    pub elapsed_minutes: u64,
    /// Estimated cost accrued so far, in integer cents.
    pub estimated_cost_cents: u64,
}

/// A soft warning that a sandbox is approaching its budget limit.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetWarning {
    /// The fraction of the limit (e.g. `0.5`) that was just crossed.
    pub fraction_threshold: f64,
    /// Cost accrued so far, in integer cents.
    pub cost_cents: u64,
    /// The configured limit, in integer cents.
    pub limit_cents: u64,
}

fn elapsed_minutes(handle: &SandboxHandle, now: DateTime<Utc>) -> u64 {
    (now - handle.created_at).num_minutes().max(0) as u64
}

/// Compare elapsed time to `handle`'s configured thresholds. Each soft
/// threshold fires at most once per sandbox, tracked in `fired`. Crossing
/// the hard cap kills the sandbox via `provider` and returns `Ok(None)`
/// (the caller should treat the sandbox as gone; a prior soft warning, if
/// any, already informed the caller it was approaching this).
///
/// # Errors
/// Returns an error if `provider.kill` fails.
pub fn enforce_timeout(
    provider: &dyn SandboxProvider,
    fired: &Mutex<HashSet<(SandboxId, u64)>>,
    handle: &SandboxHandle,
    now: DateTime<Utc>,
) -> Result<Option<TimeoutWarning>> {
    let elapsed = elapsed_minutes(handle, now);

    if elapsed >= handle.hard_timeout_minutes {
        provider.kill(handle.id)?;
        if let Ok(mut fired) = fired.lock() {
            fired.retain(|(id, _)| *id != handle.id);
        }
        return Err(CoordError::Timeout {
            elapsed_minutes: elapsed,
        });
    }

    let next_threshold = handle
        .warning_thresholds_minutes
        .iter()
        .copied()
        .filter(|&t| elapsed >= t)
        .filter(|&t| fired.lock().is_ok_and(|fired| !fired.contains(&(handle.id, t))))
        .max();

    let Some(threshold) = next_threshold else {
        return Ok(None);
    };

    if let Ok(mut fired) = fired.lock() {
        fired.insert((handle.id, threshold));
    }

    let elapsed_hours = f64::from(u32::try_from(elapsed).unwrap_or(u32::MAX)) / 60.0;
    let estimated_cost_cents = (handle.hourly_rate_cents as f64 * elapsed_hours).round() as u64;

    Ok(Some(TimeoutWarning {
        threshold_minutes: threshold,
        elapsed_minutes: elapsed,
        estimated_cost_cents,
    }))
}

/// Compare `provider`'s reported cost to `handle`'s budget limit, using the
/// same fire-once tracking as [`enforce_timeout`]. Terminates the sandbox
/// and returns an error if cost has reached the limit.
///
/// # Errors
/// Returns [`CoordError::BudgetExceeded`] if the limit was reached (the
/// sandbox has already been killed), or an error from `provider`.
pub fn check_budget_limit(
    provider: &dyn SandboxProvider,
    fired: &Mutex<HashSet<(SandboxId, u64)>>,
    handle: &SandboxHandle,
) -> Result<Option<BudgetWarning>> {
    let Some(limit_cents) = handle.budget_limit_cents else {
        return Ok(None);
    };
    let cost_cents = provider.current_cost_cents(handle.id)?;

    if cost_cents >= limit_cents {
        provider.kill(handle.id)?;
        return Err(CoordError::BudgetExceeded {
            cost_cents,
            limit_cents,
        });
    }

    let fraction = cost_cents as f64 / limit_cents as f64;
    let next_threshold = super::DEFAULT_BUDGET_WARNING_FRACTIONS
        .iter()
        .copied()
        .filter(|&t| fraction >= t)
        .filter(|&t| {
            let key = (handle.id, (t * 1000.0).round() as u64);
            fired.lock().is_ok_and(|fired| !fired.contains(&key))
        })
        .fold(None::<f64>, |acc, t| Some(acc.map_or(t, |a: f64| a.max(t))));

    let Some(threshold) = next_threshold else {
        return Ok(None);
    };

    if let Ok(mut fired) = fired.lock() {
        fired.insert((handle.id, (threshold * 1000.0).round() as u64));
    }

    Ok(Some(BudgetWarning {
        fraction_threshold: threshold,
        cost_cents,
        limit_cents,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Mutex as StdMutex;

    struct StubProvider {
        cost_cents: u64,
    }

    impl SandboxProvider for StubProvider {
        fn create(&self, _api_key: &str) -> Result<SandboxHandle> {
            unreachable!("not exercised in these tests")
        }

        fn current_cost_cents(&self, _id: SandboxId) -> Result<u64> {
            Ok(self.cost_cents)
        }

        fn kill(&self, _id: SandboxId) -> Result<()> {
            Ok(())
        }
    }

    fn handle(created_minutes_ago: i64) -> SandboxHandle {
        SandboxHandle {
            id: SandboxId::new(),
            created_at: Utc::now() - Duration::minutes(created_minutes_ago),
            hard_timeout_minutes: 60,
            warning_thresholds_minutes: vec![30, 50],
            budget_limit_cents: Some(1000),
            hourly_rate_cents: 200,
        }
    }

    #[test]
    fn fresh_sandbox_has_no_warning() {
        let provider = StubProvider { cost_cents: 0 };
        let fired = StdMutex::new(HashSet::new());
        let result = enforce_timeout(&provider, &fired, &handle(5), Utc::now()).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn crossing_first_threshold_warns_once() {
        let provider = StubProvider { cost_cents: 0 };
        let fired = StdMutex::new(HashSet::new());
        let h = handle(31);
        let first = enforce_timeout(&provider, &fired, &h, Utc::now()).unwrap();
        assert_eq!(first.unwrap().threshold_minutes, 30);
        let second = enforce_timeout(&provider, &fired, &h, Utc::now()).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn hard_cap_kills_and_errors() {
        let provider = StubProvider { cost_cents: 0 };
        let fired = StdMutex::new(HashSet::new());
        let result = enforce_timeout(&provider, &fired, &handle(61), Utc::now());
        assert!(matches!(result, Err(CoordError::Timeout { elapsed_minutes: 61 })));
    }

    #[test]
    fn budget_over_limit_terminates_with_error() {
        let provider = StubProvider { cost_cents: 1500 };
        let fired = StdMutex::new(HashSet::new());
        let result = check_budget_limit(&provider, &fired, &handle(5));
        assert!(matches!(result, Err(CoordError::BudgetExceeded { cost_cents: 1500, limit_cents: 1000 })));
    }

    #[test]
    fn budget_at_fifty_percent_warns_once() {
        let provider = StubProvider { cost_cents: 500 };
        let fired = StdMutex::new(HashSet::new());
        let h = handle(5);
        let first = check_budget_limit(&provider, &fired, &h).unwrap();
        assert_eq!(first.unwrap().fraction_threshold, 0.5);
        let second = check_budget_limit(&provider, &fired, &h).unwrap();
        assert!(second.is_none());
    }
}
