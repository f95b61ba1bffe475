//! Liveness Oracle: decides whether a session's owning process is alive,
//! and whether a session is stale enough to sweep (§4.2).

use chrono::{DateTime, Duration, Utc};

/// Decides process liveness and staleness for the cleanup sweep.
///
/// A session is eligible for sweep iff its process is not alive, or its
/// `last_heartbeat` is older than the configured stale threshold. This
/// trait exists so the sweep logic can be tested deterministically against
/// [`FakeLiveness`] rather than real OS process state.
pub trait Liveness: Send + Sync {
    /// Whether `pid` currently names a live process on this host.
    fn is_alive(&self, pid: u32) -> bool;

    /// The current time, as seen by this oracle (overridable for tests).
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    /// Whether a session with the given `pid` and `last_heartbeat` is
    /// eligible for a stale sweep.
    fn is_eligible_for_sweep(&self, pid: u32, last_heartbeat: DateTime<Utc>, stale_threshold: Duration) -> bool {
        !self.is_alive(pid) || self.now() - last_heartbeat > stale_threshold
    }
}

/// The real, OS-backed liveness oracle.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsLiveness {
    own_pid: u32,
}

impl OsLiveness {
    /// Construct an oracle that never reports its own process as dead.
    #[must_use]
    pub fn new() -> Self {
        Self {
            own_pid: std::process::id(),
        }
    }
}

impl Liveness for OsLiveness {
    #[cfg(unix)]
    fn is_alive(&self, pid: u32) -> bool {
        if pid == self.own_pid {
            return true;
        }
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[cfg(not(unix))]
    fn is_alive(&self, pid: u32) -> bool {
        if pid == self.own_pid {
            return true;
        }
        // No portable zero-signal probe on this platform; a stale heartbeat
        // is the only sweep signal available.
        true
    }
}

/// An in-memory test double: an explicit pid → alive/dead map plus an
/// injectable clock, so sweep tests are deterministic (§4.2).
#[derive(Debug, Default)]
pub struct FakeLiveness {
    alive: std::sync::Mutex<std::collections::HashSet<u32>>,
    clock: std::sync::Mutex<DateTime<Utc>>,
}

impl FakeLiveness {
    /// Construct a fake oracle with its clock set to `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            alive: std::sync::Mutex::new(std::collections::HashSet::new()),
            clock: std::sync::Mutex::new(now),
        }
    }

    /// Mark `pid` alive. Takes `&self`: the alive set uses interior
    /// mutability so a `FakeLiveness` can be mutated through a shared
    /// reference already handed to a [`Liveness`] consumer.
    pub fn mark_alive(&self, pid: u32) {
        if let Ok(mut alive) = self.alive.lock() {
            alive.insert(pid);
        }
    }

    /// Mark `pid` dead (the default for any pid not explicitly marked
    /// alive).
    pub fn mark_dead(&self, pid: u32) {
        if let Ok(mut alive) = self.alive.lock() {
            alive.remove(&pid);
        }
    }

    /// Advance the fake clock.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut clock) = self.clock.lock() {
            *clock += by;
        }
    }
}

impl Liveness for FakeLiveness {
    fn is_alive(&self, pid: u32) -> bool {
        self.alive.lock().map(|set| set.contains(&pid)).unwrap_or(false)
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.lock().map(|c| *c).unwrap_or_else(|_| Utc::now())
    }
}
