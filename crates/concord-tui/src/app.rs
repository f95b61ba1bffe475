use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::backend::Backend;
use ratatui::Terminal;

use concord::coordinator::Coordinator;
use concord::error::Result;
use concord::liveness::Liveness;
use concord::model::session::SessionStatus;
use concord::store::Store;

use crate::ui;

/// Drives the dashboard's poll-render-input loop.
pub struct App<'a> {
    store: &'a Store,
    liveness: &'a dyn Liveness,
    repo_filter: Option<PathBuf>,
    sessions: Vec<SessionStatus>,
    selected: usize,
    should_quit: bool,
}

impl<'a> App<'a> {
    #[must_use]
    pub fn new(store: &'a Store, liveness: &'a dyn Liveness, repo_filter: Option<PathBuf>) -> Self {
        Self {
            store,
            liveness,
            repo_filter,
            sessions: Vec::new(),
            selected: 0,
            should_quit: false,
        }
    }

    fn refresh(&mut self) -> Result<()> {
        // The dashboard doesn't create or remove worktrees, so any
        // `WorktreePort` would do here; status never calls into it.
        let coordinator = Coordinator::new(self.store, &NullWorktree, self.liveness);
        let status = coordinator.status(self.repo_filter.as_deref())?;
        self.sessions = status.sessions;
        if self.selected >= self.sessions.len() {
            self.selected = self.sessions.len().saturating_sub(1);
        }
        Ok(())
    }

    fn handle_key(&mut self, key: event::KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => self.should_quit = true,
            KeyCode::Char('c') if key.modifiers.contains(event::KeyModifiers::CONTROL) => self.should_quit = true,
            KeyCode::Down | KeyCode::Char('j') => {
                if self.selected + 1 < self.sessions.len() {
                    self.selected += 1;
                }
            }
            KeyCode::Up | KeyCode::Char('k') => {
                self.selected = self.selected.saturating_sub(1);
            }
            _ => {}
        }
    }

    /// Run until the user quits, re-polling the store every
    /// `refresh_interval`.
    ///
    /// # Errors
    /// Returns an error if a store refresh fails, or the terminal cannot be
    /// drawn to.
    pub fn run<B: Backend>(&mut self, terminal: &mut Terminal<B>, refresh_interval: Duration) -> Result<()> {
        self.refresh()?;
        let mut last_refresh = Instant::now();

        loop {
            terminal
                .draw(|frame| ui::draw(frame, &self.sessions, self.selected, self.repo_filter.as_deref()))
                .map_err(|err| concord::error::CoordError::Internal(err.to_string()))?;

            let timeout = refresh_interval.saturating_sub(last_refresh.elapsed());
            if event::poll(timeout).map_err(|err| concord::error::CoordError::Internal(err.to_string()))? {
                if let Event::Key(key) = event::read().map_err(|err| concord::error::CoordError::Internal(err.to_string()))? {
                    self.handle_key(key);
                }
            }

            if self.should_quit {
                return Ok(());
            }

            if last_refresh.elapsed() >= refresh_interval {
                self.refresh()?;
                last_refresh = Instant::now();
            }
        }
    }
}

/// A [`concord::worktree::WorktreePort`] that is never called: the
/// dashboard only reads session status, which doesn't touch worktrees.
struct NullWorktree;

impl concord::worktree::WorktreePort for NullWorktree {
    fn create(&self, _name: &str, _base_ref: &str) -> Result<concord::worktree::WorktreeHandle> {
        Err(concord::error::CoordError::Internal("dashboard does not create worktrees".to_owned()))
    }

    fn path_for(&self, name: &str) -> PathBuf {
        PathBuf::from(name)
    }

    fn remove(&self, _name: &str, _delete_branch: bool) -> Result<()> {
        Err(concord::error::CoordError::Internal("dashboard does not remove worktrees".to_owned()))
    }

    fn list(&self) -> Result<Vec<concord::worktree::WorktreeHandle>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord::liveness::OsLiveness;

    #[test]
    fn refresh_against_empty_store_yields_no_sessions() {
        let store = Store::open_in_memory().unwrap();
        let liveness = OsLiveness::default();
        let mut app = App::new(&store, &liveness, None);
        app.refresh().unwrap();
        assert!(app.sessions.is_empty());
        assert_eq!(app.selected, 0);
    }

    #[test]
    fn selected_clamps_when_sessions_shrink() {
        let store = Store::open_in_memory().unwrap();
        let liveness = OsLiveness::default();
        let mut app = App::new(&store, &liveness, None);
        app.selected = 5;
        app.refresh().unwrap();
        assert_eq!(app.selected, 0);
    }
}
