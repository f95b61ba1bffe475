//! Terminal dashboard for live session status.

mod app;
mod ui;

use std::io;
use std::path::Path;
use std::time::Duration;

use crossterm::event::{DisableMouseCapture, EnableMouseCapture};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use ratatui::prelude::CrosstermBackend;
use ratatui::Terminal;

use concord::error::{CoordError, Result};
use concord::liveness::Liveness;
use concord::store::Store;

pub use app::App;

/// How often the dashboard re-polls the store for session status.
const REFRESH_INTERVAL: Duration = Duration::from_millis(500);

/// Restore the terminal to its original state. Errors are ignored so this
/// is safe to call from a panic hook.
fn restore_terminal() {
    let _ = disable_raw_mode();
    let _ = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture);
}

/// Run the live session dashboard against `store`, optionally filtered to
/// `repo_filter`, until the user quits (`q` or Ctrl-C).
///
/// # Errors
/// Returns [`CoordError::Internal`] if the terminal cannot be put into raw
/// mode, or on a store failure while refreshing.
pub fn run_dashboard(store: &Store, liveness: &dyn Liveness, repo_filter: Option<&Path>) -> Result<()> {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        restore_terminal();
        original_hook(info);
    }));

    enable_raw_mode().map_err(|err| CoordError::Internal(err.to_string()))?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture).map_err(|err| CoordError::Internal(err.to_string()))?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).map_err(|err| CoordError::Internal(err.to_string()))?;

    let mut app = App::new(store, liveness, repo_filter.map(Path::to_path_buf));
    let result = app.run(&mut terminal, REFRESH_INTERVAL);

    restore_terminal();
    let _ = terminal.show_cursor();

    result
}
