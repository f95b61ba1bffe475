use std::path::Path;

use ratatui::layout::{Constraint, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Paragraph, Row, Table};
use ratatui::Frame;

use concord::model::session::SessionStatus;

pub fn draw(frame: &mut Frame, sessions: &[SessionStatus], selected: usize, repo_filter: Option<&Path>) {
    let [header_area, table_area, footer_area] =
        Layout::vertical([Constraint::Length(1), Constraint::Min(0), Constraint::Length(1)]).areas(frame.area());

    let title = match repo_filter {
        Some(repo) => format!("concord sessions — {}", repo.display()),
        None => "concord sessions — all repos".to_owned(),
    };
    frame.render_widget(Paragraph::new(Line::from(Span::styled(title, Style::new().add_modifier(Modifier::BOLD)))), header_area);

    let rows = sessions.iter().enumerate().map(|(idx, status)| {
        let alive_style = if status.is_alive { Style::new().fg(Color::Green) } else { Style::new().fg(Color::Red) };
        let row = Row::new(vec![
            Cell::from(status.session.id.to_string()),
            Cell::from(status.session.pid.to_string()),
            Cell::from(status.session.worktree_name.clone().unwrap_or_else(|| "(main)".to_owned())),
            Cell::from(if status.is_alive { "alive" } else { "dead" }).style(alive_style),
            Cell::from(format!("{}m", status.duration_minutes)),
            Cell::from(status.session.status.clone().unwrap_or_default()),
        ]);
        if idx == selected {
            row.style(Style::new().add_modifier(Modifier::REVERSED))
        } else {
            row
        }
    });

    let widths = [
        Constraint::Length(36),
        Constraint::Length(8),
        Constraint::Length(20),
        Constraint::Length(6),
        Constraint::Length(8),
        Constraint::Min(10),
    ];

    let table = Table::new(rows, widths)
        .header(Row::new(vec!["session", "pid", "worktree", "alive", "age", "status"]).style(Style::new().add_modifier(Modifier::BOLD)))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(table, table_area);

    frame.render_widget(Paragraph::new("q: quit  j/k: select  (refreshes automatically)"), footer_area);
}
