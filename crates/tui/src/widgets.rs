use std::ops::Range;

use dbrowse_core::operation::OperationState;
use dbrowse_core::retry::RetryChoice;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Clear, Paragraph, Wrap};
use ratatui::Frame;

pub fn panel(title: &str) -> Block<'_> {
    Block::default().borders(Borders::ALL).title(title)
}

#[must_use]
pub fn highlight() -> Style {
    Style::default()
        .fg(Color::Yellow)
        .add_modifier(Modifier::BOLD)
}

/// A list row, highlighted when selected.
pub fn list_line(text: String, selected: bool) -> Line<'static> {
    if selected {
        Line::from(Span::styled(format!("> {text}"), highlight()))
    } else {
        Line::from(format!("  {text}"))
    }
}

pub fn error_line(message: &str) -> Line<'static> {
    Line::from(Span::styled(
        format!("Error: {message}"),
        Style::default().fg(Color::Red),
    ))
}

pub fn dim_line(text: impl Into<String>) -> Line<'static> {
    Line::from(Span::styled(
        text.into(),
        Style::default().fg(Color::DarkGray),
    ))
}

/// "Loading..." style line for a busy slot.
pub fn busy_line(state: OperationState, what: &str) -> Option<Line<'static>> {
    match state {
        OperationState::Idle => None,
        OperationState::Running => Some(Line::from(Span::styled(
            format!("{what}... (Esc to cancel)"),
            Style::default().fg(Color::Cyan),
        ))),
        OperationState::Cancelling => Some(dim_line("Cancelling...")),
    }
}

/// Rows of a `len`-long list that fit in `height` with `selected` visible.
#[must_use]
pub fn visible_window(selected: usize, len: usize, height: usize) -> Range<usize> {
    if height == 0 || len == 0 {
        return 0..0;
    }
    let start = selected.saturating_sub(height - 1).min(len.saturating_sub(height));
    start..(start + height).min(len)
}

pub fn centered_rect(width_percent: u16, height_percent: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100_u16 - height_percent) / 2),
            Constraint::Percentage(height_percent),
            Constraint::Percentage((100_u16 - height_percent) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100_u16 - width_percent) / 2),
            Constraint::Percentage(width_percent),
            Constraint::Percentage((100_u16 - width_percent) / 2),
        ])
        .split(vertical[1])[1]
}

pub fn render_popup(
    frame: &mut Frame<'_>,
    (width_percent, height_percent): (u16, u16),
    title: &str,
    lines: Vec<Line<'_>>,
) {
    let area = centered_rect(width_percent, height_percent, frame.area());
    frame.render_widget(Clear, area);
    let popup = Paragraph::new(lines)
        .block(panel(title))
        .wrap(Wrap { trim: false });
    frame.render_widget(popup, area);
}

/// The timeout menu shown while a retry prompt is active.
pub fn render_retry_prompt(frame: &mut Frame<'_>, message: Option<&str>) {
    let mut lines = vec![
        Line::from(message.unwrap_or("Timed out").to_string()),
        Line::from(""),
        Line::from("Retry with a longer timeout:"),
    ];
    lines.extend(RetryChoice::ALL.iter().enumerate().map(|(index, choice)| {
        Line::from(format!("  {}  {}", index + 1, choice.label()))
    }));
    lines.push(Line::from(""));
    lines.push(dim_line("Esc  dismiss"));
    render_popup(frame, (50, 40), "Timed out", lines);
}

#[cfg(test)]
mod tests {
    use ratatui::layout::Rect;

    use super::{centered_rect, visible_window};

    #[test]
    fn window_keeps_selection_in_view() {
        assert_eq!(visible_window(0, 10, 4), 0..4);
        assert_eq!(visible_window(5, 10, 4), 2..6);
        assert_eq!(visible_window(9, 10, 4), 6..10);
        assert_eq!(visible_window(1, 2, 4), 0..2);
        assert_eq!(visible_window(3, 10, 0), 0..0);
    }

    #[test]
    fn centered_rect_stays_inside_area() {
        let area = Rect::new(0, 0, 100, 40);
        let popup = centered_rect(50, 50, area);
        assert_eq!(popup.width, 50);
        assert_eq!(popup.height, 20);
        assert_eq!(popup.x, 25);
        assert_eq!(popup.y, 10);
    }
}
