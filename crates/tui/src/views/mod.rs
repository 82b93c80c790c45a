//! The screens registered with the controller, one per [`ViewMode`].

mod browser;
mod chat;
mod columns;
mod connection;
mod editor;
mod export;
mod history;
mod results;
mod schema;
mod where_clause;

pub use browser::BrowserView;
pub use chat::ChatView;
pub use columns::ColumnsView;
pub use connection::ConnectionView;
pub use editor::EditorView;
pub use export::ExportView;
pub use history::HistoryView;
pub use results::ResultsView;
pub use schema::SchemaView;
pub use where_clause::WhereView;

use crossterm::event::{KeyCode, KeyEvent};
use dbrowse_core::data_access::QueryResult;

use crate::navigation::ViewMode;
use crate::screen::{Effect, Handoff, Reaction, Screen};

/// One instance of every view, ready for the controller.
#[must_use]
pub fn all_screens(connection: ConnectionView) -> Vec<Box<dyn Screen>> {
    vec![
        Box::new(connection),
        Box::new(BrowserView::new()),
        Box::new(EditorView::new()),
        Box::new(ResultsView::new()),
        Box::new(HistoryView::new()),
        Box::new(ExportView::new()),
        Box::new(WhereView::new()),
        Box::new(ColumnsView::new()),
        Box::new(ChatView::new()),
        Box::new(SchemaView::new()),
    ]
}

/// Up/Down and vi-style j/k as a selection step.
fn list_step(key: &KeyEvent) -> Option<isize> {
    match key.code {
        KeyCode::Up | KeyCode::Char('k') => Some(-1),
        KeyCode::Down | KeyCode::Char('j') => Some(1),
        _ => None,
    }
}

/// Moves `selected` by `step` within `0..len`, without wrapping.
fn step_selection(selected: usize, len: usize, step: isize) -> usize {
    if len == 0 {
        return 0;
    }
    selected.saturating_add_signed(step).min(len - 1)
}

/// Hands a finished query to the results view and reports its size.
fn show_query_result(sql: String, result: QueryResult) -> Reaction {
    let status = match result.affected_rows {
        Some(affected) if result.columns.is_empty() => {
            format!("Query executed ({affected} rows affected)")
        }
        _ => format!("Query executed ({} rows)", result.row_count()),
    };
    Reaction::effect(Effect::Handoff(
        ViewMode::Results,
        Handoff::QueryResult { sql, result },
    ))
    .with_effect(Effect::Push(ViewMode::Results))
    .with_effect(Effect::Status(status))
}

/// Case-insensitive substring match used by the list filters.
fn matches_filter(candidate: &str, filter: &str) -> bool {
    filter.is_empty() || candidate.to_lowercase().contains(&filter.to_lowercase())
}
