use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent};
use dbrowse_core::data_access::DataAccess;
use dbrowse_core::history::HistoryEntry;
use dbrowse_core::operation::CancellationToken;
use dbrowse_core::retry::{OperationSlot, PromptResolution, Settled};
use ratatui::layout::Rect;
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::Frame;

use super::{list_step, matches_filter, show_query_result, step_selection};
use crate::context::AppContext;
use crate::event::Completion;
use crate::navigation::ViewMode;
use crate::screen::{prompt_key, typed_char, Effect, Handoff, Reaction, Screen};
use crate::task::Task;
use crate::widgets::{
    busy_line, dim_line, error_line, highlight, list_line, panel, render_retry_prompt,
    visible_window,
};

const HELP: &[(&str, &str)] = &[
    ("Enter", "open in editor"),
    ("r", "re-run"),
    ("/", "filter"),
    ("D", "clear history"),
    ("Esc", "cancel / back"),
];

/// Past queries, newest first.
#[derive(Debug, Default)]
pub struct HistoryView {
    entries: Vec<HistoryEntry>,
    selected: usize,
    filter: String,
    filtering: bool,
    confirm_clear: bool,
    slot: OperationSlot<String>,
}

impl HistoryView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn refresh(&mut self, ctx: &AppContext) {
        self.entries = ctx.history.entries().to_vec();
        self.selected = self.selected.min(self.visible().len().saturating_sub(1));
    }

    fn visible(&self) -> Vec<&HistoryEntry> {
        self.entries
            .iter()
            .filter(|entry| matches_filter(&entry.query, &self.filter))
            .collect()
    }

    fn selected_query(&self) -> Option<String> {
        self.visible()
            .get(self.selected)
            .map(|entry| entry.query.clone())
    }

    fn rerun(&mut self, ctx: &AppContext) -> Reaction {
        let Some(sql) = self.selected_query() else {
            return Reaction::none();
        };
        let Some(data) = ctx.data() else {
            return Reaction::effect(Effect::Switch(ViewMode::Connection));
        };
        let Some(token) = self.slot.begin(ctx.initial_timeout()) else {
            return Reaction::status("A query is already running");
        };
        tracing::debug!("re-running query from history");
        Reaction::task(rerun_task(token, data, sql))
    }

    fn handle_filter_key(&mut self, key: KeyEvent) -> Reaction {
        match key.code {
            KeyCode::Esc => {
                self.filter.clear();
                self.filtering = false;
            }
            KeyCode::Enter => self.filtering = false,
            KeyCode::Backspace => {
                self.filter.pop();
            }
            _ => {
                if let Some(c) = typed_char(&key) {
                    self.filter.push(c);
                }
            }
        }
        self.selected = 0;
        Reaction::none()
    }

    fn handle_confirm_key(&mut self, key: KeyEvent, ctx: &mut AppContext) -> Reaction {
        self.confirm_clear = false;
        if key.code != KeyCode::Char('y') {
            return Reaction::none();
        }
        match ctx.history.clear() {
            Ok(()) => {
                self.refresh(ctx);
                Reaction::status("History cleared")
            }
            Err(error) => {
                tracing::warn!(%error, "failed to clear history");
                self.slot.set_error(error.to_string());
                Reaction::none()
            }
        }
    }
}

fn rerun_task(token: CancellationToken, data: Arc<dyn DataAccess>, sql: String) -> Task {
    let query = sql.clone();
    Task::operation(
        token,
        async move { data.execute_query(&query).await },
        move |outcome| Completion::HistoryRerun {
            sql: sql.clone(),
            outcome,
        },
    )
}

impl Screen for HistoryView {
    fn mode(&self) -> ViewMode {
        ViewMode::History
    }

    fn handle_key(&mut self, key: KeyEvent, ctx: &mut AppContext) -> Reaction {
        match self.slot.resolve_prompt(prompt_key(&key), &mut ctx.config) {
            PromptResolution::Inactive => {}
            PromptResolution::Retry { input, token, .. } => {
                return match ctx.data() {
                    Some(data) => Reaction::task(rerun_task(token, data, input)),
                    None => Reaction::effect(Effect::Switch(ViewMode::Connection)),
                };
            }
            PromptResolution::Swallowed | PromptResolution::Dismissed => return Reaction::none(),
        }

        if self.confirm_clear {
            return self.handle_confirm_key(key, ctx);
        }
        if self.filtering {
            return self.handle_filter_key(key);
        }
        if let Some(step) = list_step(&key) {
            self.selected = step_selection(self.selected, self.visible().len(), step);
            return Reaction::none();
        }

        match key.code {
            KeyCode::Esc if self.slot.is_busy() => {
                self.slot.cancel();
                Reaction::none()
            }
            KeyCode::Esc if !self.filter.is_empty() => {
                self.filter.clear();
                self.selected = 0;
                Reaction::none()
            }
            KeyCode::Esc => Reaction::effect(Effect::Pop {
                fallback: ViewMode::Browser,
            }),
            KeyCode::Enter => match self.selected_query() {
                Some(sql) => Reaction::effect(Effect::Handoff(
                    ViewMode::Editor,
                    Handoff::EditorText(sql),
                ))
                .with_effect(Effect::Push(ViewMode::Editor)),
                None => Reaction::none(),
            },
            KeyCode::Char('r') => self.rerun(ctx),
            KeyCode::Char('/') => {
                self.filtering = true;
                Reaction::none()
            }
            KeyCode::Char('D') if !self.entries.is_empty() => {
                self.confirm_clear = true;
                Reaction::none()
            }
            _ => Reaction::none(),
        }
    }

    fn handle_completion(&mut self, completion: Completion, ctx: &mut AppContext) -> Reaction {
        let Completion::HistoryRerun { sql, outcome } = completion else {
            return Reaction::none();
        };
        let executed = sql.clone();
        match self.slot.settle(outcome, sql, &ctx.config) {
            Settled::Completed(result) => {
                ctx.record_history(&executed, true);
                self.refresh(ctx);
                show_query_result(executed, result)
            }
            Settled::Failed(error) => {
                tracing::warn!(%error, "history re-run failed");
                ctx.record_history(&executed, false);
                self.refresh(ctx);
                Reaction::none()
            }
            Settled::Retrying { input, token } => match ctx.data() {
                Some(data) => Reaction::task(rerun_task(token, data, input)),
                None => Reaction::none(),
            },
            Settled::Cancelled | Settled::PromptShown => Reaction::none(),
        }
    }

    fn on_enter(&mut self, ctx: &mut AppContext) -> Reaction {
        self.confirm_clear = false;
        self.refresh(ctx);
        Reaction::none()
    }

    fn render(&self, frame: &mut Frame<'_>, area: Rect, _ctx: &AppContext) {
        let mut lines = Vec::new();
        if self.filtering || !self.filter.is_empty() {
            lines.push(Line::from(format!("Filter: {}", self.filter)));
        }
        if self.confirm_clear {
            lines.push(Line::from(Span::styled("Clear all history? (y/n)", highlight())));
        }
        if let Some(line) = busy_line(self.slot.state(), "Running query") {
            lines.push(line);
        }
        if let Some(error) = self.slot.error().filter(|_| !self.slot.prompt().is_active()) {
            lines.push(error_line(error));
        }

        let visible = self.visible();
        if visible.is_empty() {
            lines.push(dim_line("No history yet"));
        }
        let used = u16::try_from(lines.len()).unwrap_or(u16::MAX);
        let height = usize::from(area.height.saturating_sub(2 + used));
        for index in visible_window(self.selected, visible.len(), height) {
            let entry = visible[index];
            let marker = if entry.success { "ok " } else { "err" };
            let query = entry.query.replace('\n', " ");
            lines.push(list_line(
                format!("{marker} [{}] {query}", entry.database),
                index == self.selected,
            ));
        }

        frame.render_widget(Paragraph::new(lines).block(panel("History")), area);
        if self.slot.prompt().is_active() {
            render_retry_prompt(frame, self.slot.error());
        }
    }

    fn captures_text(&self) -> bool {
        self.filtering
    }

    fn retry_prompt_active(&self) -> bool {
        self.slot.prompt().is_active()
    }

    fn help(&self) -> &'static [(&'static str, &'static str)] {
        HELP
    }
}
