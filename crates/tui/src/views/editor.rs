use std::collections::HashSet;
use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent, MouseEventKind};
use dbrowse_core::autocomplete::{AutocompleteController, DEBOUNCE_WINDOW};
use dbrowse_core::catalog::{fetch_metadata, MetadataKey};
use dbrowse_core::data_access::{DataAccess, DataAccessError};
use dbrowse_core::operation::{guarded, CancellationToken};
use dbrowse_core::retry::{OperationSlot, PromptResolution, Settled};
use ratatui::layout::{Constraint, Direction, Layout, Position, Rect};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Clear, Paragraph};
use ratatui::Frame;

use super::show_query_result;
use crate::context::AppContext;
use crate::editor_buffer::EditorBuffer;
use crate::event::Completion;
use crate::navigation::ViewMode;
use crate::screen::{prompt_key, typed_char, Effect, Handoff, Reaction, Screen};
use crate::task::Task;
use crate::widgets::{
    busy_line, dim_line, error_line, highlight, panel, render_retry_prompt, visible_window,
};

const HELP: &[(&str, &str)] = &[
    ("F5/Alt+Enter", "execute"),
    ("Ctrl+Space", "suggest"),
    ("Tab/Down", "next suggestion"),
    ("Enter", "accept suggestion"),
    ("Ctrl+L", "clear"),
    ("Esc", "cancel / hide / back"),
];

const SUGGESTION_ROWS: usize = 8;

/// SQL buffer with autocomplete and the query slot.
#[derive(Debug, Default)]
pub struct EditorView {
    buffer: EditorBuffer,
    autocomplete: AutocompleteController,
    slot: OperationSlot<String>,
    /// Metadata keys with a load in flight.
    in_flight: HashSet<MetadataKey>,
}

impl EditorView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the edit and schedules the debounced refresh.
    fn edited(&mut self) -> Reaction {
        let ticket = self
            .autocomplete
            .on_edit(self.buffer.text(), self.buffer.cursor());
        Reaction::task(Task::after(
            DEBOUNCE_WINDOW,
            Completion::AutocompleteDebounceFired(ticket),
        ))
    }

    /// Background load for missing keys that are not already loading.
    fn fetch_missing(&mut self, seq: u64, missing: Vec<MetadataKey>, ctx: &AppContext) -> Reaction {
        let Some(data) = ctx.data() else {
            return Reaction::none();
        };
        let keys = missing
            .into_iter()
            .filter(|key| self.in_flight.insert(key.clone()))
            .collect::<Vec<_>>();
        if keys.is_empty() {
            return Reaction::none();
        }
        tracing::debug!(seq, keys = keys.len(), "loading autocomplete metadata");
        let token = CancellationToken::new(Some(ctx.config.config().query_timeout()));
        Reaction::task(metadata_task(seq, token, data, keys))
    }

    fn execute(&mut self, ctx: &AppContext) -> Reaction {
        let sql = self.buffer.text().trim().to_string();
        if sql.is_empty() {
            return Reaction::status("Nothing to execute");
        }
        let Some(data) = ctx.data() else {
            return Reaction::effect(Effect::Switch(ViewMode::Connection));
        };
        let Some(token) = self.slot.begin(ctx.initial_timeout()) else {
            return Reaction::none();
        };
        self.autocomplete.hide();
        tracing::info!(chars = sql.len(), "executing query");
        Reaction::task(query_task(token, data, sql))
    }

    fn accept_suggestion(&mut self) -> Reaction {
        if let Some(accepted) = self.autocomplete.accept() {
            self.buffer.set(accepted.text, accepted.cursor);
        }
        Reaction::none()
    }

    fn handle_suggestion_key(&mut self, key: &KeyEvent) -> Option<Reaction> {
        if !self.autocomplete.is_visible() {
            return None;
        }
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Tab | KeyCode::Down => self.autocomplete.select_next(),
            KeyCode::Char('n') if ctrl => self.autocomplete.select_next(),
            KeyCode::BackTab | KeyCode::Up => self.autocomplete.select_previous(),
            KeyCode::Char('p') if ctrl => self.autocomplete.select_previous(),
            KeyCode::Enter if key.modifiers.is_empty() => return Some(self.accept_suggestion()),
            _ => return None,
        }
        Some(Reaction::none())
    }

    fn handle_edit_key(&mut self, key: &KeyEvent) -> Reaction {
        if let Some(c) = typed_char(key) {
            self.buffer.insert_char(c);
            return self.edited();
        }
        match key.code {
            KeyCode::Enter => self.buffer.insert_char('\n'),
            KeyCode::Backspace => {
                if !self.buffer.backspace() {
                    return Reaction::none();
                }
            }
            KeyCode::Delete => {
                if !self.buffer.delete() {
                    return Reaction::none();
                }
            }
            KeyCode::Left | KeyCode::Right | KeyCode::Up | KeyCode::Down | KeyCode::Home
            | KeyCode::End => {
                match key.code {
                    KeyCode::Left => self.buffer.move_left(),
                    KeyCode::Right => self.buffer.move_right(),
                    KeyCode::Up => self.buffer.move_up(),
                    KeyCode::Down => self.buffer.move_down(),
                    KeyCode::Home => self.buffer.move_home(),
                    _ => self.buffer.move_end(),
                }
                self.autocomplete.hide();
                return Reaction::none();
            }
            _ => return Reaction::none(),
        }
        self.edited()
    }

    fn render_suggestions(&self, frame: &mut Frame<'_>, editor: Rect) {
        let suggestions = self.autocomplete.suggestions();
        let (line, column) = self.buffer.position();
        let rows = suggestions.len().min(SUGGESTION_ROWS);
        let height = u16::try_from(rows).unwrap_or(0) + 2;
        let width = 48.min(editor.width.saturating_sub(2));
        let x = (editor.x + 1 + u16::try_from(column).unwrap_or(0))
            .min(editor.right().saturating_sub(width));
        let below = editor.y + 2 + u16::try_from(line).unwrap_or(0);
        let y = if below + height <= editor.bottom() {
            below
        } else {
            editor.y.max(below.saturating_sub(height + 1))
        };
        let area = Rect::new(x, y, width, height.min(editor.height));

        let selected = self.autocomplete.selected_index();
        let lines = visible_window(selected, suggestions.len(), rows)
            .map(|index| {
                let suggestion = &suggestions[index];
                let text = format!(
                    "{:<4} {:<24} {}",
                    suggestion.kind.tag(),
                    suggestion.label,
                    suggestion.detail
                );
                if index == selected {
                    Line::from(Span::styled(text, highlight()))
                } else {
                    Line::from(text)
                }
            })
            .collect::<Vec<_>>();
        frame.render_widget(Clear, area);
        frame.render_widget(Paragraph::new(lines).block(panel("Suggestions")), area);
    }
}

fn query_task(token: CancellationToken, data: Arc<dyn DataAccess>, sql: String) -> Task {
    let query = sql.clone();
    Task::operation(
        token,
        async move { data.execute_query(&query).await },
        move |outcome| Completion::QueryExecuted {
            sql: sql.clone(),
            outcome,
        },
    )
}

fn metadata_task(
    seq: u64,
    token: CancellationToken,
    data: Arc<dyn DataAccess>,
    keys: Vec<MetadataKey>,
) -> Task {
    let fallback_keys = keys.clone();
    Task::new(
        async move {
            let outcome = guarded(token, fetch_metadata(data.as_ref(), &keys)).await;
            Completion::MetadataLoaded {
                seq,
                keys,
                result: outcome.into_result(),
            }
        },
        Completion::MetadataLoaded {
            seq,
            keys: fallback_keys,
            result: Err(DataAccessError::backend("metadata task panicked")),
        },
    )
}

impl Screen for EditorView {
    fn mode(&self) -> ViewMode {
        ViewMode::Editor
    }

    fn handle_key(&mut self, key: KeyEvent, ctx: &mut AppContext) -> Reaction {
        match self.slot.resolve_prompt(prompt_key(&key), &mut ctx.config) {
            PromptResolution::Inactive => {}
            PromptResolution::Retry { input, token, .. } => {
                return match ctx.data() {
                    Some(data) => Reaction::task(query_task(token, data, input)),
                    None => Reaction::effect(Effect::Switch(ViewMode::Connection)),
                };
            }
            PromptResolution::Swallowed | PromptResolution::Dismissed => return Reaction::none(),
        }

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let alt = key.modifiers.contains(KeyModifiers::ALT);
        match key.code {
            KeyCode::F(5) => return self.execute(ctx),
            KeyCode::Enter if alt => return self.execute(ctx),
            KeyCode::Esc => {
                if self.slot.is_busy() {
                    self.slot.cancel();
                } else if self.autocomplete.is_visible() {
                    self.autocomplete.hide();
                } else {
                    return Reaction::effect(Effect::Pop {
                        fallback: ViewMode::Browser,
                    });
                }
                return Reaction::none();
            }
            KeyCode::Char('l') if ctrl => {
                self.buffer.clear();
                self.autocomplete.hide();
                return self.edited();
            }
            KeyCode::Char(' ') if ctrl => {
                let missing =
                    self.autocomplete
                        .trigger(self.buffer.text(), self.buffer.cursor(), &ctx.catalog);
                let seq = self.autocomplete.seq();
                return self.fetch_missing(seq, missing, ctx);
            }
            _ => {}
        }

        if let Some(reaction) = self.handle_suggestion_key(&key) {
            return reaction;
        }
        if ctrl || alt {
            return Reaction::none();
        }
        self.handle_edit_key(&key)
    }

    fn handle_mouse(&mut self, mouse: MouseEvent, _ctx: &mut AppContext) -> Reaction {
        if self.autocomplete.is_visible() {
            match mouse.kind {
                MouseEventKind::ScrollDown => self.autocomplete.select_next(),
                MouseEventKind::ScrollUp => self.autocomplete.select_previous(),
                _ => {}
            }
        }
        Reaction::none()
    }

    fn handle_completion(&mut self, completion: Completion, ctx: &mut AppContext) -> Reaction {
        match completion {
            Completion::AutocompleteDebounceFired(ticket) => {
                match self.autocomplete.apply(&ticket, &ctx.catalog) {
                    Some(missing) => self.fetch_missing(ticket.seq, missing, ctx),
                    None => Reaction::none(),
                }
            }
            Completion::MetadataLoaded { seq, keys, result } => {
                for key in &keys {
                    self.in_flight.remove(key);
                }
                match result {
                    Ok(entries) => {
                        for entry in entries {
                            ctx.catalog.store(entry);
                        }
                    }
                    Err(error) => {
                        tracing::debug!(%error, seq, "autocomplete metadata load aborted");
                        return Reaction::none();
                    }
                }
                match self.autocomplete.rerun(seq, &ctx.catalog) {
                    Some(missing) => self.fetch_missing(seq, missing, ctx),
                    None => Reaction::none(),
                }
            }
            Completion::QueryExecuted { sql, outcome } => {
                let executed = sql.clone();
                match self.slot.settle(outcome, sql, &ctx.config) {
                    Settled::Completed(result) => {
                        ctx.record_history(&executed, true);
                        show_query_result(executed, result)
                    }
                    Settled::Failed(error) => {
                        tracing::warn!(%error, "query failed");
                        ctx.record_history(&executed, false);
                        Reaction::none()
                    }
                    Settled::Retrying { input, token } => match ctx.data() {
                        Some(data) => Reaction::task(query_task(token, data, input)),
                        None => Reaction::none(),
                    },
                    Settled::Cancelled => {
                        tracing::info!("query cancelled");
                        Reaction::none()
                    }
                    Settled::PromptShown => Reaction::none(),
                }
            }
            _ => Reaction::none(),
        }
    }

    fn accept(&mut self, handoff: Handoff, _ctx: &mut AppContext) -> Reaction {
        if let Handoff::EditorText(text) = handoff {
            let end = text.len();
            self.buffer.set(text, end);
            self.autocomplete.hide();
            let _ = self
                .autocomplete
                .on_edit(self.buffer.text(), self.buffer.cursor());
        }
        Reaction::none()
    }

    fn render(&self, frame: &mut Frame<'_>, area: Rect, _ctx: &AppContext) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(3), Constraint::Length(3)])
            .split(area);

        let text = self
            .buffer
            .text()
            .split('\n')
            .map(|line| Line::from(line.to_string()))
            .collect::<Vec<_>>();
        let (line, column) = self.buffer.position();
        let inner_height = usize::from(chunks[0].height.saturating_sub(2));
        let scroll = line.saturating_sub(inner_height.saturating_sub(1));
        let editor = Paragraph::new(text)
            .block(panel("SQL"))
            .scroll((u16::try_from(scroll).unwrap_or(0), 0));
        frame.render_widget(editor, chunks[0]);

        let cursor_x = chunks[0].x + 1 + u16::try_from(column).unwrap_or(0);
        let cursor_y = chunks[0].y + 1 + u16::try_from(line - scroll).unwrap_or(0);
        if cursor_x < chunks[0].right() && cursor_y < chunks[0].bottom() {
            frame.set_cursor_position(Position::new(cursor_x, cursor_y));
        }

        let status = if let Some(line) = busy_line(self.slot.state(), "Executing") {
            line
        } else if let Some(error) = self.slot.error().filter(|_| !self.slot.prompt().is_active()) {
            error_line(error)
        } else {
            dim_line(format!(
                "Ln {}, Col {} | F5 or Alt+Enter to execute",
                line + 1,
                column + 1
            ))
        };
        frame.render_widget(Paragraph::new(status).block(panel("Status")), chunks[1]);

        if self.autocomplete.is_visible() {
            self.render_suggestions(frame, chunks[0]);
        }
        if self.slot.prompt().is_active() {
            render_retry_prompt(frame, self.slot.error());
        }
    }

    fn captures_text(&self) -> bool {
        true
    }

    fn claims_key(&self, key: &KeyEvent) -> bool {
        key.code == KeyCode::Tab && self.autocomplete.is_visible()
    }

    fn retry_prompt_active(&self) -> bool {
        self.slot.prompt().is_active()
    }

    fn help(&self) -> &'static [(&'static str, &'static str)] {
        HELP
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use dbrowse_core::catalog::MetadataEntry;
    use dbrowse_core::operation::Outcome;
    use dbrowse_core::retry::TimeoutPreferences;

    use super::EditorView;
    use crate::context::AppContext;
    use crate::event::Completion;
    use crate::navigation::ViewMode;
    use crate::screen::{Effect, Handoff, Screen};
    use crate::testing::{chr, connected, ctrl, key, users_result};

    fn type_text(view: &mut EditorView, ctx: &mut AppContext, text: &str) -> Vec<crate::task::Task> {
        text.chars()
            .flat_map(|c| view.handle_key(chr(c), ctx).tasks)
            .collect()
    }

    /// Runs every task and feeds the completions back until none are left.
    async fn drain(view: &mut EditorView, ctx: &mut AppContext, tasks: Vec<crate::task::Task>) {
        let mut pending = tasks;
        while let Some(task) = pending.pop() {
            let completion = task.run().await;
            pending.extend(view.handle_completion(completion, ctx).tasks);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_latest_keystroke_refreshes_suggestions() {
        let (mut ctx, _dir, _data) = connected();
        let mut view = EditorView::new();
        let tasks = type_text(&mut view, &mut ctx, "SEL");
        assert_eq!(tasks.len(), 3);

        let mut completions = Vec::new();
        for task in tasks {
            completions.push(task.run().await);
        }
        let stale = completions.remove(0);
        let _ = view.handle_completion(stale, &mut ctx);
        assert!(!view.autocomplete.is_visible());

        let latest = completions.pop().expect("latest ticket");
        let _ = view.handle_completion(latest, &mut ctx);
        assert!(view.autocomplete.is_visible());
        assert_eq!(
            view.autocomplete.selected().map(|s| s.label.as_str()),
            Some("SELECT")
        );
    }

    #[tokio::test]
    async fn missing_columns_load_in_the_background_then_show() {
        let (mut ctx, _dir, _data) = connected();
        ctx.catalog.store(MetadataEntry::Tables {
            schema: "shop".to_string(),
            tables: vec!["users".to_string(), "orders".to_string()],
        });
        let mut view = EditorView::new();
        let _ = view.accept(
            Handoff::EditorText("SELECT * FROM users u WHERE u.em".to_string()),
            &mut ctx,
        );

        let reaction = view.handle_key(ctrl(' '), &mut ctx);
        assert_eq!(reaction.tasks.len(), 1);
        assert!(!view.autocomplete.is_visible());
        drain(&mut view, &mut ctx, reaction.tasks).await;

        let labels = view
            .autocomplete
            .suggestions()
            .iter()
            .map(|suggestion| suggestion.label.as_str())
            .collect::<Vec<_>>();
        assert_eq!(labels, ["u.email", "email"]);

        // Cached now, so a second trigger has nothing to load.
        let again = view.handle_key(ctrl(' '), &mut ctx);
        assert!(again.tasks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn accepting_replaces_the_token_and_stales_tickets() {
        let (mut ctx, _dir, _data) = connected();
        ctx.catalog.store(MetadataEntry::Tables {
            schema: "shop".to_string(),
            tables: vec!["users".to_string(), "orders".to_string()],
        });
        let mut view = EditorView::new();
        let tasks = type_text(&mut view, &mut ctx, "SELECT * FROM us");
        let pending = tasks.into_iter().last().expect("ticket");
        let fired = pending.run().await;
        let _ = view.handle_completion(fired.clone(), &mut ctx);
        assert!(view.autocomplete.is_visible());

        let _ = view.handle_key(key(KeyCode::Enter), &mut ctx);
        assert_eq!(view.buffer.text(), "SELECT * FROM users");
        assert_eq!(view.buffer.cursor(), view.buffer.text().len());

        let _ = view.handle_completion(fired, &mut ctx);
        assert!(!view.autocomplete.is_visible());
    }

    #[tokio::test]
    async fn successful_query_records_history_and_pushes_results() {
        let (mut ctx, _dir, data) = connected();
        let mut view = EditorView::new();
        let _ = view.accept(Handoff::EditorText("SELECT * FROM users".to_string()), &mut ctx);

        let mut reaction = view.handle_key(KeyEvent::new(KeyCode::F(5), KeyModifiers::NONE), &mut ctx);
        assert!(view.slot.is_busy());
        let completion = reaction.tasks.remove(0).run().await;
        let reaction = view.handle_completion(completion, &mut ctx);

        assert_eq!(
            reaction.effects,
            [
                Effect::Handoff(
                    ViewMode::Results,
                    Handoff::QueryResult {
                        sql: "SELECT * FROM users".to_string(),
                        result: users_result(),
                    }
                ),
                Effect::Push(ViewMode::Results),
                Effect::Status("Query executed (2 rows)".to_string()),
            ]
        );
        let entry = &ctx.history.entries()[0];
        assert!(entry.success);
        assert_eq!(entry.database, "shop");
        assert_eq!(data.queries.lock().map(|q| q.len()).unwrap_or(0), 1);
    }

    #[tokio::test]
    async fn failed_query_is_recorded_and_shown() {
        let (mut ctx, _dir, _data) = connected();
        let mut view = EditorView::new();
        let _ = view.accept(Handoff::EditorText("SELECT broken".to_string()), &mut ctx);

        let mut reaction = view.handle_key(KeyEvent::new(KeyCode::Enter, KeyModifiers::ALT), &mut ctx);
        let completion = reaction.tasks.remove(0).run().await;
        let reaction = view.handle_completion(completion, &mut ctx);

        assert!(reaction.effects.is_empty());
        assert!(!ctx.history.entries()[0].success);
        assert!(view.slot.error().is_some_and(|error| error.contains("syntax")));
    }

    #[test]
    fn escape_cancels_then_hides_then_pops() {
        let (mut ctx, _dir, _data) = connected();
        let mut view = EditorView::new();
        let _ = view.accept(Handoff::EditorText("SELECT 1".to_string()), &mut ctx);
        let _ = view.handle_key(KeyEvent::new(KeyCode::F(5), KeyModifiers::NONE), &mut ctx);

        let _ = view.handle_key(key(KeyCode::Esc), &mut ctx);
        assert!(view.slot.is_busy());
        let reaction = view.handle_completion(
            Completion::QueryExecuted {
                sql: "SELECT 1".to_string(),
                outcome: Outcome::Cancelled,
            },
            &mut ctx,
        );
        assert!(reaction.effects.is_empty());
        assert!(view.slot.error().is_none());

        let reaction = view.handle_key(key(KeyCode::Esc), &mut ctx);
        assert_eq!(
            reaction.effects,
            [Effect::Pop {
                fallback: ViewMode::Browser
            }]
        );
    }

    #[test]
    fn timed_out_query_retries_once_with_the_saved_timeout() {
        let (mut ctx, _dir, _data) = connected();
        ctx.config.set_preferred_timeout(Duration::from_secs(120));
        let mut view = EditorView::new();
        let _ = view.accept(Handoff::EditorText("SELECT 1".to_string()), &mut ctx);

        let reaction = view.handle_key(KeyEvent::new(KeyCode::F(5), KeyModifiers::NONE), &mut ctx);
        assert_eq!(reaction.tasks.len(), 1);
        assert_eq!(view.slot.timeout(), Some(Duration::from_secs(30)));

        let reaction = view.handle_completion(
            Completion::QueryExecuted {
                sql: "SELECT 1".to_string(),
                outcome: Outcome::TimedOut,
            },
            &mut ctx,
        );
        assert_eq!(reaction.tasks.len(), 1);
        assert_eq!(view.slot.timeout(), Some(Duration::from_secs(120)));
        assert!(!view.slot.prompt().is_active());
    }

    #[test]
    fn ctrl_l_clears_the_buffer() {
        let (mut ctx, _dir, _data) = connected();
        let mut view = EditorView::new();
        let _ = view.accept(Handoff::EditorText("SELECT 1".to_string()), &mut ctx);
        let _ = view.handle_key(ctrl('l'), &mut ctx);
        assert!(view.buffer.is_empty());
    }
}
