use std::collections::HashSet;
use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent};
use dbrowse_core::catalog::MetadataEntry;
use dbrowse_core::data_access::{DataAccess, DataAccessError};
use dbrowse_core::operation::CancellationToken;
use dbrowse_core::retry::{OperationSlot, PromptResolution, Settled};
use ratatui::layout::Rect;
use ratatui::style::{Color, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::Frame;

use super::{list_step, matches_filter, step_selection};
use crate::context::AppContext;
use crate::event::{Completion, SchemaTable};
use crate::navigation::ViewMode;
use crate::screen::{prompt_key, typed_char, Effect, Handoff, Reaction, Screen};
use crate::task::Task;
use crate::widgets::{busy_line, dim_line, error_line, list_line, panel, render_retry_prompt};

const HELP: &[(&str, &str)] = &[
    ("Enter", "expand / collapse"),
    ("o", "open table"),
    ("/", "filter"),
    ("r", "reload"),
    ("Esc", "cancel / back"),
];

/// Tables of the current schema with their columns.
#[derive(Debug, Default)]
pub struct SchemaView {
    schema: String,
    tables: Vec<SchemaTable>,
    expanded: HashSet<String>,
    selected: usize,
    filter: String,
    filtering: bool,
    slot: OperationSlot<String>,
    /// Session id and schema of the last load.
    loaded: Option<(u64, String)>,
}

impl SchemaView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn visible(&self) -> Vec<&SchemaTable> {
        self.tables
            .iter()
            .filter(|entry| matches_filter(&entry.table.name, &self.filter))
            .collect()
    }

    fn load(&mut self, ctx: &AppContext) -> Reaction {
        let (Some(data), Some(session)) = (ctx.data(), ctx.session()) else {
            return Reaction::effect(Effect::Switch(ViewMode::Connection));
        };
        let Some(schema) = ctx.current_schema() else {
            return Reaction::status("Pick a schema in the browser first");
        };
        let Some(token) = self.slot.begin(ctx.initial_timeout()) else {
            return Reaction::none();
        };
        self.loaded = Some((session.id, schema.clone()));
        self.schema.clone_from(&schema);
        Reaction::task(schema_task(token, data, schema))
    }

    fn apply(&mut self, tables: Vec<SchemaTable>, ctx: &mut AppContext) {
        ctx.catalog.store(MetadataEntry::Tables {
            schema: self.schema.clone(),
            tables: tables.iter().map(|entry| entry.table.name.clone()).collect(),
        });
        for entry in &tables {
            ctx.catalog.store(MetadataEntry::Columns {
                schema: self.schema.clone(),
                table: entry.table.name.clone(),
                columns: entry.columns.clone(),
            });
        }
        tracing::debug!(schema = %self.schema, tables = tables.len(), "schema loaded");
        self.expanded
            .retain(|name| tables.iter().any(|entry| entry.table.name == *name));
        self.tables = tables;
        self.selected = self.selected.min(self.visible().len().saturating_sub(1));
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
}

fn schema_task(token: CancellationToken, data: Arc<dyn DataAccess>, schema: String) -> Task {
    let requested = schema.clone();
    Task::operation(
        token,
        async move { describe_schema(data.as_ref(), &requested).await },
        move |outcome| Completion::SchemaLoaded {
            schema: schema.clone(),
            outcome,
        },
    )
}

async fn describe_schema(
    data: &dyn DataAccess,
    schema: &str,
) -> Result<Vec<SchemaTable>, DataAccessError> {
    let tables = data.get_storage_units(schema).await?;
    let mut described = Vec::with_capacity(tables.len());
    for table in tables {
        let columns = data.get_columns(schema, &table.name).await?;
        described.push(SchemaTable { table, columns });
    }
    Ok(described)
}

impl Screen for SchemaView {
    fn mode(&self) -> ViewMode {
        ViewMode::Schema
    }

    fn handle_key(&mut self, key: KeyEvent, ctx: &mut AppContext) -> Reaction {
        match self.slot.resolve_prompt(prompt_key(&key), &mut ctx.config) {
            PromptResolution::Inactive => {}
            PromptResolution::Retry { input, token, .. } => {
                return match ctx.data() {
                    Some(data) => Reaction::task(schema_task(token, data, input)),
                    None => Reaction::effect(Effect::Switch(ViewMode::Connection)),
                };
            }
            PromptResolution::Swallowed | PromptResolution::Dismissed => return Reaction::none(),
        }

        if self.filtering {
            return self.handle_filter_key(key);
        }
        if let Some(step) = list_step(&key) {
            self.selected = step_selection(self.selected, self.visible().len(), step);
            return Reaction::none();
        }

        let selected = self
            .visible()
            .get(self.selected)
            .map(|entry| entry.table.name.clone());
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
            KeyCode::Enter => {
                if let Some(name) = selected {
                    if !self.expanded.remove(&name) {
                        self.expanded.insert(name);
                    }
                }
                Reaction::none()
            }
            KeyCode::Char('o') => match selected {
                Some(table) => Reaction::effect(Effect::Handoff(
                    ViewMode::Results,
                    Handoff::OpenTable {
                        schema: self.schema.clone(),
                        table,
                    },
                ))
                .with_effect(Effect::Push(ViewMode::Results)),
                None => Reaction::none(),
            },
            KeyCode::Char('/') => {
                self.filtering = true;
                Reaction::none()
            }
            KeyCode::Char('r') => self.load(ctx),
            _ => Reaction::none(),
        }
    }

    fn handle_completion(&mut self, completion: Completion, ctx: &mut AppContext) -> Reaction {
        let Completion::SchemaLoaded { schema, outcome } = completion else {
            return Reaction::none();
        };
        let current = schema == self.schema;
        match self.slot.settle(outcome, schema, &ctx.config) {
            Settled::Completed(tables) if current => {
                self.apply(tables, ctx);
                Reaction::none()
            }
            Settled::Completed(_) | Settled::Cancelled | Settled::PromptShown => Reaction::none(),
            Settled::Retrying { input, token } => match ctx.data() {
                Some(data) => Reaction::task(schema_task(token, data, input)),
                None => Reaction::none(),
            },
            Settled::Failed(error) => {
                tracing::warn!(%error, schema = %self.schema, "loading schema failed");
                Reaction::none()
            }
        }
    }

    fn on_enter(&mut self, ctx: &mut AppContext) -> Reaction {
        let Some(session_id) = ctx.session().map(|session| session.id) else {
            return Reaction::none();
        };
        let schema = ctx.current_schema().unwrap_or_default();
        let stale = self.loaded.as_ref() != Some(&(session_id, schema));
        if stale && !self.slot.is_busy() {
            self.tables.clear();
            self.expanded.clear();
            self.selected = 0;
            self.load(ctx)
        } else {
            Reaction::none()
        }
    }

    fn render(&self, frame: &mut Frame<'_>, area: Rect, _ctx: &AppContext) {
        let mut lines = Vec::new();
        if self.filtering || !self.filter.is_empty() {
            lines.push(Line::from(format!("Filter: {}", self.filter)));
        }
        if let Some(line) = busy_line(self.slot.state(), "Loading schema") {
            lines.push(line);
        }
        if let Some(error) = self.slot.error().filter(|_| !self.slot.prompt().is_active()) {
            lines.push(error_line(error));
        }

        let visible = self.visible();
        if visible.is_empty() && !self.slot.is_busy() {
            lines.push(dim_line("No tables"));
        }
        for (index, entry) in visible.iter().enumerate() {
            let open = self.expanded.contains(&entry.table.name);
            let marker = if open { "-" } else { "+" };
            lines.push(list_line(
                format!(
                    "{marker} {} ({}, {} columns)",
                    entry.table.name,
                    entry.table.kind.to_lowercase(),
                    entry.columns.len()
                ),
                index == self.selected,
            ));
            if open {
                for column in &entry.columns {
                    let null = if column.nullable { "" } else { " not null" };
                    lines.push(Line::from(vec![
                        Span::raw(format!("      {} ", column.name)),
                        Span::styled(
                            format!("{}{null}", column.data_type),
                            Style::default().fg(Color::DarkGray),
                        ),
                    ]));
                }
            }
        }

        // Keep the selected table in view when columns push it down.
        let selected_line = lines
            .iter()
            .position(|line| line.spans.first().is_some_and(|span| span.content.starts_with("> ")))
            .unwrap_or(0);
        let height = usize::from(area.height.saturating_sub(2));
        let skip = (selected_line + 1).saturating_sub(height);
        let lines = lines.into_iter().skip(skip).collect::<Vec<_>>();

        let title = if self.schema.is_empty() {
            "Schema".to_string()
        } else {
            format!("Schema: {}", self.schema)
        };
        frame.render_widget(Paragraph::new(lines).block(panel(&title)), area);
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

#[cfg(test)]
mod tests {
    use crossterm::event::KeyCode;
    use dbrowse_core::suggestions::MetadataSource;

    use super::SchemaView;
    use crate::context::AppContext;
    use crate::navigation::ViewMode;
    use crate::screen::{Effect, Handoff, Screen};
    use crate::testing::{chr, connected, context, key};

    async fn loaded(ctx: &mut AppContext) -> SchemaView {
        let mut view = SchemaView::new();
        let mut reaction = view.on_enter(ctx);
        let completion = reaction.tasks.remove(0).run().await;
        let _ = view.handle_completion(completion, ctx);
        view
    }

    #[tokio::test]
    async fn loading_describes_tables_and_warms_the_catalog() {
        let (mut ctx, _dir, _data) = connected();
        let mut view = loaded(&mut ctx).await;

        let names = view
            .tables
            .iter()
            .map(|entry| entry.table.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(names, ["orders", "users"]);
        assert_eq!(view.tables[1].columns.len(), 2);

        let columns = ctx.catalog.columns("shop", "users").expect("columns cached");
        assert_eq!(columns[1].name, "email");
        assert!(view.on_enter(&mut ctx).is_empty());
    }

    #[tokio::test]
    async fn enter_expands_and_o_opens_the_table() {
        let (mut ctx, _dir, _data) = connected();
        let mut view = loaded(&mut ctx).await;

        let _ = view.handle_key(key(KeyCode::Down), &mut ctx);
        let _ = view.handle_key(key(KeyCode::Enter), &mut ctx);
        assert!(view.expanded.contains("users"));
        let _ = view.handle_key(key(KeyCode::Enter), &mut ctx);
        assert!(view.expanded.is_empty());

        let reaction = view.handle_key(chr('o'), &mut ctx);
        assert_eq!(
            reaction.effects,
            [
                Effect::Handoff(
                    ViewMode::Results,
                    Handoff::OpenTable {
                        schema: "shop".to_string(),
                        table: "users".to_string(),
                    }
                ),
                Effect::Push(ViewMode::Results),
            ]
        );
    }

    #[tokio::test]
    async fn filter_then_escape_clears_before_leaving() {
        let (mut ctx, _dir, _data) = connected();
        let mut view = loaded(&mut ctx).await;

        for c in "/ord".chars() {
            let _ = view.handle_key(chr(c), &mut ctx);
        }
        let _ = view.handle_key(key(KeyCode::Enter), &mut ctx);
        assert_eq!(view.visible().len(), 1);

        assert!(view.handle_key(key(KeyCode::Esc), &mut ctx).is_empty());
        assert_eq!(view.visible().len(), 2);
        assert_eq!(
            view.handle_key(key(KeyCode::Esc), &mut ctx).effects,
            [Effect::Pop {
                fallback: ViewMode::Browser
            }]
        );
    }

    #[test]
    fn disconnected_reload_returns_to_connection() {
        let (mut ctx, _dir) = context();
        let mut view = SchemaView::new();
        assert!(view.on_enter(&mut ctx).is_empty());
        assert_eq!(
            view.handle_key(chr('r'), &mut ctx).effects,
            [Effect::Switch(ViewMode::Connection)]
        );
    }
}
