use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent, MouseEvent, MouseEventKind};
use dbrowse_core::catalog::MetadataEntry;
use dbrowse_core::data_access::{
    select_best_schema, DataAccess, DataAccessError, TableDescriptor,
};
use dbrowse_core::operation::CancellationToken;
use dbrowse_core::retry::{OperationSlot, PromptResolution, Settled};
use ratatui::layout::Rect;
use ratatui::text::Line;
use ratatui::widgets::Paragraph;
use ratatui::Frame;

use super::{list_step, matches_filter, step_selection};
use crate::context::AppContext;
use crate::event::{Completion, TableListing};
use crate::navigation::ViewMode;
use crate::screen::{prompt_key, typed_char, Effect, ExportSource, Handoff, Reaction, Screen};
use crate::task::Task;
use crate::widgets::{
    busy_line, dim_line, error_line, list_line, panel, render_retry_prompt, visible_window,
};

const HELP: &[(&str, &str)] = &[
    ("Enter", "open table"),
    ("s", "next schema"),
    ("/", "filter"),
    ("r", "reload"),
    ("e", "editor"),
    ("h", "history"),
    ("a", "assistant"),
    ("v", "schema view"),
    ("x", "export table"),
    ("d", "disconnect"),
    ("q", "quit"),
];

/// Schema picker and table list for the open connection.
#[derive(Debug, Default)]
pub struct BrowserView {
    schemas: Vec<String>,
    schema: Option<String>,
    tables: Vec<TableDescriptor>,
    selected: usize,
    filter: String,
    filtering: bool,
    /// Input is the schema asked for; `None` lets the loader pick.
    slot: OperationSlot<Option<String>>,
    loaded_session: Option<u64>,
}

impl BrowserView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn visible_tables(&self) -> Vec<&TableDescriptor> {
        self.tables
            .iter()
            .filter(|table| matches_filter(&table.name, &self.filter))
            .collect()
    }

    fn selected_table(&self) -> Option<(String, String)> {
        let schema = self.schema.clone()?;
        let table = self.visible_tables().get(self.selected)?.name.clone();
        Some((schema, table))
    }

    fn load(&mut self, requested: Option<String>, ctx: &AppContext) -> Reaction {
        let Some(data) = ctx.data() else {
            return Reaction::effect(Effect::Switch(ViewMode::Connection));
        };
        let Some(token) = self.slot.begin(ctx.initial_timeout()) else {
            return Reaction::none();
        };
        tracing::debug!(schema = ?requested, "loading table list");
        Reaction::task(listing_task(token, data, requested))
    }

    fn next_schema(&self) -> Option<String> {
        if self.schemas.is_empty() {
            return None;
        }
        let next = self
            .schema
            .as_ref()
            .and_then(|current| self.schemas.iter().position(|schema| schema == current))
            .map_or(0, |index| (index + 1) % self.schemas.len());
        self.schemas.get(next).cloned()
    }

    fn apply_listing(&mut self, listing: TableListing, ctx: &mut AppContext) {
        ctx.set_current_schema(&listing.schema);
        ctx.catalog
            .store(MetadataEntry::Schemas(listing.schemas.clone()));
        ctx.catalog.store(MetadataEntry::Tables {
            schema: listing.schema.clone(),
            tables: listing
                .tables
                .iter()
                .map(|table| table.name.clone())
                .collect(),
        });

        self.schemas = listing.schemas;
        self.schema = Some(listing.schema);
        self.tables = listing.tables;
        self.selected = 0;
    }

    fn reset(&mut self) {
        self.schemas.clear();
        self.schema = None;
        self.tables.clear();
        self.selected = 0;
        self.filter.clear();
        self.filtering = false;
    }

    fn open_selected(&self) -> Reaction {
        match self.selected_table() {
            Some((schema, table)) => {
                Reaction::effect(Effect::Handoff(
                    ViewMode::Results,
                    Handoff::OpenTable { schema, table },
                ))
                .with_effect(Effect::Push(ViewMode::Results))
            }
            None => Reaction::none(),
        }
    }

    fn export_selected(&self) -> Reaction {
        match self.selected_table() {
            Some((schema, table)) => Reaction::effect(Effect::Handoff(
                ViewMode::Export,
                Handoff::Export(ExportSource::Table {
                    schema,
                    table,
                    filter: dbrowse_core::filter::RowFilter::default(),
                }),
            ))
            .with_effect(Effect::Push(ViewMode::Export)),
            None => Reaction::none(),
        }
    }

    fn handle_filter_key(&mut self, key: KeyEvent) -> Reaction {
        match key.code {
            KeyCode::Esc => {
                self.filtering = false;
                self.filter.clear();
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

fn listing_task(
    token: CancellationToken,
    data: Arc<dyn DataAccess>,
    requested: Option<String>,
) -> Task {
    let schema = requested.clone();
    Task::operation(
        token,
        async move { list_tables(data.as_ref(), schema).await },
        move |outcome| Completion::TablesLoaded {
            requested: requested.clone(),
            outcome,
        },
    )
}

async fn list_tables(
    data: &dyn DataAccess,
    requested: Option<String>,
) -> Result<TableListing, DataAccessError> {
    let schemas = data.get_schemas().await?;
    let schema = requested
        .or_else(|| select_best_schema(&schemas))
        .ok_or_else(|| DataAccessError::backend("no schemas available"))?;
    let tables = data.get_storage_units(&schema).await?;
    Ok(TableListing {
        schemas,
        schema,
        tables,
    })
}

impl Screen for BrowserView {
    fn mode(&self) -> ViewMode {
        ViewMode::Browser
    }

    fn handle_key(&mut self, key: KeyEvent, ctx: &mut AppContext) -> Reaction {
        match self.slot.resolve_prompt(prompt_key(&key), &mut ctx.config) {
            PromptResolution::Inactive => {}
            PromptResolution::Retry { input, token, .. } => {
                return match ctx.data() {
                    Some(data) => Reaction::task(listing_task(token, data, input)),
                    None => Reaction::effect(Effect::Switch(ViewMode::Connection)),
                };
            }
            PromptResolution::Swallowed | PromptResolution::Dismissed => return Reaction::none(),
        }

        if self.filtering {
            return self.handle_filter_key(key);
        }

        if let Some(step) = list_step(&key) {
            self.selected = step_selection(self.selected, self.visible_tables().len(), step);
            return Reaction::none();
        }

        match key.code {
            KeyCode::Esc if self.slot.is_busy() => {
                self.slot.cancel();
                Reaction::none()
            }
            KeyCode::Esc => {
                self.filter.clear();
                Reaction::none()
            }
            KeyCode::Enter => self.open_selected(),
            KeyCode::Char('s') => match self.next_schema() {
                Some(schema) => {
                    self.filter.clear();
                    self.load(Some(schema), ctx)
                }
                None => Reaction::none(),
            },
            KeyCode::Char('/') => {
                self.filtering = true;
                Reaction::none()
            }
            KeyCode::Char('r') => self.load(self.schema.clone(), ctx),
            KeyCode::Char('e') => Reaction::effect(Effect::Push(ViewMode::Editor)),
            KeyCode::Char('h') => Reaction::effect(Effect::Push(ViewMode::History)),
            KeyCode::Char('a') => Reaction::effect(Effect::Push(ViewMode::Chat)),
            KeyCode::Char('v') => Reaction::effect(Effect::Push(ViewMode::Schema)),
            KeyCode::Char('x') => self.export_selected(),
            KeyCode::Char('d') => {
                self.slot.cancel();
                ctx.close_session();
                self.loaded_session = None;
                self.reset();
                Reaction::effect(Effect::Switch(ViewMode::Connection))
                    .with_effect(Effect::Status("Disconnected".to_string()))
            }
            KeyCode::Char('q') => Reaction::effect(Effect::Quit),
            _ => Reaction::none(),
        }
    }

    fn handle_mouse(&mut self, mouse: MouseEvent, _ctx: &mut AppContext) -> Reaction {
        let step = match mouse.kind {
            MouseEventKind::ScrollUp => -1,
            MouseEventKind::ScrollDown => 1,
            _ => return Reaction::none(),
        };
        self.selected = step_selection(self.selected, self.visible_tables().len(), step);
        Reaction::none()
    }

    fn handle_completion(&mut self, completion: Completion, ctx: &mut AppContext) -> Reaction {
        let Completion::TablesLoaded { requested, outcome } = completion else {
            return Reaction::none();
        };

        match self.slot.settle(outcome, requested, &ctx.config) {
            Settled::Completed(listing) => {
                self.apply_listing(listing, ctx);
                Reaction::none()
            }
            Settled::Retrying { input, token } => match ctx.data() {
                Some(data) => Reaction::task(listing_task(token, data, input)),
                None => Reaction::none(),
            },
            Settled::Failed(error) => {
                tracing::warn!(%error, "table listing failed");
                Reaction::none()
            }
            Settled::Cancelled | Settled::PromptShown => Reaction::none(),
        }
    }

    fn on_enter(&mut self, ctx: &mut AppContext) -> Reaction {
        let Some(session_id) = ctx.session().map(|session| session.id) else {
            return Reaction::none();
        };
        if self.loaded_session == Some(session_id) || self.slot.is_busy() {
            return Reaction::none();
        }
        self.loaded_session = Some(session_id);
        self.reset();
        self.load(ctx.current_schema(), ctx)
    }

    fn render(&self, frame: &mut Frame<'_>, area: Rect, _ctx: &AppContext) {
        let schema = self.schema.as_deref().unwrap_or("-");
        let mut lines = vec![Line::from(format!(
            "Schema: {schema}  ({} available, s to cycle)",
            self.schemas.len()
        ))];
        if self.filtering || !self.filter.is_empty() {
            let cursor = if self.filtering { "_" } else { "" };
            lines.push(Line::from(format!("Filter: {}{cursor}", self.filter)));
        }
        lines.push(Line::from(""));

        let tables = self.visible_tables();
        if tables.is_empty() && !self.slot.is_busy() {
            lines.push(dim_line("No tables"));
        }
        let height = usize::from(area.height.saturating_sub(7));
        for index in visible_window(self.selected, tables.len(), height) {
            let table = tables[index];
            lines.push(list_line(
                format!("{:<40} {}", table.name, table.kind),
                index == self.selected,
            ));
        }
        if let Some(line) = busy_line(self.slot.state(), "Loading tables") {
            lines.push(line);
        }
        if let Some(error) = self.slot.error().filter(|_| !self.slot.prompt().is_active()) {
            lines.push(error_line(error));
            lines.push(dim_line("r: retry"));
        }
        frame.render_widget(Paragraph::new(lines).block(panel("Tables")), area);

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
