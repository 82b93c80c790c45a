use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent, MouseEvent, MouseEventKind};
use dbrowse_core::data_access::{DataAccess, QueryResult};
use dbrowse_core::filter::RowFilter;
use dbrowse_core::operation::{CancellationToken, Outcome};
use dbrowse_core::retry::{OperationSlot, PromptResolution, Settled};
use ratatui::layout::Rect;
use ratatui::style::{Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::Frame;

use super::{list_step, step_selection};
use crate::context::AppContext;
use crate::event::{Completion, PageRequest};
use crate::navigation::ViewMode;
use crate::screen::{prompt_key, Effect, ExportSource, Handoff, Reaction, Screen};
use crate::task::Task;
use crate::widgets::{
    busy_line, dim_line, error_line, highlight, panel, render_retry_prompt, visible_window,
};

const HELP: &[(&str, &str)] = &[
    ("n/p", "next / previous page"),
    ("Arrows", "move"),
    ("w", "filter rows"),
    ("c", "columns"),
    ("x", "export"),
    ("e", "edit query"),
    ("r", "reload"),
    ("Esc", "cancel / back"),
];

const MAX_CELL_WIDTH: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum ResultsSource {
    #[default]
    Empty,
    Query {
        sql: String,
    },
    Table {
        schema: String,
        table: String,
    },
}

/// Grid over a query result or one page of a table.
#[derive(Debug, Default)]
pub struct ResultsView {
    source: ResultsSource,
    result: QueryResult,
    page: u64,
    filter: RowFilter,
    /// Column visibility; columns past the end count as visible.
    visible: Vec<bool>,
    selected_row: usize,
    column_offset: usize,
    slot: OperationSlot<PageRequest>,
    /// Page to load once the superseded load in flight has reported.
    pending: Option<u64>,
}

impl ResultsView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn visible_columns(&self) -> Vec<usize> {
        (0..self.result.columns.len())
            .filter(|index| self.visible.get(*index).copied().unwrap_or(true))
            .collect()
    }

    /// Headers and rows restricted to the visible columns.
    fn projection(&self) -> (Vec<String>, Vec<Vec<String>>) {
        let columns = self.visible_columns();
        let headers = columns
            .iter()
            .map(|index| self.result.columns[*index].clone())
            .collect();
        let rows = self
            .result
            .rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|index| row.get(*index).cloned().unwrap_or_default())
                    .collect()
            })
            .collect();
        (headers, rows)
    }

    fn reset_view(&mut self) {
        self.page = 0;
        self.visible.clear();
        self.selected_row = 0;
        self.column_offset = 0;
    }

    fn load_page(&mut self, page: u64, ctx: &AppContext) -> Reaction {
        let ResultsSource::Table { schema, table } = &self.source else {
            return Reaction::none();
        };
        let Some(data) = ctx.data() else {
            return Reaction::effect(Effect::Switch(ViewMode::Connection));
        };
        if self.slot.is_busy() {
            self.slot.cancel();
            self.pending = Some(page);
            tracing::debug!(page, "page load queued behind the running one");
            return Reaction::none();
        }
        let request = PageRequest {
            schema: schema.clone(),
            table: table.clone(),
            filter: self.filter.clone(),
            page,
        };
        let Some(token) = self.slot.begin(ctx.initial_timeout()) else {
            return Reaction::none();
        };
        tracing::debug!(table = %request.table, page, "loading page");
        Reaction::task(page_task(token, data, request, ctx.page_size()))
    }

    fn is_current(&self, request: &PageRequest) -> bool {
        matches!(
            &self.source,
            ResultsSource::Table { schema, table }
                if *schema == request.schema && *table == request.table
        ) && self.filter == request.filter
    }

    fn editor_text(&self, ctx: &AppContext) -> String {
        match &self.source {
            ResultsSource::Empty => String::new(),
            ResultsSource::Query { sql } => sql.clone(),
            ResultsSource::Table { schema, table } => {
                format!("SELECT * FROM {schema}.{table} LIMIT {}", ctx.page_size())
            }
        }
    }

    fn export_name(&self) -> String {
        match &self.source {
            ResultsSource::Table { table, .. } => table.clone(),
            ResultsSource::Empty | ResultsSource::Query { .. } => "query_result".to_string(),
        }
    }

    fn title(&self) -> String {
        match &self.source {
            ResultsSource::Empty => "Results".to_string(),
            ResultsSource::Query { .. } => "Query result".to_string(),
            ResultsSource::Table { schema, table } => {
                format!("{schema}.{table} (page {})", self.page + 1)
            }
        }
    }

    fn render_grid(&self, height: usize) -> Vec<Line<'static>> {
        let columns = self.visible_columns();
        let shown = columns.iter().skip(self.column_offset).copied().collect::<Vec<_>>();
        let widths = shown
            .iter()
            .map(|index| {
                let header = self.result.columns[*index].chars().count();
                self.result
                    .rows
                    .iter()
                    .filter_map(|row| row.get(*index))
                    .map(|cell| cell.chars().count())
                    .fold(header, usize::max)
                    .min(MAX_CELL_WIDTH)
            })
            .collect::<Vec<_>>();

        let format_row = |cells: Vec<&str>| {
            cells
                .iter()
                .zip(&widths)
                .map(|(cell, width)| {
                    let cell = cell.chars().take(*width).collect::<String>();
                    format!("{cell:<width$}")
                })
                .collect::<Vec<_>>()
                .join(" | ")
        };

        let header = format_row(
            shown
                .iter()
                .map(|index| self.result.columns[*index].as_str())
                .collect(),
        );
        let mut lines = vec![Line::from(Span::styled(
            header,
            Style::default().add_modifier(Modifier::BOLD),
        ))];
        for index in visible_window(self.selected_row, self.result.rows.len(), height) {
            let row = &self.result.rows[index];
            let text = format_row(
                shown
                    .iter()
                    .map(|column| row.get(*column).map_or("", String::as_str))
                    .collect(),
            );
            if index == self.selected_row {
                lines.push(Line::from(Span::styled(text, highlight())));
            } else {
                lines.push(Line::from(text));
            }
        }
        lines
    }
}

fn page_task(
    token: CancellationToken,
    data: Arc<dyn DataAccess>,
    request: PageRequest,
    page_size: u32,
) -> Task {
    let query = request.clone();
    Task::operation(
        token,
        async move {
            let offset = query.page * u64::from(page_size);
            data.get_rows(&query.schema, &query.table, &query.filter, page_size, offset)
                .await
        },
        move |outcome| Completion::PageLoaded {
            request: request.clone(),
            outcome,
        },
    )
}

impl Screen for ResultsView {
    fn mode(&self) -> ViewMode {
        ViewMode::Results
    }

    fn handle_key(&mut self, key: KeyEvent, ctx: &mut AppContext) -> Reaction {
        match self.slot.resolve_prompt(prompt_key(&key), &mut ctx.config) {
            PromptResolution::Inactive => {}
            PromptResolution::Retry { input, token, .. } => {
                return match ctx.data() {
                    Some(data) => Reaction::task(page_task(token, data, input, ctx.page_size())),
                    None => Reaction::effect(Effect::Switch(ViewMode::Connection)),
                };
            }
            PromptResolution::Swallowed | PromptResolution::Dismissed => return Reaction::none(),
        }

        if let Some(step) = list_step(&key) {
            self.selected_row = step_selection(self.selected_row, self.result.rows.len(), step);
            return Reaction::none();
        }

        let is_table = matches!(self.source, ResultsSource::Table { .. });
        match key.code {
            KeyCode::Esc if self.slot.is_busy() => {
                self.slot.cancel();
                self.pending = None;
                Reaction::none()
            }
            KeyCode::Esc => Reaction::effect(Effect::Pop {
                fallback: ViewMode::Browser,
            }),
            KeyCode::Left | KeyCode::Char('h') => {
                self.column_offset = self.column_offset.saturating_sub(1);
                Reaction::none()
            }
            KeyCode::Right | KeyCode::Char('l') => {
                let last = self.visible_columns().len().saturating_sub(1);
                self.column_offset = (self.column_offset + 1).min(last);
                Reaction::none()
            }
            KeyCode::Char('n') if is_table => {
                let full_page = self.result.rows.len() as u64 >= u64::from(ctx.page_size());
                if full_page {
                    self.load_page(self.page + 1, ctx)
                } else {
                    Reaction::status("Already on the last page")
                }
            }
            KeyCode::Char('p') if is_table => {
                if self.page == 0 {
                    Reaction::none()
                } else {
                    self.load_page(self.page - 1, ctx)
                }
            }
            KeyCode::Char('r') if is_table => self.load_page(self.page, ctx),
            KeyCode::Char('w') if is_table => Reaction::effect(Effect::Handoff(
                ViewMode::Where,
                Handoff::EditFilter {
                    columns: self.result.columns.clone(),
                    filter: self.filter.clone(),
                },
            ))
            .with_effect(Effect::Push(ViewMode::Where)),
            KeyCode::Char('w') => Reaction::status("Filters apply to table browsing"),
            KeyCode::Char('c') if !self.result.columns.is_empty() => {
                let visible = (0..self.result.columns.len())
                    .map(|index| self.visible.get(index).copied().unwrap_or(true))
                    .collect();
                Reaction::effect(Effect::Handoff(
                    ViewMode::Columns,
                    Handoff::ChooseColumns {
                        columns: self.result.columns.clone(),
                        visible,
                    },
                ))
                .with_effect(Effect::Push(ViewMode::Columns))
            }
            KeyCode::Char('x') if !self.result.columns.is_empty() => {
                let (headers, rows) = self.projection();
                Reaction::effect(Effect::Handoff(
                    ViewMode::Export,
                    Handoff::Export(ExportSource::Rows {
                        name: self.export_name(),
                        headers,
                        rows,
                    }),
                ))
                .with_effect(Effect::Push(ViewMode::Export))
            }
            KeyCode::Char('e') => Reaction::effect(Effect::Handoff(
                ViewMode::Editor,
                Handoff::EditorText(self.editor_text(ctx)),
            ))
            .with_effect(Effect::Push(ViewMode::Editor)),
            _ => Reaction::none(),
        }
    }

    fn handle_mouse(&mut self, mouse: MouseEvent, _ctx: &mut AppContext) -> Reaction {
        let step = match mouse.kind {
            MouseEventKind::ScrollUp => -1,
            MouseEventKind::ScrollDown => 1,
            _ => return Reaction::none(),
        };
        self.selected_row = step_selection(self.selected_row, self.result.rows.len(), step);
        Reaction::none()
    }

    fn handle_completion(&mut self, completion: Completion, ctx: &mut AppContext) -> Reaction {
        let Completion::PageLoaded { request, outcome } = completion else {
            return Reaction::none();
        };
        let page = request.page;
        let superseded = self.pending.is_some() || !self.is_current(&request);
        let outcome = if superseded {
            tracing::debug!(page, "discarding page for a superseded request");
            Outcome::Cancelled
        } else {
            outcome
        };

        let reaction = match self.slot.settle(outcome, request, &ctx.config) {
            Settled::Completed(result) => {
                if result.columns != self.result.columns {
                    self.visible.clear();
                    self.column_offset = 0;
                }
                self.result = result;
                self.page = page;
                self.selected_row = 0;
                Reaction::none()
            }
            Settled::Retrying { input, token } => match ctx.data() {
                Some(data) => Reaction::task(page_task(token, data, input, ctx.page_size())),
                None => Reaction::none(),
            },
            Settled::Failed(error) => {
                tracing::warn!(%error, page, "page load failed");
                Reaction::none()
            }
            Settled::Cancelled | Settled::PromptShown => Reaction::none(),
        };
        match self.pending.take() {
            Some(page) => self.load_page(page, ctx),
            None => reaction,
        }
    }

    fn accept(&mut self, handoff: Handoff, ctx: &mut AppContext) -> Reaction {
        match handoff {
            Handoff::QueryResult { sql, result } => {
                self.slot.cancel();
                self.pending = None;
                self.source = ResultsSource::Query { sql };
                self.result = result;
                self.filter = RowFilter::default();
                self.reset_view();
                Reaction::none()
            }
            Handoff::OpenTable { schema, table } => {
                self.source = ResultsSource::Table { schema, table };
                self.result = QueryResult::default();
                self.filter = RowFilter::default();
                self.reset_view();
                self.slot.clear_error();
                self.load_page(0, ctx)
            }
            Handoff::ApplyFilter(filter) => {
                self.filter = filter;
                self.selected_row = 0;
                self.load_page(0, ctx)
            }
            Handoff::ApplyColumns(visible) => {
                self.visible = visible;
                self.column_offset = 0;
                Reaction::none()
            }
            _ => Reaction::none(),
        }
    }

    fn render(&self, frame: &mut Frame<'_>, area: Rect, _ctx: &AppContext) {
        let mut lines = Vec::new();
        if !self.filter.is_empty() {
            let described = self
                .filter
                .conditions
                .iter()
                .map(dbrowse_core::filter::WhereCondition::describe)
                .collect::<Vec<_>>()
                .join(" AND ");
            lines.push(dim_line(format!("WHERE {described}")));
        }
        if let Some(line) = busy_line(self.slot.state(), "Loading rows") {
            lines.push(line);
        }
        if let Some(error) = self.slot.error().filter(|_| !self.slot.prompt().is_active()) {
            lines.push(error_line(error));
        }

        if self.result.columns.is_empty() {
            match self.result.affected_rows {
                Some(affected) => lines.push(Line::from(format!("{affected} rows affected"))),
                None if !self.slot.is_busy() => lines.push(dim_line("No results")),
                None => {}
            }
        } else {
            let used = u16::try_from(lines.len()).unwrap_or(u16::MAX);
            let height = usize::from(area.height.saturating_sub(4 + used));
            lines.extend(self.render_grid(height));
            lines.push(dim_line(format!(
                "{} rows | row {} | columns {}/{}",
                self.result.row_count(),
                self.selected_row + 1,
                self.visible_columns().len(),
                self.result.columns.len()
            )));
        }

        let title = self.title();
        frame.render_widget(Paragraph::new(lines).block(panel(&title)), area);
        if self.slot.prompt().is_active() {
            render_retry_prompt(frame, self.slot.error());
        }
    }

    fn retry_prompt_active(&self) -> bool {
        self.slot.prompt().is_active()
    }

    fn help(&self) -> &'static [(&'static str, &'static str)] {
        HELP
    }
}
