use std::path::PathBuf;
use std::sync::Arc;

use crossterm::event::{KeyCode, KeyEvent};
use dbrowse_adapters::export::{export_rows, resolve_export_path, CsvDelimiter, ExportFormat};
use dbrowse_core::data_access::{DataAccess, DataAccessError};
use dbrowse_core::operation::{guarded, CancellationToken, Operation};
use ratatui::layout::Rect;
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::Frame;

use crate::context::AppContext;
use crate::event::Completion;
use crate::navigation::ViewMode;
use crate::screen::{typed_char, Effect, ExportSource, Handoff, Reaction, Screen};
use crate::task::Task;
use crate::widgets::{busy_line, dim_line, error_line, highlight, panel};

const HELP: &[(&str, &str)] = &[
    ("Tab", "next field"),
    ("Left/Right", "change option"),
    ("Space", "toggle overwrite"),
    ("Enter", "export"),
    ("Esc", "cancel / back"),
];

/// Upper bound on rows pulled when exporting a whole table.
pub const EXPORT_ROW_LIMIT: u32 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum ExportField {
    #[default]
    Filename,
    Format,
    Delimiter,
    Overwrite,
}

impl ExportField {
    const ORDER: [Self; 4] = [Self::Filename, Self::Format, Self::Delimiter, Self::Overwrite];

    fn step(self, forward: bool) -> Self {
        let index = Self::ORDER.iter().position(|field| *field == self).unwrap_or(0);
        let len = Self::ORDER.len();
        let next = if forward { index + 1 } else { index + len - 1 };
        Self::ORDER[next % len]
    }
}

fn cycle<T: Copy + PartialEq>(all: &[T], current: T, forward: bool) -> T {
    let index = all.iter().position(|item| *item == current).unwrap_or(0);
    let next = if forward {
        index + 1
    } else {
        index + all.len() - 1
    };
    all[next % all.len()]
}

/// Form for writing rows to a CSV or JSON file.
#[derive(Debug, Default)]
pub struct ExportView {
    source: Option<ExportSource>,
    filename: String,
    format: ExportFormat,
    delimiter: CsvDelimiter,
    overwrite: bool,
    focus: ExportField,
    /// Existing file waiting for a y/n before it is replaced.
    confirm: Option<PathBuf>,
    operation: Operation,
    error: Option<String>,
}

impl ExportView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn submit(&mut self, ctx: &AppContext) -> Reaction {
        if self.source.is_none() {
            return Reaction::status("Nothing to export");
        }
        match resolve_export_path(&self.filename, self.format, self.overwrite) {
            Ok(resolved) if resolved.will_overwrite => {
                self.confirm = Some(resolved.path);
                Reaction::none()
            }
            Ok(resolved) => self.start(resolved.path, ctx),
            Err(error) => {
                self.error = Some(error.to_string());
                Reaction::none()
            }
        }
    }

    fn start(&mut self, path: PathBuf, ctx: &AppContext) -> Reaction {
        let Some(source) = self.source.clone() else {
            return Reaction::none();
        };
        let data = match (&source, ctx.data()) {
            (ExportSource::Table { .. }, None) => {
                return Reaction::effect(Effect::Switch(ViewMode::Connection));
            }
            (_, data) => data,
        };
        let Some(token) = self.operation.start(ctx.initial_timeout()) else {
            return Reaction::status("An export is already running");
        };
        self.error = None;
        tracing::info!(path = %path.display(), format = self.format.label(), "exporting rows");
        Reaction::task(export_task(
            token,
            ExportJob {
                source,
                data,
                path,
                format: self.format,
                delimiter: self.delimiter,
            },
        ))
    }

    fn handle_field_key(&mut self, key: KeyEvent) {
        let option_key = matches!(key.code, KeyCode::Left | KeyCode::Right | KeyCode::Char(' '));
        let forward = key.code != KeyCode::Left;
        match self.focus {
            ExportField::Filename => match key.code {
                KeyCode::Backspace => {
                    self.filename.pop();
                }
                _ => {
                    if let Some(c) = typed_char(&key) {
                        self.filename.push(c);
                    }
                }
            },
            ExportField::Format if option_key => {
                self.format = cycle(&ExportFormat::ALL, self.format, forward);
            }
            ExportField::Delimiter if option_key => {
                self.delimiter = cycle(&CsvDelimiter::ALL, self.delimiter, forward);
            }
            ExportField::Overwrite if option_key => self.overwrite = !self.overwrite,
            ExportField::Format | ExportField::Delimiter | ExportField::Overwrite => {}
        }
    }

    fn field_line(&self, field: ExportField, label: &str, value: String) -> Line<'static> {
        let text = format!("{label:<10} {value}");
        if self.focus == field {
            Line::from(Span::styled(format!("> {text}"), highlight()))
        } else {
            Line::from(format!("  {text}"))
        }
    }
}

struct ExportJob {
    source: ExportSource,
    data: Option<Arc<dyn DataAccess>>,
    path: PathBuf,
    format: ExportFormat,
    delimiter: CsvDelimiter,
}

async fn write_export(job: ExportJob) -> Result<usize, DataAccessError> {
    let ExportJob {
        source,
        data,
        path,
        format,
        delimiter,
    } = job;
    let (headers, rows) = match source {
        ExportSource::Rows { headers, rows, .. } => (headers, rows),
        ExportSource::Table {
            schema,
            table,
            filter,
        } => {
            let data = data.ok_or(DataAccessError::NotConnected)?;
            let result = data
                .get_rows(&schema, &table, &filter, EXPORT_ROW_LIMIT, 0)
                .await?;
            (result.columns, result.rows)
        }
    };

    tokio::task::spawn_blocking(move || export_rows(&path, format, delimiter, &headers, &rows))
        .await
        .map_err(|error| DataAccessError::backend(error.to_string()))?
        .map_err(|error| DataAccessError::backend(error.to_string()))
}

fn export_task(token: CancellationToken, job: ExportJob) -> Task {
    let path = job.path.clone();
    let fallback = Completion::ExportFinished {
        path: path.clone(),
        result: Err("export task panicked".to_string()),
    };
    Task::new(
        async move {
            let outcome = guarded(token, write_export(job)).await;
            Completion::ExportFinished {
                path,
                result: outcome.into_result().map_err(|error| error.to_string()),
            }
        },
        fallback,
    )
}

impl Screen for ExportView {
    fn mode(&self) -> ViewMode {
        ViewMode::Export
    }

    fn handle_key(&mut self, key: KeyEvent, ctx: &mut AppContext) -> Reaction {
        if let Some(path) = self.confirm.take() {
            return if key.code == KeyCode::Char('y') {
                self.start(path, ctx)
            } else {
                Reaction::none()
            };
        }

        match key.code {
            KeyCode::Esc if self.operation.is_busy() => {
                self.operation.cancel();
                Reaction::none()
            }
            KeyCode::Esc => Reaction::effect(Effect::Pop {
                fallback: ViewMode::Browser,
            }),
            KeyCode::Tab => {
                self.focus = self.focus.step(true);
                Reaction::none()
            }
            KeyCode::BackTab => {
                self.focus = self.focus.step(false);
                Reaction::none()
            }
            KeyCode::Enter if self.operation.is_busy() => Reaction::none(),
            KeyCode::Enter => self.submit(ctx),
            _ => {
                self.handle_field_key(key);
                Reaction::none()
            }
        }
    }

    fn handle_completion(&mut self, completion: Completion, _ctx: &mut AppContext) -> Reaction {
        let Completion::ExportFinished { path, result } = completion else {
            return Reaction::none();
        };
        self.operation.finish();
        match result {
            Ok(rows) => {
                tracing::info!(rows, path = %path.display(), "export finished");
                Reaction::effect(Effect::Status(format!(
                    "Exported {rows} rows to {}",
                    path.display()
                )))
                .with_effect(Effect::Pop {
                    fallback: ViewMode::Browser,
                })
            }
            Err(message) => {
                tracing::warn!(error = %message, path = %path.display(), "export failed");
                self.error = Some(message);
                Reaction::none()
            }
        }
    }

    fn accept(&mut self, handoff: Handoff, _ctx: &mut AppContext) -> Reaction {
        if let Handoff::Export(source) = handoff {
            self.filename = source.name().to_string();
            self.source = Some(source);
            self.focus = ExportField::Filename;
            self.confirm = None;
            self.error = None;
        }
        Reaction::none()
    }

    fn render(&self, frame: &mut Frame<'_>, area: Rect, _ctx: &AppContext) {
        let what = match &self.source {
            Some(ExportSource::Rows { rows, .. }) => format!("{} rows from the result", rows.len()),
            Some(ExportSource::Table { schema, table, .. }) => {
                format!("{schema}.{table} (up to {EXPORT_ROW_LIMIT} rows)")
            }
            None => "nothing selected".to_string(),
        };
        let delimiter = if self.format == ExportFormat::Csv {
            self.delimiter.label().to_string()
        } else {
            "n/a".to_string()
        };
        let overwrite = if self.overwrite { "yes" } else { "no" };

        let mut lines = vec![
            dim_line(format!("Exporting {what}")),
            Line::from(""),
            self.field_line(ExportField::Filename, "File", self.filename.clone()),
            self.field_line(ExportField::Format, "Format", self.format.label().to_string()),
            self.field_line(ExportField::Delimiter, "Delimiter", delimiter),
            self.field_line(ExportField::Overwrite, "Overwrite", overwrite.to_string()),
            Line::from(""),
        ];
        if let Some(path) = &self.confirm {
            lines.push(Line::from(Span::styled(
                format!("{} exists. Replace it? (y/n)", path.display()),
                highlight(),
            )));
        }
        if let Some(line) = busy_line(self.operation.state(), "Exporting") {
            lines.push(line);
        }
        if let Some(error) = &self.error {
            lines.push(error_line(error));
        }
        frame.render_widget(Paragraph::new(lines).block(panel("Export")), area);
    }

    fn captures_text(&self) -> bool {
        self.focus == ExportField::Filename
    }

    fn claims_key(&self, key: &KeyEvent) -> bool {
        matches!(key.code, KeyCode::Tab | KeyCode::BackTab)
    }

    fn help(&self) -> &'static [(&'static str, &'static str)] {
        HELP
    }
}
