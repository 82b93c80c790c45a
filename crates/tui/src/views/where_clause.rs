use crossterm::event::{KeyCode, KeyEvent};
use dbrowse_core::filter::{FilterOperator, RowFilter, WhereCondition};
use ratatui::layout::Rect;
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::Frame;

use super::{list_step, step_selection};
use crate::context::AppContext;
use crate::navigation::ViewMode;
use crate::screen::{typed_char, Effect, Handoff, Reaction, Screen};
use crate::widgets::{dim_line, error_line, highlight, list_line, panel};

const HELP: &[(&str, &str)] = &[
    ("a", "add condition"),
    ("e", "edit"),
    ("d", "delete"),
    ("C", "clear all"),
    ("Enter", "apply"),
    ("Esc", "back"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum FormFocus {
    #[default]
    Column,
    Operator,
    Value,
}

impl FormFocus {
    fn next(self) -> Self {
        match self {
            Self::Column => Self::Operator,
            Self::Operator => Self::Value,
            Self::Value => Self::Column,
        }
    }

    fn previous(self) -> Self {
        match self {
            Self::Column => Self::Value,
            Self::Operator => Self::Column,
            Self::Value => Self::Operator,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct ConditionForm {
    /// Index of the condition being replaced; `None` appends.
    editing: Option<usize>,
    column: usize,
    operator: FilterOperator,
    value: String,
    focus: FormFocus,
}

impl ConditionForm {
    fn condition(&self, columns: &[String]) -> WhereCondition {
        let column = columns.get(self.column).cloned().unwrap_or_default();
        WhereCondition::new(column, self.operator, self.value.trim())
    }
}

/// Builds the row filter applied to the table shown in results.
#[derive(Debug, Default)]
pub struct WhereView {
    columns: Vec<String>,
    conditions: Vec<WhereCondition>,
    selected: usize,
    form: Option<ConditionForm>,
    error: Option<String>,
}

impl WhereView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn open_form(&mut self, editing: Option<usize>) {
        let form = match editing.and_then(|index| self.conditions.get(index)) {
            Some(condition) => ConditionForm {
                editing,
                column: self
                    .columns
                    .iter()
                    .position(|column| *column == condition.column)
                    .unwrap_or(0),
                operator: condition.operator,
                value: condition.value.clone(),
                focus: FormFocus::Value,
            },
            None => ConditionForm::default(),
        };
        self.error = None;
        self.form = Some(form);
    }

    fn handle_form_key(&mut self, key: KeyEvent) {
        let Some(form) = self.form.as_mut() else {
            return;
        };
        match (form.focus, key.code) {
            (_, KeyCode::Esc) => {
                self.form = None;
                self.error = None;
            }
            (_, KeyCode::Tab) => form.focus = form.focus.next(),
            (_, KeyCode::BackTab) => form.focus = form.focus.previous(),
            (_, KeyCode::Enter) => self.save_form(),
            (FormFocus::Column, KeyCode::Right) if !self.columns.is_empty() => {
                form.column = (form.column + 1) % self.columns.len();
            }
            (FormFocus::Column, KeyCode::Left) if !self.columns.is_empty() => {
                form.column = (form.column + self.columns.len() - 1) % self.columns.len();
            }
            (FormFocus::Operator, KeyCode::Right) => form.operator = form.operator.next(),
            (FormFocus::Operator, KeyCode::Left) => form.operator = form.operator.previous(),
            (FormFocus::Value, KeyCode::Backspace) => {
                form.value.pop();
            }
            (FormFocus::Value, _) => {
                if let Some(c) = typed_char(&key) {
                    form.value.push(c);
                }
            }
            _ => {}
        }
    }

    fn save_form(&mut self) {
        let Some(form) = self.form.as_ref() else {
            return;
        };
        let condition = form.condition(&self.columns);
        if let Err(error) = condition.validate() {
            self.error = Some(error.to_string());
            return;
        }
        match form.editing {
            Some(index) if index < self.conditions.len() => self.conditions[index] = condition,
            _ => {
                self.conditions.push(condition);
                self.selected = self.conditions.len() - 1;
            }
        }
        self.form = None;
        self.error = None;
    }

    fn render_form(&self, form: &ConditionForm) -> Vec<Line<'static>> {
        let column = self
            .columns
            .get(form.column)
            .cloned()
            .unwrap_or_default();
        let value = if form.operator.takes_value() {
            form.value.clone()
        } else {
            "(no value)".to_string()
        };
        [
            (FormFocus::Column, "Column", format!("< {column} >")),
            (FormFocus::Operator, "Operator", format!("< {} >", form.operator.symbol())),
            (FormFocus::Value, "Value", value),
        ]
        .into_iter()
        .map(|(focus, label, value)| {
            let text = format!("{label:<9} {value}");
            if form.focus == focus {
                Line::from(Span::styled(format!("> {text}"), highlight()))
            } else {
                Line::from(format!("  {text}"))
            }
        })
        .collect()
    }
}

impl Screen for WhereView {
    fn mode(&self) -> ViewMode {
        ViewMode::Where
    }

    fn handle_key(&mut self, key: KeyEvent, _ctx: &mut AppContext) -> Reaction {
        if self.form.is_some() {
            self.handle_form_key(key);
            return Reaction::none();
        }
        if let Some(step) = list_step(&key) {
            self.selected = step_selection(self.selected, self.conditions.len(), step);
            return Reaction::none();
        }

        match key.code {
            KeyCode::Esc => Reaction::effect(Effect::Pop {
                fallback: ViewMode::Results,
            }),
            KeyCode::Enter => {
                let filter = RowFilter {
                    conditions: self.conditions.clone(),
                };
                Reaction::effect(Effect::Handoff(
                    ViewMode::Results,
                    Handoff::ApplyFilter(filter),
                ))
                .with_effect(Effect::Pop {
                    fallback: ViewMode::Results,
                })
            }
            KeyCode::Char('a') if !self.columns.is_empty() => {
                self.open_form(None);
                Reaction::none()
            }
            KeyCode::Char('e') if self.selected < self.conditions.len() => {
                self.open_form(Some(self.selected));
                Reaction::none()
            }
            KeyCode::Char('d') if self.selected < self.conditions.len() => {
                self.conditions.remove(self.selected);
                self.selected = self.selected.min(self.conditions.len().saturating_sub(1));
                Reaction::none()
            }
            KeyCode::Char('C') => {
                self.conditions.clear();
                self.selected = 0;
                Reaction::none()
            }
            _ => Reaction::none(),
        }
    }

    fn accept(&mut self, handoff: Handoff, _ctx: &mut AppContext) -> Reaction {
        if let Handoff::EditFilter { columns, filter } = handoff {
            self.columns = columns;
            self.conditions = filter.conditions;
            self.selected = 0;
            self.form = None;
            self.error = None;
        }
        Reaction::none()
    }

    fn render(&self, frame: &mut Frame<'_>, area: Rect, _ctx: &AppContext) {
        let mut lines = Vec::new();
        if self.conditions.is_empty() {
            lines.push(dim_line("No conditions; rows are unfiltered"));
        }
        for (index, condition) in self.conditions.iter().enumerate() {
            let prefix = if index == 0 { "WHERE" } else { "AND" };
            lines.push(list_line(
                format!("{prefix} {}", condition.describe()),
                index == self.selected && self.form.is_none(),
            ));
        }
        if let Some(form) = &self.form {
            lines.push(Line::from(""));
            lines.extend(self.render_form(form));
        }
        if let Some(error) = &self.error {
            lines.push(error_line(error));
        }
        frame.render_widget(Paragraph::new(lines).block(panel("Filter rows")), area);
    }

    fn captures_text(&self) -> bool {
        self.form.is_some()
    }

    fn claims_key(&self, key: &KeyEvent) -> bool {
        self.form.is_some() && matches!(key.code, KeyCode::Tab | KeyCode::BackTab)
    }

    fn help(&self) -> &'static [(&'static str, &'static str)] {
        HELP
    }
}
