use crossterm::event::{KeyCode, KeyEvent};
use ratatui::layout::Rect;
use ratatui::widgets::Paragraph;
use ratatui::Frame;

use super::{list_step, step_selection};
use crate::context::AppContext;
use crate::navigation::ViewMode;
use crate::screen::{Effect, Handoff, Reaction, Screen};
use crate::widgets::{error_line, list_line, panel, visible_window};

const HELP: &[(&str, &str)] = &[
    ("Space", "toggle"),
    ("a/n", "all / none"),
    ("Enter", "apply"),
    ("Esc", "back"),
];

#[derive(Debug, Default)]
pub struct ColumnsView {
    columns: Vec<String>,
    visible: Vec<bool>,
    selected: usize,
    error: Option<String>,
}

impl ColumnsView {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn set_all(&mut self, visible: bool) {
        self.visible.iter_mut().for_each(|flag| *flag = visible);
    }
}

impl Screen for ColumnsView {
    fn mode(&self) -> ViewMode {
        ViewMode::Columns
    }

    fn handle_key(&mut self, key: KeyEvent, _ctx: &mut AppContext) -> Reaction {
        if let Some(step) = list_step(&key) {
            self.selected = step_selection(self.selected, self.columns.len(), step);
            return Reaction::none();
        }
        self.error = None;

        match key.code {
            KeyCode::Esc => Reaction::effect(Effect::Pop {
                fallback: ViewMode::Results,
            }),
            KeyCode::Char(' ') => {
                if let Some(flag) = self.visible.get_mut(self.selected) {
                    *flag = !*flag;
                }
                Reaction::none()
            }
            KeyCode::Char('a') => {
                self.set_all(true);
                Reaction::none()
            }
            KeyCode::Char('n') => {
                self.set_all(false);
                Reaction::none()
            }
            KeyCode::Enter if !self.visible.contains(&true) => {
                self.error = Some("Keep at least one column visible".to_string());
                Reaction::none()
            }
            KeyCode::Enter => Reaction::effect(Effect::Handoff(
                ViewMode::Results,
                Handoff::ApplyColumns(self.visible.clone()),
            ))
            .with_effect(Effect::Pop {
                fallback: ViewMode::Results,
            }),
            _ => Reaction::none(),
        }
    }

    fn accept(&mut self, handoff: Handoff, _ctx: &mut AppContext) -> Reaction {
        if let Handoff::ChooseColumns { columns, visible } = handoff {
            self.visible = (0..columns.len())
                .map(|index| visible.get(index).copied().unwrap_or(true))
                .collect();
            self.columns = columns;
            self.selected = 0;
            self.error = None;
        }
        Reaction::none()
    }

    fn render(&self, frame: &mut Frame<'_>, area: Rect, _ctx: &AppContext) {
        let height = usize::from(area.height.saturating_sub(3));
        let mut lines = visible_window(self.selected, self.columns.len(), height)
            .map(|index| {
                let mark = if self.visible[index] { "[x]" } else { "[ ]" };
                list_line(
                    format!("{mark} {}", self.columns[index]),
                    index == self.selected,
                )
            })
            .collect::<Vec<_>>();
        if let Some(error) = &self.error {
            lines.push(error_line(error));
        }
        frame.render_widget(Paragraph::new(lines).block(panel("Columns")), area);
    }

    fn help(&self) -> &'static [(&'static str, &'static str)] {
        HELP
    }
}

#[cfg(test)]
mod tests {
    use crossterm::event::KeyCode;

    use super::ColumnsView;
    use crate::event::Completion;
    use crate::navigation::ViewMode;
    use crate::screen::{Effect, Handoff, Screen};
    use crate::testing::{chr, context, key};

    fn choosing(ctx: &mut crate::context::AppContext) -> ColumnsView {
        let mut view = ColumnsView::new();
        let _ = view.accept(
            Handoff::ChooseColumns {
                columns: vec!["id".to_string(), "email".to_string(), "name".to_string()],
                visible: vec![true, false],
            },
            ctx,
        );
        view
    }

    #[test]
    fn toggled_columns_are_handed_back() {
        let (mut ctx, _dir) = context();
        let mut view = choosing(&mut ctx);
        assert_eq!(view.visible, [true, false, true]);

        let _ = view.handle_key(chr(' '), &mut ctx);
        let _ = view.handle_key(key(KeyCode::Down), &mut ctx);
        let _ = view.handle_key(chr(' '), &mut ctx);

        let reaction = view.handle_key(key(KeyCode::Enter), &mut ctx);
        assert_eq!(
            reaction.effects,
            [
                Effect::Handoff(ViewMode::Results, Handoff::ApplyColumns(vec![false, true, true])),
                Effect::Pop {
                    fallback: ViewMode::Results
                },
            ]
        );
    }

    #[test]
    fn at_least_one_column_stays_visible() {
        let (mut ctx, _dir) = context();
        let mut view = choosing(&mut ctx);

        let _ = view.handle_key(chr('n'), &mut ctx);
        assert!(view.handle_key(key(KeyCode::Enter), &mut ctx).is_empty());
        assert!(view.error.is_some());

        let _ = view.handle_key(chr('a'), &mut ctx);
        assert_eq!(view.handle_key(key(KeyCode::Enter), &mut ctx).effects.len(), 2);
    }

    #[test]
    fn background_completions_leave_the_checklist_alone() {
        let (mut ctx, _dir) = context();
        let mut view = choosing(&mut ctx);

        let reaction = view.handle_completion(Completion::StatusExpired(1), &mut ctx);
        assert!(reaction.is_empty());
        assert_eq!(view.visible, [true, false, true]);
    }
}
