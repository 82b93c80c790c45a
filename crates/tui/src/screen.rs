use crossterm::event::{KeyCode, KeyEvent, KeyModifiers, MouseEvent};
use dbrowse_core::data_access::QueryResult;
use dbrowse_core::filter::RowFilter;
use dbrowse_core::retry::PromptKey;
use ratatui::layout::Rect;
use ratatui::Frame;

use crate::context::AppContext;
use crate::event::Completion;
use crate::navigation::ViewMode;
use crate::task::Task;

/// What an export writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportSource {
    /// Rows already on screen.
    Rows {
        name: String,
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    /// A table read in full (up to the export row limit) when written.
    Table {
        schema: String,
        table: String,
        filter: RowFilter,
    },
}

impl ExportSource {
    /// Suggested file stem.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Rows { name, .. } => name,
            Self::Table { table, .. } => table,
        }
    }
}

/// Data passed from one view to another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handoff {
    QueryResult { sql: String, result: QueryResult },
    OpenTable { schema: String, table: String },
    EditorText(String),
    Export(ExportSource),
    EditFilter { columns: Vec<String>, filter: RowFilter },
    ApplyFilter(RowFilter),
    ChooseColumns { columns: Vec<String>, visible: Vec<bool> },
    ApplyColumns(Vec<bool>),
}

/// Cross-view request applied by the controller, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Push(ViewMode),
    /// Back to the previous view, or `fallback` when there is none.
    Pop { fallback: ViewMode },
    /// Jump to a view and forget the navigation history.
    Switch(ViewMode),
    Handoff(ViewMode, Handoff),
    Status(String),
    Fatal(String),
    Quit,
}

/// Everything a view asks for in response to one event.
#[derive(Debug, Default)]
pub struct Reaction {
    pub tasks: Vec<Task>,
    pub effects: Vec<Effect>,
}

impl Reaction {
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn task(task: Task) -> Self {
        Self::none().with_task(task)
    }

    #[must_use]
    pub fn effect(effect: Effect) -> Self {
        Self::none().with_effect(effect)
    }

    #[must_use]
    pub fn status(message: impl Into<String>) -> Self {
        Self::effect(Effect::Status(message.into()))
    }

    #[must_use]
    pub fn with_task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    #[must_use]
    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn merge(&mut self, other: Self) {
        self.tasks.extend(other.tasks);
        self.effects.extend(other.effects);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty() && self.effects.is_empty()
    }
}

/// One screen registered with the controller.
pub trait Screen {
    fn mode(&self) -> ViewMode;

    fn handle_key(&mut self, key: KeyEvent, ctx: &mut AppContext) -> Reaction;

    fn handle_mouse(&mut self, _mouse: MouseEvent, _ctx: &mut AppContext) -> Reaction {
        Reaction::none()
    }

    fn handle_completion(&mut self, _completion: Completion, _ctx: &mut AppContext) -> Reaction {
        Reaction::none()
    }

    fn accept(&mut self, _handoff: Handoff, _ctx: &mut AppContext) -> Reaction {
        Reaction::none()
    }

    /// Called each time the view becomes active.
    fn on_enter(&mut self, _ctx: &mut AppContext) -> Reaction {
        Reaction::none()
    }

    fn render(&self, frame: &mut Frame<'_>, area: Rect, ctx: &AppContext);

    /// True while typed characters belong to the view (help stays off `?`).
    fn captures_text(&self) -> bool {
        false
    }

    /// True while a retry prompt is waiting for its answer.
    fn retry_prompt_active(&self) -> bool {
        false
    }

    /// True when the view wants a key the controller would otherwise
    /// intercept, such as Tab.
    fn claims_key(&self, _key: &KeyEvent) -> bool {
        false
    }

    /// Key bindings shown in the footer and the help popup.
    fn help(&self) -> &'static [(&'static str, &'static str)] {
        &[]
    }
}

/// How a retry prompt sees a key press.
#[must_use]
pub fn prompt_key(key: &KeyEvent) -> PromptKey {
    match key.code {
        KeyCode::Esc => PromptKey::Escape,
        KeyCode::Char(c) if !key.modifiers.contains(KeyModifiers::CONTROL) => PromptKey::Char(c),
        _ => PromptKey::Other,
    }
}

/// Plain character input without Ctrl or Alt.
#[must_use]
pub fn typed_char(key: &KeyEvent) -> Option<char> {
    match key.code {
        KeyCode::Char(c)
            if !key
                .modifiers
                .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT) =>
        {
            Some(c)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
    use dbrowse_core::retry::PromptKey;

    use super::{prompt_key, typed_char, Effect, Reaction};
    use crate::navigation::ViewMode;

    #[test]
    fn prompt_keys_map_digits_escape_and_control_chords() {
        let digit = KeyEvent::new(KeyCode::Char('2'), KeyModifiers::NONE);
        let escape = KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE);
        let chord = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(prompt_key(&digit), PromptKey::Char('2'));
        assert_eq!(prompt_key(&escape), PromptKey::Escape);
        assert_eq!(prompt_key(&chord), PromptKey::Other);
    }

    #[test]
    fn shifted_characters_still_count_as_typing() {
        let upper = KeyEvent::new(KeyCode::Char('D'), KeyModifiers::SHIFT);
        let alt = KeyEvent::new(KeyCode::Char('d'), KeyModifiers::ALT);
        assert_eq!(typed_char(&upper), Some('D'));
        assert_eq!(typed_char(&alt), None);
    }

    #[test]
    fn reactions_merge_in_order() {
        let mut reaction = Reaction::effect(Effect::Push(ViewMode::Results));
        reaction.merge(Reaction::status("done"));
        assert_eq!(
            reaction.effects,
            [
                Effect::Push(ViewMode::Results),
                Effect::Status("done".to_string())
            ]
        );
        assert!(!reaction.is_empty());
    }
}
