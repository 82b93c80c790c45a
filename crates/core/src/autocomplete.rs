//! Suggestion state for one SQL editor: debounced refreshes, filtering,
//! selection and acceptance.

use std::time::Duration;

use crate::catalog::MetadataKey;
use crate::sql_context::{
    before_cursor, completion_prefix, parse, trailing_token, ContextKind, SqlContext,
};
use crate::suggestions::{filter_candidates, load_candidates, MetadataSource, Suggestion};

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

/// Captured editor state for one keystroke. Applied only while `seq` is
/// still the controller's current sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebounceTicket {
    pub seq: u64,
    pub text: String,
    pub cursor: usize,
}

/// Editor text and cursor after a suggestion was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Acceptance {
    pub text: String,
    pub cursor: usize,
}

#[derive(Debug, Default)]
pub struct AutocompleteController {
    seq: u64,
    last_text: String,
    cursor: usize,
    context: Option<SqlContext>,
    visible: Vec<Suggestion>,
    selected: usize,
    shown: bool,
}

impl AutocompleteController {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    #[must_use]
    pub fn last_text(&self) -> &str {
        &self.last_text
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn context(&self) -> Option<&SqlContext> {
        self.context.as_ref()
    }

    #[must_use]
    pub fn is_visible(&self) -> bool {
        self.shown
    }

    #[must_use]
    pub fn suggestions(&self) -> &[Suggestion] {
        &self.visible
    }

    #[must_use]
    pub fn selected_index(&self) -> usize {
        self.selected
    }

    #[must_use]
    pub fn selected(&self) -> Option<&Suggestion> {
        self.visible.get(self.selected)
    }

    /// Records a keystroke and issues the ticket to fire after
    /// [`DEBOUNCE_WINDOW`].
    pub fn on_edit(&mut self, text: &str, cursor: usize) -> DebounceTicket {
        self.seq += 1;
        self.last_text = text.to_string();
        self.cursor = cursor;
        DebounceTicket {
            seq: self.seq,
            text: self.last_text.clone(),
            cursor,
        }
    }

    #[must_use]
    pub fn is_current(&self, seq: u64) -> bool {
        seq == self.seq
    }

    /// Refreshes from a fired ticket. Returns `None` when the ticket is
    /// stale, else the metadata the refresh could not find locally.
    pub fn apply(
        &mut self,
        ticket: &DebounceTicket,
        source: &dyn MetadataSource,
    ) -> Option<Vec<MetadataKey>> {
        if !self.is_current(ticket.seq) {
            tracing::trace!(
                ticket = ticket.seq,
                current = self.seq,
                "discarding stale autocomplete ticket"
            );
            return None;
        }
        self.last_text.clone_from(&ticket.text);
        self.cursor = ticket.cursor;
        Some(self.refresh(source))
    }

    /// Re-runs the refresh for `seq` once missing metadata has arrived.
    pub fn rerun(&mut self, seq: u64, source: &dyn MetadataSource) -> Option<Vec<MetadataKey>> {
        self.is_current(seq).then(|| self.refresh(source))
    }

    /// Manual trigger: refreshes right away at `cursor`, skipping the
    /// debounce window.
    pub fn trigger(
        &mut self,
        text: &str,
        cursor: usize,
        source: &dyn MetadataSource,
    ) -> Vec<MetadataKey> {
        self.last_text = text.to_string();
        self.cursor = cursor;
        self.refresh(source)
    }

    pub fn hide(&mut self) {
        self.shown = false;
        self.visible.clear();
        self.selected = 0;
    }

    pub fn select_next(&mut self) {
        if self.visible.is_empty() {
            return;
        }
        self.selected = (self.selected + 1) % self.visible.len();
    }

    pub fn select_previous(&mut self) {
        if self.visible.is_empty() {
            return;
        }
        self.selected = self
            .selected
            .checked_sub(1)
            .unwrap_or(self.visible.len() - 1);
    }

    /// Inserts the selected suggestion into the last known text. The
    /// controller is resynchronized to the result and every ticket issued
    /// so far becomes stale.
    pub fn accept(&mut self) -> Option<Acceptance> {
        if !self.shown {
            return None;
        }
        let suggestion = self.selected()?.clone();
        let accepted = apply_suggestion(&self.last_text, self.cursor, &suggestion.apply);

        self.last_text.clone_from(&accepted.text);
        self.cursor = accepted.cursor;
        self.seq += 1;
        self.hide();
        Some(accepted)
    }

    fn refresh(&mut self, source: &dyn MetadataSource) -> Vec<MetadataKey> {
        if self.cursor == 0 {
            self.context = None;
            self.hide();
            return Vec::new();
        }

        let context = parse(&self.last_text, self.cursor);
        let candidates = load_candidates(&context, source);
        let prefix = completion_prefix(before_cursor(&self.last_text, self.cursor));

        self.visible = filter_candidates(&candidates.items, prefix);
        self.shown =
            !self.visible.is_empty() && (!prefix.is_empty() || context.kind != ContextKind::Keyword);
        if !self.shown {
            self.visible.clear();
        }
        self.selected = self.selected.min(self.visible.len().saturating_sub(1));
        self.context = Some(context);
        candidates.missing
    }
}

/// Replaces the in-progress token before `cursor` with `apply`.
///
/// An unqualified `apply` keeps a qualified token's prefix up to its last
/// dot. With no token in progress the text is inserted at the cursor.
#[must_use]
pub fn apply_suggestion(text: &str, cursor: usize, apply: &str) -> Acceptance {
    let before = before_cursor(text, cursor);
    let after = &text[before.len()..];

    let start = match trailing_token(before) {
        None => before.len(),
        Some(token) => {
            let token_start = before.len() - token.len();
            match token.rfind('.') {
                Some(dot) if !apply.contains('.') => token_start + dot + 1,
                _ => token_start,
            }
        }
    };

    let mut updated = String::with_capacity(text.len() + apply.len());
    updated.push_str(&before[..start]);
    updated.push_str(apply);
    updated.push_str(after);
    Acceptance {
        text: updated,
        cursor: start + apply.len(),
    }
}
