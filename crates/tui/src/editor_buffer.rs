/// Multi-line text with a byte-offset cursor that always sits on a
/// character boundary.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditorBuffer {
    text: String,
    cursor: usize,
}

impl EditorBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Replaces the text; the cursor is clamped back onto a boundary.
    pub fn set(&mut self, text: impl Into<String>, cursor: usize) {
        self.text = text.into();
        self.cursor = floor_boundary(&self.text, cursor);
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.cursor = 0;
    }

    pub fn insert_char(&mut self, c: char) {
        self.text.insert(self.cursor, c);
        self.cursor += c.len_utf8();
    }

    /// Deletes the character before the cursor.
    pub fn backspace(&mut self) -> bool {
        let Some(previous) = self.text[..self.cursor].chars().next_back() else {
            return false;
        };
        self.cursor -= previous.len_utf8();
        self.text.remove(self.cursor);
        true
    }

    /// Deletes the character under the cursor.
    pub fn delete(&mut self) -> bool {
        if self.cursor >= self.text.len() {
            return false;
        }
        self.text.remove(self.cursor);
        true
    }

    pub fn move_left(&mut self) {
        if let Some(previous) = self.text[..self.cursor].chars().next_back() {
            self.cursor -= previous.len_utf8();
        }
    }

    pub fn move_right(&mut self) {
        if let Some(next) = self.text[self.cursor..].chars().next() {
            self.cursor += next.len_utf8();
        }
    }

    pub fn move_home(&mut self) {
        self.cursor = self.line_start();
    }

    pub fn move_end(&mut self) {
        self.cursor = self.text[self.cursor..]
            .find('\n')
            .map_or(self.text.len(), |offset| self.cursor + offset);
    }

    pub fn move_up(&mut self) {
        let start = self.line_start();
        if start == 0 {
            self.cursor = 0;
            return;
        }
        let column = self.text[start..self.cursor].chars().count();
        let previous_start = self.text[..start - 1].rfind('\n').map_or(0, |at| at + 1);
        self.cursor = advance(&self.text, previous_start, start - 1, column);
    }

    pub fn move_down(&mut self) {
        let Some(offset) = self.text[self.cursor..].find('\n') else {
            self.cursor = self.text.len();
            return;
        };
        let column = self.text[self.line_start()..self.cursor].chars().count();
        let next_start = self.cursor + offset + 1;
        let next_end = self.text[next_start..]
            .find('\n')
            .map_or(self.text.len(), |at| next_start + at);
        self.cursor = advance(&self.text, next_start, next_end, column);
    }

    /// Zero-based (line, column) of the cursor, columns in characters.
    #[must_use]
    pub fn position(&self) -> (usize, usize) {
        let before = &self.text[..self.cursor];
        let line = before.matches('\n').count();
        let column = before[self.line_start()..].chars().count();
        (line, column)
    }

    #[must_use]
    pub fn line_count(&self) -> usize {
        self.text.split('\n').count()
    }

    fn line_start(&self) -> usize {
        self.text[..self.cursor].rfind('\n').map_or(0, |at| at + 1)
    }
}

/// Byte offset `columns` characters after `start`, stopping at `end`.
fn advance(text: &str, start: usize, end: usize, columns: usize) -> usize {
    text[start..end]
        .char_indices()
        .nth(columns)
        .map_or(end, |(offset, _)| start + offset)
}

fn floor_boundary(text: &str, cursor: usize) -> usize {
    let mut cursor = cursor.min(text.len());
    while !text.is_char_boundary(cursor) {
        cursor -= 1;
    }
    cursor
}
