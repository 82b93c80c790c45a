//! Best-effort classification of what the cursor in a SQL buffer expects
//! next. Regex based; not a SQL parser.

use std::sync::LazyLock;

use regex::Regex;

static TRAILING_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z0-9_.`]+$").expect("valid regex"));
static ENDS_WITH_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:FROM|JOIN)\s*$").expect("valid regex"));
static PARTIAL_AFTER_FROM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:FROM|JOIN)\s+\w*$").expect("valid regex"));
static FROM_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bFROM\s+(?:`?(\w+)`?\.)?`?(\w+)`?(?:\s+(?:AS\s+)?`?(\w+)`?)?")
        .expect("valid regex")
});
static JOIN_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bJOIN\s+(?:`?(\w+)`?\.)?`?(\w+)`?(?:\s+(?:AS\s+)?`?(\w+)`?)?")
        .expect("valid regex")
});
static SELECT_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bSELECT\b").expect("valid regex"));
static FROM_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bFROM\b").expect("valid regex"));
static WHERE_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bWHERE\b").expect("valid regex"));
static ON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bON\b").expect("valid regex"));

const RESERVED: [&str; 24] = [
    "SELECT", "FROM", "WHERE", "AND", "OR", "JOIN", "LEFT", "RIGHT", "INNER", "OUTER", "FULL",
    "CROSS", "NATURAL", "ON", "AS", "BY", "ORDER", "GROUP", "HAVING", "LIMIT", "OFFSET", "UNION",
    "SET", "USING",
];

const TOKEN_DELIMITERS: [char; 6] = [' ', '\n', '\t', ',', '(', ')'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Keyword,
    Schema,
    Table,
    Column,
    QualifiedColumn,
    Mixed,
}

/// A table mentioned after `FROM` or `JOIN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRef {
    pub schema: Option<String>,
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: None,
            name: name.into(),
            alias: None,
        }
    }

    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    #[must_use]
    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// True when `qualifier` names this table by alias, bare name or
    /// `schema.name`.
    #[must_use]
    pub fn answers_to(&self, qualifier: &str) -> bool {
        if self
            .alias
            .as_deref()
            .is_some_and(|alias| alias.eq_ignore_ascii_case(qualifier))
        {
            return true;
        }
        if self.name.eq_ignore_ascii_case(qualifier) {
            return true;
        }
        self.schema.as_deref().is_some_and(|schema| {
            qualifier.eq_ignore_ascii_case(&format!("{schema}.{}", self.name))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlContext {
    pub kind: ContextKind,
    /// Schema named before a dot when the dot did not resolve to a table.
    pub schema: Option<String>,
    /// Table a qualified column reference resolved to.
    pub table: Option<TableRef>,
    pub tables: Vec<TableRef>,
    pub token_before_dot: Option<String>,
}

impl SqlContext {
    fn of(kind: ContextKind, tables: Vec<TableRef>) -> Self {
        Self {
            kind,
            schema: None,
            table: None,
            tables,
            token_before_dot: None,
        }
    }
}

/// Classifies the position `cursor` (a byte offset, clamped into `text`)
/// of `text`.
#[must_use]
pub fn parse(text: &str, cursor: usize) -> SqlContext {
    let before = before_cursor(text, cursor);
    let tables = extract_tables(text);

    let token = trailing_token(before);
    if let Some(token) = token {
        if let Some(dot) = token.rfind('.') {
            let qualifier = token[..dot].trim_matches('`').to_string();
            if let Some(bound) = tables.iter().find(|table| table.answers_to(&qualifier)) {
                let table = bound.clone();
                return SqlContext {
                    kind: ContextKind::QualifiedColumn,
                    schema: table.schema.clone(),
                    table: Some(table),
                    tables,
                    token_before_dot: Some(qualifier),
                };
            }
            return SqlContext {
                kind: ContextKind::Table,
                schema: Some(qualifier.clone()),
                table: None,
                tables,
                token_before_dot: Some(qualifier),
            };
        }
    }

    if ENDS_WITH_FROM.is_match(before) {
        return SqlContext::of(ContextKind::Schema, tables);
    }
    if PARTIAL_AFTER_FROM.is_match(before) {
        return SqlContext::of(ContextKind::Table, tables);
    }

    let last_select = last_match(&SELECT_WORD, before);
    let last_from = last_match(&FROM_WORD, before);
    if let Some(select_at) = last_select {
        let from_follows_select = last_from.is_some_and(|from_at| from_at > select_at);
        let from_elsewhere = last_from.is_none() && FROM_WORD.is_match(text);
        if !tables.is_empty() && (from_follows_select || from_elsewhere) {
            return SqlContext::of(ContextKind::Column, tables);
        }
    }

    let last_where = last_match(&WHERE_WORD, before);
    let in_where = match (last_where, last_from) {
        (Some(where_at), Some(from_at)) => where_at > from_at,
        (Some(_), None) => true,
        (None, _) => false,
    };
    if !tables.is_empty() && (in_where || ON_WORD.is_match(before)) {
        return SqlContext::of(ContextKind::Mixed, tables);
    }

    if token.is_some() && !tables.is_empty() {
        let kind = if tables.len() == 1 {
            ContextKind::Column
        } else {
            ContextKind::Mixed
        };
        return SqlContext::of(kind, tables);
    }

    SqlContext::of(ContextKind::Keyword, tables)
}

/// Every `FROM`/`JOIN` table reference in `text`, in textual order.
#[must_use]
pub fn extract_tables(text: &str) -> Vec<TableRef> {
    let mut found = Vec::new();
    for pattern in [&*FROM_TABLE, &*JOIN_TABLE] {
        for captures in pattern.captures_iter(text) {
            let Some(name) = captures.get(2) else {
                continue;
            };
            if is_reserved(name.as_str()) {
                continue;
            }
            let mut table = TableRef::new(name.as_str());
            if let Some(schema) = captures.get(1) {
                table.schema = Some(schema.as_str().to_string());
            }
            if let Some(alias) = captures.get(3).filter(|alias| !is_reserved(alias.as_str())) {
                table.alias = Some(alias.as_str().to_string());
            }
            found.push((name.start(), table));
        }
    }
    found.sort_by_key(|(position, _)| *position);
    found.into_iter().map(|(_, table)| table).collect()
}

/// The identifier-like run (letters, digits, `_`, `.`, backtick) ending at
/// the end of `before`.
#[must_use]
pub fn trailing_token(before: &str) -> Option<&str> {
    TRAILING_TOKEN.find(before).map(|found| found.as_str())
}

/// Text the candidates are filtered by: the last word before the cursor,
/// reduced to the part after its last dot.
#[must_use]
pub fn completion_prefix(before: &str) -> &str {
    if before.is_empty() || before.ends_with(TOKEN_DELIMITERS) {
        return "";
    }
    let word = before
        .rsplit(TOKEN_DELIMITERS)
        .next()
        .unwrap_or(before);
    let word = word.rsplit('.').next().unwrap_or(word);
    word.trim_matches('`')
}

/// `text` up to `cursor`, with `cursor` clamped to the text and moved back
/// onto a character boundary.
#[must_use]
pub fn before_cursor(text: &str, cursor: usize) -> &str {
    let mut end = cursor.min(text.len());
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn last_match(pattern: &Regex, haystack: &str) -> Option<usize> {
    pattern.find_iter(haystack).last().map(|found| found.start())
}

fn is_reserved(word: &str) -> bool {
    RESERVED
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(word))
}
