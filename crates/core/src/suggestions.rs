use std::collections::HashSet;

use crate::catalog::MetadataKey;
use crate::data_access::ColumnDescriptor;
use crate::sql_context::{ContextKind, SqlContext, TableRef};

/// Tables past this index contribute no column candidates.
pub const MAX_COLUMN_TABLES: usize = 3;

const KEYWORDS: [&str; 76] = [
    "SELECT", "FROM", "WHERE", "JOIN", "INNER", "LEFT", "RIGHT", "OUTER", "FULL", "ON", "AND",
    "OR", "NOT", "NULL", "TRUE", "FALSE", "ORDER", "BY", "GROUP", "HAVING", "LIMIT", "OFFSET",
    "INSERT", "UPDATE", "DELETE", "CREATE", "DROP", "ALTER", "TABLE", "INDEX", "VIEW",
    "DATABASE", "SCHEMA", "INTO", "VALUES", "SET", "AS", "DISTINCT", "CASE", "WHEN", "THEN",
    "ELSE", "END", "IF", "EXISTS", "LIKE", "IN", "BETWEEN", "IS", "ASC", "DESC", "UNION", "ALL",
    "ANY", "SOME", "WITH", "RECURSIVE", "CASCADE", "CONSTRAINT", "PRIMARY", "KEY", "FOREIGN",
    "REFERENCES", "UNIQUE", "CHECK", "DEFAULT", "TRUNCATE", "EXPLAIN", "ANALYZE", "GRANT",
    "REVOKE", "COMMIT", "ROLLBACK", "TRANSACTION", "BEGIN", "START",
];

const FUNCTIONS: [(&str, &str); 8] = [
    ("COUNT", "COUNT(expr)"),
    ("SUM", "SUM(expr)"),
    ("AVG", "AVG(expr)"),
    ("MIN", "MIN(expr)"),
    ("MAX", "MAX(expr)"),
    ("COALESCE", "COALESCE(expr1, expr2)"),
    ("CAST", "CAST(expr AS type)"),
    ("CONCAT", "CONCAT(expr, ...)"),
];

const SNIPPETS: [(&str, &str, &str); 5] = [
    (
        "JOIN ... ON ...",
        "Snippet: JOIN with ON",
        "JOIN schema.table alias ON alias.column = other.column",
    ),
    (
        "LEFT JOIN ... ON ...",
        "Snippet: LEFT JOIN with ON",
        "LEFT JOIN schema.table alias ON alias.column = other.column",
    ),
    (
        "WHERE IN (...)",
        "Snippet: WHERE IN",
        "WHERE column IN (value1, value2)",
    ),
    ("GROUP BY ...", "Snippet: GROUP BY", "GROUP BY column1, column2"),
    (
        "SELECT DISTINCT ...",
        "Snippet: SELECT DISTINCT",
        "SELECT DISTINCT column FROM schema.table",
    ),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuggestionKind {
    Keyword,
    Schema,
    Table,
    Column,
    Function,
    Snippet,
    /// A table alias: names a table and qualifies its columns.
    Mixed,
}

impl SuggestionKind {
    #[must_use]
    pub fn tag(self) -> &'static str {
        match self {
            Self::Keyword => "kw",
            Self::Schema => "schema",
            Self::Table => "table",
            Self::Column => "col",
            Self::Function => "fn",
            Self::Snippet => "snip",
            Self::Mixed => "alias",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub label: String,
    pub kind: SuggestionKind,
    pub detail: String,
    /// Text inserted on acceptance.
    pub apply: String,
}

impl Suggestion {
    #[must_use]
    pub fn new(
        label: impl Into<String>,
        kind: SuggestionKind,
        detail: impl Into<String>,
        apply: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            kind,
            detail: detail.into(),
            apply: apply.into(),
        }
    }

    /// Case-insensitive prefix match on the label, or on the part after
    /// the label's last dot.
    #[must_use]
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        if prefix.is_empty() {
            return true;
        }
        let prefix = prefix.to_lowercase();
        let label = self.label.to_lowercase();
        if label.starts_with(&prefix) {
            return true;
        }
        label
            .rsplit_once('.')
            .is_some_and(|(_, last)| last.starts_with(&prefix))
    }
}

/// Schema metadata available without waiting. `None` means "not loaded".
pub trait MetadataSource {
    fn current_schema(&self) -> Option<String>;

    fn schemas(&self) -> Option<Vec<String>>;

    fn tables(&self, schema: &str) -> Option<Vec<String>>;

    fn columns(&self, schema: &str, table: &str) -> Option<Vec<ColumnDescriptor>>;
}

/// Candidate set for one context, plus the metadata that was needed but
/// not available.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidates {
    pub items: Vec<Suggestion>,
    pub missing: Vec<MetadataKey>,
}

#[must_use]
pub fn load_candidates(context: &SqlContext, source: &dyn MetadataSource) -> Candidates {
    let mut collector = Collector::new(source);

    match context.kind {
        ContextKind::Schema => {
            collector.add_schemas();
            if let Some(schema) = collector.current_schema() {
                collector.add_tables(&schema);
            }
        }
        ContextKind::Table => {
            match context.schema.clone().or_else(|| collector.current_schema()) {
                Some(schema) => collector.add_tables(&schema),
                None => collector.add_schemas(),
            }
        }
        ContextKind::QualifiedColumn => {
            if let (Some(table), Some(qualifier)) = (&context.table, &context.token_before_dot) {
                for column in collector.columns_of(table) {
                    collector.push(column_suggestion(
                        format!("{qualifier}.{}", column.name),
                        &column,
                    ));
                    collector.push(column_suggestion(column.name.clone(), &column));
                }
            }
            collector.add_functions();
        }
        ContextKind::Column => {
            if let [table] = context.tables.as_slice() {
                for column in collector.columns_of(table) {
                    collector.push(column_suggestion(column.name.clone(), &column));
                }
            } else {
                for table in context.tables.iter().take(MAX_COLUMN_TABLES) {
                    collector.add_table_names(table);
                }
            }
            collector.add_functions();
        }
        ContextKind::Mixed => {
            for table in &context.tables {
                collector.add_table_names(table);
            }
            for table in context.tables.iter().take(MAX_COLUMN_TABLES) {
                for column in collector.columns_of(table) {
                    if let Some(alias) = &table.alias {
                        collector.push(column_suggestion(
                            format!("{alias}.{}", column.name),
                            &column,
                        ));
                    }
                    collector.push(column_suggestion(
                        format!("{}.{}", table.name, column.name),
                        &column,
                    ));
                    collector.push(column_suggestion(column.name.clone(), &column));
                }
            }
            collector.add_functions();
            collector.add_snippets();
        }
        ContextKind::Keyword => {
            collector.add_keywords();
            collector.add_functions();
            collector.add_snippets();
        }
    }

    collector.finish()
}

/// Candidates whose label matches `prefix`, in corpus order.
#[must_use]
pub fn filter_candidates(items: &[Suggestion], prefix: &str) -> Vec<Suggestion> {
    items
        .iter()
        .filter(|item| item.matches_prefix(prefix))
        .cloned()
        .collect()
}

fn column_suggestion(label: String, column: &ColumnDescriptor) -> Suggestion {
    Suggestion {
        apply: label.clone(),
        label,
        kind: SuggestionKind::Column,
        detail: column.data_type.clone(),
    }
}

struct Collector<'a> {
    source: &'a dyn MetadataSource,
    items: Vec<Suggestion>,
    labels: HashSet<String>,
    missing: Vec<MetadataKey>,
}

impl<'a> Collector<'a> {
    fn new(source: &'a dyn MetadataSource) -> Self {
        Self {
            source,
            items: Vec::new(),
            labels: HashSet::new(),
            missing: Vec::new(),
        }
    }

    fn push(&mut self, suggestion: Suggestion) {
        if self.labels.insert(suggestion.label.clone()) {
            self.items.push(suggestion);
        }
    }

    fn need(&mut self, key: MetadataKey) {
        if !self.missing.contains(&key) {
            self.missing.push(key);
        }
    }

    fn current_schema(&mut self) -> Option<String> {
        let schema = self.source.current_schema();
        if schema.is_none() && self.source.schemas().is_none() {
            self.need(MetadataKey::Schemas);
        }
        schema
    }

    fn add_schemas(&mut self) {
        match self.source.schemas() {
            Some(schemas) => {
                for schema in schemas {
                    self.push(Suggestion::new(
                        schema.clone(),
                        SuggestionKind::Schema,
                        "Schema",
                        schema,
                    ));
                }
            }
            None => self.need(MetadataKey::Schemas),
        }
    }

    fn add_tables(&mut self, schema: &str) {
        match self.source.tables(schema) {
            Some(tables) => {
                for table in tables {
                    self.push(Suggestion::new(
                        table.clone(),
                        SuggestionKind::Table,
                        "Table",
                        table,
                    ));
                }
            }
            None => self.need(MetadataKey::Tables {
                schema: schema.to_string(),
            }),
        }
    }

    fn add_table_names(&mut self, table: &TableRef) {
        if let Some(alias) = &table.alias {
            self.push(Suggestion::new(
                alias.clone(),
                SuggestionKind::Mixed,
                format!("Alias for {}", table.name),
                alias.clone(),
            ));
        }
        self.push(Suggestion::new(
            table.name.clone(),
            SuggestionKind::Table,
            "Table",
            table.name.clone(),
        ));
    }

    fn columns_of(&mut self, table: &TableRef) -> Vec<ColumnDescriptor> {
        let Some(schema) = table.schema.clone().or_else(|| self.current_schema()) else {
            return Vec::new();
        };
        match self.source.columns(&schema, &table.name) {
            Some(columns) => columns,
            None => {
                self.need(MetadataKey::Columns {
                    schema,
                    table: table.name.clone(),
                });
                Vec::new()
            }
        }
    }

    fn add_keywords(&mut self) {
        for keyword in KEYWORDS {
            self.push(Suggestion::new(
                keyword,
                SuggestionKind::Keyword,
                "SQL Keyword",
                keyword,
            ));
        }
    }

    fn add_functions(&mut self) {
        for (name, detail) in FUNCTIONS {
            self.push(Suggestion::new(
                name,
                SuggestionKind::Function,
                detail,
                format!("{name}()"),
            ));
        }
    }

    fn add_snippets(&mut self) {
        for (label, detail, apply) in SNIPPETS {
            self.push(Suggestion::new(
                label,
                SuggestionKind::Snippet,
                detail,
                apply,
            ));
        }
    }

    fn finish(self) -> Candidates {
        Candidates {
            items: self.items,
            missing: self.missing,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::HashMap;

    use super::{
        filter_candidates, load_candidates, MetadataSource, Suggestion, SuggestionKind,
    };
    use crate::catalog::MetadataKey;
    use crate::data_access::ColumnDescriptor;
    use crate::sql_context::parse;

    #[derive(Debug, Default)]
    pub(crate) struct FixedMetadata {
        pub current: Option<String>,
        pub schemas: Option<Vec<String>>,
        pub tables: HashMap<String, Vec<String>>,
        pub columns: HashMap<(String, String), Vec<ColumnDescriptor>>,
    }

    impl FixedMetadata {
        pub(crate) fn shop() -> Self {
            let mut metadata = Self {
                current: Some("shop".to_string()),
                schemas: Some(vec!["shop".to_string(), "audit".to_string()]),
                ..Self::default()
            };
            metadata.tables.insert(
                "shop".to_string(),
                vec![
                    "users".to_string(),
                    "orders".to_string(),
                    "products".to_string(),
                ],
            );
            metadata.add_columns("shop", "users", &["id", "name", "email"]);
            metadata.add_columns("shop", "orders", &["id", "user_id", "total"]);
            metadata.add_columns("shop", "products", &["id", "title"]);
            metadata
        }

        fn add_columns(&mut self, schema: &str, table: &str, names: &[&str]) {
            self.columns.insert(
                (schema.to_string(), table.to_string()),
                names
                    .iter()
                    .map(|name| ColumnDescriptor::new(*name, "text"))
                    .collect(),
            );
        }
    }

    impl MetadataSource for FixedMetadata {
        fn current_schema(&self) -> Option<String> {
            self.current.clone()
        }

        fn schemas(&self) -> Option<Vec<String>> {
            self.schemas.clone()
        }

        fn tables(&self, schema: &str) -> Option<Vec<String>> {
            self.tables.get(schema).cloned()
        }

        fn columns(&self, schema: &str, table: &str) -> Option<Vec<ColumnDescriptor>> {
            self.columns
                .get(&(schema.to_string(), table.to_string()))
                .cloned()
        }
    }

    fn labels(items: &[Suggestion]) -> Vec<&str> {
        items.iter().map(|item| item.label.as_str()).collect()
    }

    fn candidates_at_end(text: &str, metadata: &FixedMetadata) -> super::Candidates {
        load_candidates(&parse(text, text.len()), metadata)
    }

    #[test]
    fn alias_qualified_columns_come_in_both_forms() {
        let candidates =
            candidates_at_end("SELECT * FROM users u WHERE u.", &FixedMetadata::shop());
        let labels = labels(&candidates.items);
        assert_eq!(&labels[..6], ["u.id", "id", "u.name", "name", "u.email", "email"]);
        assert!(labels.contains(&"COUNT"));
        assert!(candidates.missing.is_empty());
    }

    #[test]
    fn schema_context_lists_schemas_then_current_tables() {
        let candidates = candidates_at_end("SELECT * FROM ", &FixedMetadata::shop());
        assert_eq!(
            labels(&candidates.items),
            ["shop", "audit", "users", "orders", "products"]
        );
    }

    #[test]
    fn mixed_context_offers_aliases_first_and_bounds_column_tables() {
        let mut metadata = FixedMetadata::shop();
        metadata
            .tables
            .get_mut("shop")
            .expect("shop tables")
            .push("refunds".to_string());
        metadata.add_columns("shop", "refunds", &["reason"]);

        let text = "DELETE o FROM orders o JOIN users u JOIN products p JOIN refunds r ON ";
        let candidates = candidates_at_end(text, &metadata);
        let labels = labels(&candidates.items);

        assert_eq!(
            &labels[..8],
            ["o", "orders", "u", "users", "p", "products", "r", "refunds"]
        );
        assert!(labels.contains(&"o.total"));
        assert!(labels.contains(&"users.email"));
        assert!(labels.contains(&"p.title"));
        assert!(!labels.contains(&"reason"));
        assert!(!labels.contains(&"r.reason"));
        assert!(labels.contains(&"JOIN ... ON ..."));
        let unique = labels.iter().collect::<std::collections::HashSet<_>>();
        assert_eq!(unique.len(), labels.len());
    }

    #[test]
    fn missing_metadata_is_reported_once() {
        let metadata = FixedMetadata {
            current: Some("shop".to_string()),
            schemas: Some(vec!["shop".to_string()]),
            ..FixedMetadata::default()
        };
        let candidates = candidates_at_end("SELECT * FROM users u WHERE u.", &metadata);
        assert_eq!(
            candidates.missing,
            vec![MetadataKey::Columns {
                schema: "shop".to_string(),
                table: "users".to_string(),
            }]
        );

        let empty = FixedMetadata::default();
        let candidates = candidates_at_end("SELECT * FROM ", &empty);
        assert_eq!(candidates.missing, vec![MetadataKey::Schemas]);
    }

    #[test]
    fn keyword_context_uses_static_corpus() {
        let candidates = candidates_at_end("SEL", &FixedMetadata::default());
        let filtered = filter_candidates(&candidates.items, "sel");
        assert_eq!(labels(&filtered), ["SELECT", "SELECT DISTINCT ..."]);
        let functions = filter_candidates(&candidates.items, "coa");
        assert_eq!(functions[0].apply, "COALESCE()");
        assert_eq!(functions[0].kind, SuggestionKind::Function);
    }

    #[test]
    fn transaction_keywords_are_offered() {
        let candidates = candidates_at_end("STA", &FixedMetadata::default());
        let filtered = filter_candidates(&candidates.items, "sta");
        assert_eq!(labels(&filtered), ["START"]);
        let filtered = filter_candidates(&candidates.items, "beg");
        assert_eq!(labels(&filtered), ["BEGIN"]);
    }

    #[test]
    fn prefix_matches_segment_after_last_dot() {
        let item = Suggestion::new("u.email", SuggestionKind::Column, "text", "u.email");
        assert!(item.matches_prefix("EM"));
        assert!(item.matches_prefix("u.e"));
        assert!(!item.matches_prefix("na"));
    }
}
