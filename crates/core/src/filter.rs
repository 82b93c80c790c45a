use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("column name cannot be empty")]
    EmptyColumn,
    #[error("condition on `{column}` needs a value")]
    MissingValue { column: String },
    #[error("BETWEEN on `{column}` needs two values, e.g. `1 AND 10`")]
    InvalidBetween { column: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterOperator {
    #[default]
    Eq,
    NotEq,
    Gt,
    Lt,
    Ge,
    Le,
    Like,
    In,
    Between,
    IsNull,
    IsNotNull,
}

impl FilterOperator {
    pub const ALL: [Self; 11] = [
        Self::Eq,
        Self::NotEq,
        Self::Gt,
        Self::Lt,
        Self::Ge,
        Self::Le,
        Self::Like,
        Self::In,
        Self::Between,
        Self::IsNull,
        Self::IsNotNull,
    ];

    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "!=",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
            Self::Like => "LIKE",
            Self::In => "IN",
            Self::Between => "BETWEEN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }

    #[must_use]
    pub fn takes_value(self) -> bool {
        !matches!(self, Self::IsNull | Self::IsNotNull)
    }

    fn index(self) -> usize {
        Self::ALL
            .iter()
            .position(|operator| *operator == self)
            .unwrap_or(0)
    }

    #[must_use]
    pub fn next(self) -> Self {
        Self::ALL[(self.index() + 1) % Self::ALL.len()]
    }

    #[must_use]
    pub fn previous(self) -> Self {
        Self::ALL[(self.index() + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStyle {
    /// MySQL.
    Backtick,
    /// SQLite and ANSI.
    DoubleQuote,
}

#[must_use]
pub fn quote_identifier(identifier: &str, style: QuoteStyle) -> String {
    match style {
        QuoteStyle::Backtick => format!("`{}`", identifier.replace('`', "``")),
        QuoteStyle::DoubleQuote => format!("\"{}\"", identifier.replace('"', "\"\"")),
    }
}

fn quote_sql_string(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn quote_sql_literal(value: &str) -> String {
    let trimmed = value.trim();
    if is_plain_number(trimmed) {
        trimmed.to_string()
    } else {
        quote_sql_string(trimmed)
    }
}

/// Optional sign, digits, optional fraction. Words such as `inf` or `NaN`
/// are not numbers to the database.
fn is_plain_number(text: &str) -> bool {
    let unsigned = text.strip_prefix(['-', '+']).unwrap_or(text);
    let (whole, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    !(whole.is_empty() && fraction.is_empty())
        && whole.bytes().all(|byte| byte.is_ascii_digit())
        && fraction.bytes().all(|byte| byte.is_ascii_digit())
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WhereCondition {
    pub column: String,
    pub operator: FilterOperator,
    pub value: String,
}

impl WhereCondition {
    #[must_use]
    pub fn new(
        column: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<String>,
    ) -> Self {
        Self {
            column: column.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        self.to_sql(QuoteStyle::Backtick).map(|_| ())
    }

    pub fn to_sql(&self, style: QuoteStyle) -> Result<String, FilterError> {
        if self.column.trim().is_empty() {
            return Err(FilterError::EmptyColumn);
        }
        let column = quote_identifier(self.column.trim(), style);
        let value = self.value.trim();
        if self.operator.takes_value() && value.is_empty() {
            return Err(FilterError::MissingValue {
                column: self.column.clone(),
            });
        }

        let sql = match self.operator {
            FilterOperator::IsNull | FilterOperator::IsNotNull => {
                format!("{column} {}", self.operator.symbol())
            }
            FilterOperator::Like => format!("{column} LIKE {}", quote_sql_string(value)),
            FilterOperator::In => {
                let items = value
                    .split(',')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(quote_sql_literal)
                    .collect::<Vec<_>>();
                format!("{column} IN ({})", items.join(", "))
            }
            FilterOperator::Between => {
                let (low, high) = split_between(value).ok_or_else(|| {
                    FilterError::InvalidBetween {
                        column: self.column.clone(),
                    }
                })?;
                format!(
                    "{column} BETWEEN {} AND {}",
                    quote_sql_literal(low),
                    quote_sql_literal(high)
                )
            }
            operator => format!("{column} {} {}", operator.symbol(), quote_sql_literal(value)),
        };
        Ok(sql)
    }

    /// One-line rendering for lists.
    #[must_use]
    pub fn describe(&self) -> String {
        if self.operator.takes_value() {
            format!("{} {} {}", self.column, self.operator.symbol(), self.value)
        } else {
            format!("{} {}", self.column, self.operator.symbol())
        }
    }
}

/// Accepts `low,high` or `low AND high`.
fn split_between(value: &str) -> Option<(&str, &str)> {
    if let Some((low, high)) = value.split_once(',') {
        return non_empty_pair(low, high);
    }
    let upper = value.to_ascii_uppercase();
    let at = upper.find(" AND ")?;
    non_empty_pair(&value[..at], &value[at + " AND ".len()..])
}

fn non_empty_pair<'a>(low: &'a str, high: &'a str) -> Option<(&'a str, &'a str)> {
    let (low, high) = (low.trim(), high.trim());
    (!low.is_empty() && !high.is_empty()).then_some((low, high))
}

/// Conditions applied to table browsing, joined with `AND`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RowFilter {
    pub conditions: Vec<WhereCondition>,
}

impl RowFilter {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// `WHERE ...` clause, or `None` without conditions.
    pub fn where_clause(&self, style: QuoteStyle) -> Result<Option<String>, FilterError> {
        if self.conditions.is_empty() {
            return Ok(None);
        }
        let parts = self
            .conditions
            .iter()
            .map(|condition| condition.to_sql(style))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(format!("WHERE {}", parts.join(" AND "))))
    }
}

/// `SELECT *` over one page of `table`, filtered by `filter`.
pub fn page_select_sql(
    schema: Option<&str>,
    table: &str,
    filter: &RowFilter,
    style: QuoteStyle,
    limit: u32,
    offset: u64,
) -> Result<String, FilterError> {
    let target = match schema {
        Some(schema) => format!(
            "{}.{}",
            quote_identifier(schema, style),
            quote_identifier(table, style)
        ),
        None => quote_identifier(table, style),
    };
    let mut sql = format!("SELECT * FROM {target}");
    if let Some(clause) = filter.where_clause(style)? {
        sql.push(' ');
        sql.push_str(&clause);
    }
    sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}"));
    Ok(sql)
}
