use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ConnectionProfile;
use crate::filter::RowFilter;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataAccessError {
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("operation cancelled")]
    Cancelled,
    #[error("not connected")]
    NotConnected,
    #[error("{0}")]
    Backend(String),
}

impl DataAccessError {
    #[must_use]
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub name: String,
    pub kind: String,
}

impl TableDescriptor {
    #[must_use]
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: "TABLE".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

impl ColumnDescriptor {
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
        }
    }
}

/// Tabular result of a query or a page of table rows. Values are rendered
/// to strings by the adapter; `NULL` is kept as the literal `NULL`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub affected_rows: Option<u64>,
}

impl QueryResult {
    #[must_use]
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            columns,
            rows,
            affected_rows: None,
        }
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// Driver-side access to one connected database.
///
/// Implementations serialize their own internal access (pooling, locking).
/// Cancellation and deadlines are enforced by dropping the returned future
/// at an await point, see [`crate::operation::guarded`].
#[async_trait]
pub trait DataAccess: Send + Sync + fmt::Debug {
    /// Name of the connected database, recorded alongside history entries.
    fn database_name(&self) -> String;

    async fn get_schemas(&self) -> Result<Vec<String>, DataAccessError>;

    async fn get_storage_units(&self, schema: &str)
        -> Result<Vec<TableDescriptor>, DataAccessError>;

    async fn get_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>, DataAccessError>;

    async fn execute_query(&self, sql: &str) -> Result<QueryResult, DataAccessError>;

    async fn get_rows(
        &self,
        schema: &str,
        table: &str,
        filter: &RowFilter,
        limit: u32,
        offset: u64,
    ) -> Result<QueryResult, DataAccessError>;
}

/// Opens a [`DataAccess`] for a saved profile.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    async fn connect(
        &self,
        profile: &ConnectionProfile,
    ) -> Result<Arc<dyn DataAccess>, DataAccessError>;
}

const SYSTEM_SCHEMAS: [&str; 6] = [
    "information_schema",
    "pg_catalog",
    "pg_toast",
    "mysql",
    "sys",
    "performance_schema",
];

#[must_use]
pub fn is_system_schema(schema: &str) -> bool {
    let lowered = schema.to_ascii_lowercase();
    SYSTEM_SCHEMAS.contains(&lowered.as_str())
        || lowered.starts_with("pg_temp_")
        || lowered.starts_with("pg_toast_temp_")
}

/// Picks the schema to show first: `public` if present, else the first
/// non-system schema, else whatever comes first.
#[must_use]
pub fn select_best_schema(schemas: &[String]) -> Option<String> {
    let user_schemas = schemas
        .iter()
        .filter(|schema| !is_system_schema(schema))
        .collect::<Vec<_>>();

    if let Some(public) = user_schemas
        .iter()
        .find(|schema| schema.eq_ignore_ascii_case("public"))
    {
        return Some((*public).clone());
    }

    user_schemas
        .first()
        .map(|schema| (*schema).clone())
        .or_else(|| schemas.first().cloned())
}
