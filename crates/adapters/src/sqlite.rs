use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dbrowse_core::data_access::{
    ColumnDescriptor, DataAccess, DataAccessError, QueryResult, TableDescriptor,
};
use dbrowse_core::filter::{page_select_sql, quote_identifier, QuoteStyle, RowFilter};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};

/// SQLite access over one connection. Calls run on the blocking pool and
/// are serialized by the connection lock.
#[derive(Debug, Clone)]
pub struct SqliteDataAccess {
    conn: Arc<Mutex<Connection>>,
    database: String,
}

impl SqliteDataAccess {
    /// Opens `path`; `:memory:` opens a private in-memory database.
    pub fn open(path: &str) -> Result<Self, DataAccessError> {
        let conn = if path == ":memory:" {
            Connection::open_in_memory()
        } else {
            Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_URI
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
        }
        .map_err(to_access_error)?;

        let database = Path::new(path)
            .file_stem()
            .map_or_else(|| path.to_string(), |stem| stem.to_string_lossy().into_owned());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            database,
        })
    }

    pub async fn open_async(path: String) -> Result<Self, DataAccessError> {
        let opened = tokio::task::spawn_blocking(move || Self::open(&path))
            .await
            .map_err(|error| DataAccessError::backend(format!("sqlite open task failed: {error}")))?;
        if let Ok(access) = &opened {
            tracing::info!(database = %access.database, "opened sqlite database");
        }
        opened
    }

    async fn run<T, F>(&self, call: F) -> Result<T, DataAccessError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn
                .lock()
                .map_err(|_| DataAccessError::backend("sqlite connection lock poisoned"))?;
            call(&guard).map_err(to_access_error)
        })
        .await
        .map_err(|error| DataAccessError::backend(format!("sqlite task failed: {error}")))?
    }
}

#[async_trait]
impl DataAccess for SqliteDataAccess {
    fn database_name(&self) -> String {
        self.database.clone()
    }

    async fn get_schemas(&self) -> Result<Vec<String>, DataAccessError> {
        self.run(|conn| {
            let mut statement = conn.prepare("SELECT name FROM pragma_database_list ORDER BY seq")?;
            let names = statement
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
        .await
    }

    async fn get_storage_units(
        &self,
        schema: &str,
    ) -> Result<Vec<TableDescriptor>, DataAccessError> {
        let sql = format!(
            "SELECT name, type FROM {}.sqlite_master \
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
            quote_identifier(schema, QuoteStyle::DoubleQuote)
        );
        self.run(move |conn| {
            let mut statement = conn.prepare(&sql)?;
            let tables = statement
                .query_map([], |row| {
                    Ok(TableDescriptor {
                        name: row.get(0)?,
                        kind: row.get::<_, String>(1)?.to_ascii_uppercase(),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tables)
        })
        .await
    }

    async fn get_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>, DataAccessError> {
        let (schema, table) = (schema.to_string(), table.to_string());
        self.run(move |conn| {
            let mut statement = conn.prepare(
                "SELECT name, type, \"notnull\" FROM pragma_table_info(?1, ?2) ORDER BY cid",
            )?;
            let columns = statement
                .query_map([table.as_str(), schema.as_str()], |row| {
                    Ok(ColumnDescriptor {
                        name: row.get(0)?,
                        data_type: row.get(1)?,
                        nullable: row.get::<_, i64>(2)? == 0,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(columns)
        })
        .await
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult, DataAccessError> {
        let sql = sql.to_string();
        self.run(move |conn| execute_blocking(conn, &sql)).await
    }

    async fn get_rows(
        &self,
        schema: &str,
        table: &str,
        filter: &RowFilter,
        limit: u32,
        offset: u64,
    ) -> Result<QueryResult, DataAccessError> {
        let sql = page_select_sql(
            Some(schema),
            table,
            filter,
            QuoteStyle::DoubleQuote,
            limit,
            offset,
        )
        .map_err(|error| DataAccessError::backend(error.to_string()))?;
        self.execute_query(&sql).await
    }
}

fn execute_blocking(conn: &Connection, sql: &str) -> Result<QueryResult, rusqlite::Error> {
    let mut statement = conn.prepare(sql)?;
    let column_count = statement.column_count();
    if column_count == 0 {
        let affected = statement.execute([])?;
        let mut result = QueryResult::default();
        result.affected_rows = u64::try_from(affected).ok();
        return Ok(result);
    }

    let columns = statement
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let mut rows = statement.query([])?;
    let mut values = Vec::new();
    while let Some(row) = rows.next()? {
        let mut rendered = Vec::with_capacity(column_count);
        for index in 0..column_count {
            rendered.push(sqlite_value_to_string(row.get_ref(index)?));
        }
        values.push(rendered);
    }
    Ok(QueryResult::new(columns, values))
}

fn sqlite_value_to_string(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => "NULL".to_string(),
        ValueRef::Integer(value) => value.to_string(),
        ValueRef::Real(value) => value.to_string(),
        ValueRef::Text(text) => String::from_utf8_lossy(text).into_owned(),
        ValueRef::Blob(bytes) => format!("<{} bytes>", bytes.len()),
    }
}

fn to_access_error(error: rusqlite::Error) -> DataAccessError {
    DataAccessError::backend(error.to_string())
}

#[cfg(test)]
mod tests {
    use rusqlite::types::ValueRef;

    use super::{sqlite_value_to_string, SqliteDataAccess};

    #[test]
    fn values_render_as_text() {
        assert_eq!(sqlite_value_to_string(ValueRef::Null), "NULL");
        assert_eq!(sqlite_value_to_string(ValueRef::Integer(7)), "7");
        assert_eq!(sqlite_value_to_string(ValueRef::Real(1.5)), "1.5");
        assert_eq!(sqlite_value_to_string(ValueRef::Text(b"abc")), "abc");
        assert_eq!(sqlite_value_to_string(ValueRef::Blob(&[1, 2, 3])), "<3 bytes>");
    }

    #[test]
    fn database_name_is_file_stem() {
        let temp_dir = tempfile::TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("notes.db");
        let access =
            SqliteDataAccess::open(&path.display().to_string()).expect("failed to open sqlite");
        assert_eq!(access.database, "notes");
    }
}
