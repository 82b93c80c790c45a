use async_trait::async_trait;
use dbrowse_core::config::{ConnectionProfile, PasswordSource};
use dbrowse_core::data_access::{
    ColumnDescriptor, DataAccess, DataAccessError, QueryResult, TableDescriptor,
};
use dbrowse_core::filter::{page_select_sql, QuoteStyle, RowFilter};
use mysql_async::prelude::Queryable;
use mysql_async::{Conn, OptsBuilder, Pool, Row, Value};

pub const PASSWORD_ENV: &str = "DBROWSE_DB_PASSWORD";

/// Pooled MySQL access for one profile.
#[derive(Debug, Clone)]
pub struct MysqlDataAccess {
    pool: Pool,
    database: String,
}

impl MysqlDataAccess {
    #[must_use]
    pub fn from_profile(profile: &ConnectionProfile) -> Self {
        Self {
            pool: Pool::new(opts_from_profile(profile)),
            database: profile
                .database
                .clone()
                .unwrap_or_else(|| profile.name.clone()),
        }
    }

    /// Builds the pool and checks that a connection can be opened.
    pub async fn connect(profile: &ConnectionProfile) -> Result<Self, DataAccessError> {
        let access = Self::from_profile(profile);
        let mut conn = access.conn().await?;
        conn.ping().await.map_err(to_access_error)?;
        drop(conn);
        tracing::info!(profile = %profile.name, host = %profile.host, "connected to mysql");
        Ok(access)
    }

    pub async fn disconnect(&self) -> Result<(), DataAccessError> {
        self.pool.clone().disconnect().await.map_err(to_access_error)
    }

    async fn conn(&self) -> Result<Conn, DataAccessError> {
        self.pool.get_conn().await.map_err(to_access_error)
    }
}

#[async_trait]
impl DataAccess for MysqlDataAccess {
    fn database_name(&self) -> String {
        self.database.clone()
    }

    async fn get_schemas(&self) -> Result<Vec<String>, DataAccessError> {
        let mut conn = self.conn().await?;
        conn.query_map("SHOW DATABASES", |database: String| database)
            .await
            .map_err(to_access_error)
    }

    async fn get_storage_units(
        &self,
        schema: &str,
    ) -> Result<Vec<TableDescriptor>, DataAccessError> {
        let mut conn = self.conn().await?;
        conn.exec_map(
            "SELECT TABLE_NAME, TABLE_TYPE \
             FROM information_schema.TABLES \
             WHERE TABLE_SCHEMA = ? \
             ORDER BY TABLE_NAME",
            (schema.to_string(),),
            |(name, kind): (String, String)| TableDescriptor { name, kind },
        )
        .await
        .map_err(to_access_error)
    }

    async fn get_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>, DataAccessError> {
        let mut conn = self.conn().await?;
        conn.exec_map(
            "SELECT COLUMN_NAME, COLUMN_TYPE, IS_NULLABLE \
             FROM information_schema.COLUMNS \
             WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? \
             ORDER BY ORDINAL_POSITION",
            (schema.to_string(), table.to_string()),
            |(name, data_type, nullable): (String, String, String)| ColumnDescriptor {
                name,
                data_type,
                nullable: nullable.eq_ignore_ascii_case("YES"),
            },
        )
        .await
        .map_err(to_access_error)
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult, DataAccessError> {
        let mut conn = self.conn().await?;
        let mut result = conn.query_iter(sql).await.map_err(to_access_error)?;
        let columns = result
            .columns()
            .map(|columns| {
                columns
                    .iter()
                    .map(|column| column.name_str().into_owned())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let rows = result.collect::<Row>().await.map_err(to_access_error)?;
        let affected_rows = result.affected_rows();
        drop(result);

        let mut query_result = QueryResult::new(columns, rows.into_iter().map(row_values).collect());
        if query_result.columns.is_empty() {
            query_result.affected_rows = Some(affected_rows);
        }
        Ok(query_result)
    }

    async fn get_rows(
        &self,
        schema: &str,
        table: &str,
        filter: &RowFilter,
        limit: u32,
        offset: u64,
    ) -> Result<QueryResult, DataAccessError> {
        let sql = page_select_sql(Some(schema), table, filter, QuoteStyle::Backtick, limit, offset)
            .map_err(|error| DataAccessError::backend(error.to_string()))?;
        self.execute_query(&sql).await
    }
}

fn opts_from_profile(profile: &ConnectionProfile) -> OptsBuilder {
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(profile.host.clone())
        .tcp_port(profile.port)
        .user(Some(profile.user.clone()));

    if let Some(password) = resolve_password(profile) {
        builder = builder.pass(Some(password));
    }

    if let Some(database) = profile.database.as_deref().filter(|db| !db.is_empty()) {
        builder = builder.db_name(Some(database.to_string()));
    }

    builder
}

fn resolve_password(profile: &ConnectionProfile) -> Option<String> {
    let env_password = std::env::var(PASSWORD_ENV)
        .ok()
        .filter(|pw| !pw.is_empty());

    match profile.password_source {
        PasswordSource::EnvVar => env_password,
        PasswordSource::Keyring => {
            if let Some(password) = load_keyring_password(profile) {
                return Some(password);
            }

            if let Some(password) = env_password {
                store_keyring_password(profile, &password);
                return Some(password);
            }

            None
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn load_keyring_password(profile: &ConnectionProfile) -> Option<String> {
    let entry = keyring_entry(profile)?;
    entry.get_password().ok().filter(|pw| !pw.is_empty())
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn load_keyring_password(_profile: &ConnectionProfile) -> Option<String> {
    None
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn store_keyring_password(profile: &ConnectionProfile, password: &str) {
    if password.is_empty() {
        return;
    }
    if let Some(entry) = keyring_entry(profile) {
        if let Err(error) = entry.set_password(password) {
            tracing::warn!(profile = %profile.name, %error, "failed to store password in keyring");
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn store_keyring_password(_profile: &ConnectionProfile, _password: &str) {}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn keyring_entry(profile: &ConnectionProfile) -> Option<keyring::Entry> {
    let service = non_empty(profile.keyring_service.as_deref()).unwrap_or("dbrowse");
    let account = non_empty(profile.keyring_account.as_deref()).unwrap_or(profile.name.as_str());
    keyring::Entry::new(service, account).ok()
}

fn row_values(row: Row) -> Vec<String> {
    row.unwrap().into_iter().map(mysql_value_to_string).collect()
}

fn mysql_value_to_string(value: Value) -> String {
    match value {
        Value::NULL => "NULL".to_string(),
        Value::Bytes(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Value::Int(value) => value.to_string(),
        Value::UInt(value) => value.to_string(),
        Value::Float(value) => value.to_string(),
        Value::Double(value) => value.to_string(),
        Value::Date(year, month, day, hour, minute, second, micros) => {
            if (hour, minute, second, micros) == (0, 0, 0, 0) {
                format!("{year:04}-{month:02}-{day:02}")
            } else {
                format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}.{micros:06}"
                )
            }
        }
        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if is_negative { "-" } else { "" };
            let hours = u32::from(hours) + days * 24;
            format!("{sign}{hours:02}:{minutes:02}:{seconds:02}.{micros:06}")
        }
    }
}

fn to_access_error(error: mysql_async::Error) -> DataAccessError {
    DataAccessError::backend(error.to_string())
}
