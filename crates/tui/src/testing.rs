//! Fakes shared by the view and controller tests.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use dbrowse_core::chat::{ChatAssistant, ChatMessage};
use dbrowse_core::config::{ConnectionProfile, FileConfigStore};
use dbrowse_core::data_access::{
    ColumnDescriptor, Connector, DataAccess, DataAccessError, QueryResult, TableDescriptor,
};
use dbrowse_core::filter::RowFilter;
use dbrowse_core::history::FileHistoryStore;
use tempfile::TempDir;

use crate::context::AppContext;

#[derive(Debug, Default)]
pub struct FakeData {
    pub queries: Mutex<Vec<String>>,
    pub pages: Mutex<Vec<(String, RowFilter, u32, u64)>>,
}

impl FakeData {
    pub fn shop() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl DataAccess for FakeData {
    fn database_name(&self) -> String {
        "shop".to_string()
    }

    async fn get_schemas(&self) -> Result<Vec<String>, DataAccessError> {
        Ok(vec!["information_schema".to_string(), "shop".to_string()])
    }

    async fn get_storage_units(
        &self,
        schema: &str,
    ) -> Result<Vec<TableDescriptor>, DataAccessError> {
        match schema {
            "shop" => Ok(vec![
                TableDescriptor::table("orders"),
                TableDescriptor::table("users"),
            ]),
            _ => Ok(Vec::new()),
        }
    }

    async fn get_columns(
        &self,
        _schema: &str,
        table: &str,
    ) -> Result<Vec<ColumnDescriptor>, DataAccessError> {
        match table {
            "users" => Ok(vec![
                ColumnDescriptor::new("id", "int"),
                ColumnDescriptor::new("email", "varchar"),
            ]),
            "orders" => Ok(vec![
                ColumnDescriptor::new("id", "int"),
                ColumnDescriptor::new("user_id", "int"),
                ColumnDescriptor::new("total", "decimal"),
            ]),
            _ => Ok(Vec::new()),
        }
    }

    async fn execute_query(&self, sql: &str) -> Result<QueryResult, DataAccessError> {
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(sql.to_string());
        }
        if sql.contains("broken") {
            return Err(DataAccessError::backend("syntax error near 'broken'"));
        }
        Ok(users_result())
    }

    async fn get_rows(
        &self,
        _schema: &str,
        table: &str,
        filter: &RowFilter,
        limit: u32,
        offset: u64,
    ) -> Result<QueryResult, DataAccessError> {
        if let Ok(mut pages) = self.pages.lock() {
            pages.push((table.to_string(), filter.clone(), limit, offset));
        }
        Ok(users_result())
    }
}

pub fn users_result() -> QueryResult {
    QueryResult::new(
        vec!["id".to_string(), "email".to_string()],
        vec![
            vec!["1".to_string(), "a@example.com".to_string()],
            vec!["2".to_string(), "b@example.com".to_string()],
        ],
    )
}

#[derive(Debug)]
pub struct FakeConnector;

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        profile: &ConnectionProfile,
    ) -> Result<Arc<dyn DataAccess>, DataAccessError> {
        if profile.name == "broken" {
            return Err(DataAccessError::backend("access denied"));
        }
        Ok(FakeData::shop())
    }
}

#[derive(Debug)]
pub struct FakeAssistant;

#[async_trait]
impl ChatAssistant for FakeAssistant {
    async fn list_models(&self) -> Result<Vec<String>, DataAccessError> {
        Ok(vec!["llama3".to_string(), "sqlcoder".to_string()])
    }

    async fn send(
        &self,
        model: &str,
        conversation: &[ChatMessage],
    ) -> Result<String, DataAccessError> {
        Ok(format!(
            "{model} read {} messages.\n```sql\nSELECT id FROM users;\n```",
            conversation.len()
        ))
    }
}

/// Disconnected context over a temp config dir.
pub fn context() -> (AppContext, TempDir) {
    let dir = TempDir::new().expect("failed to create temp dir");
    let config = FileConfigStore::with_defaults(dir.path().join("config.toml"));
    let ctx = AppContext::new(
        config,
        FileHistoryStore::in_memory(100),
        Arc::new(FakeConnector),
        Some(Arc::new(FakeAssistant)),
    );
    (ctx, dir)
}

/// Context with an open session on [`FakeData::shop`], schema `shop`.
pub fn connected() -> (AppContext, TempDir, Arc<FakeData>) {
    let (mut ctx, dir) = context();
    let data = FakeData::shop();
    let mut profile = ConnectionProfile::sqlite("local", "shop.db");
    profile.schema = Some("shop".to_string());
    ctx.open_session(profile, data.clone());
    (ctx, dir, data)
}

pub fn key(code: KeyCode) -> KeyEvent {
    KeyEvent::new(code, KeyModifiers::NONE)
}

pub fn ctrl(c: char) -> KeyEvent {
    KeyEvent::new(KeyCode::Char(c), KeyModifiers::CONTROL)
}

pub fn chr(c: char) -> KeyEvent {
    key(KeyCode::Char(c))
}
