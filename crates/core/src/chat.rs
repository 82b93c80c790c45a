use std::fmt;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::data_access::DataAccessError;

static SQL_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)```(?:sql|mysql|sqlite)?[ \t]*\r?\n(.*?)```").expect("valid regex")
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// A language model that answers questions about the connected database.
/// Errors reuse the data-access sentinels so timeouts go through the same
/// retry policy.
#[async_trait]
pub trait ChatAssistant: Send + Sync + fmt::Debug {
    async fn list_models(&self) -> Result<Vec<String>, DataAccessError>;

    async fn send(
        &self,
        model: &str,
        conversation: &[ChatMessage],
    ) -> Result<String, DataAccessError>;
}

/// System prompt describing the tables the model may query.
#[must_use]
pub fn schema_prompt(database: &str, schema: &str, tables: &[String]) -> ChatMessage {
    let listing = if tables.is_empty() {
        "(no tables loaded)".to_string()
    } else {
        tables.join(", ")
    };
    ChatMessage::system(format!(
        "You help write SQL for the {database} database. The current schema is `{schema}` \
         with tables: {listing}. Put any SQL you suggest in a ```sql fenced block."
    ))
}

/// Contents of the last fenced SQL block in `reply`.
#[must_use]
pub fn extract_sql_block(reply: &str) -> Option<String> {
    SQL_BLOCK
        .captures_iter(reply)
        .filter_map(|captures| captures.get(1))
        .map(|body| body.as_str().trim().to_string())
        .filter(|body| !body.is_empty())
        .last()
}
