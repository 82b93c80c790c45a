use std::path::PathBuf;
use std::sync::Arc;

use dbrowse_core::autocomplete::DebounceTicket;
use dbrowse_core::catalog::{MetadataEntry, MetadataKey};
use dbrowse_core::config::ConnectionProfile;
use dbrowse_core::data_access::{
    ColumnDescriptor, DataAccess, DataAccessError, QueryResult, TableDescriptor,
};
use dbrowse_core::filter::RowFilter;
use dbrowse_core::operation::Outcome;

use crate::navigation::ViewMode;

/// Schemas plus the tables of the schema that was picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableListing {
    pub schemas: Vec<String>,
    pub schema: String,
    pub tables: Vec<TableDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaTable {
    pub table: TableDescriptor,
    pub columns: Vec<ColumnDescriptor>,
}

/// One page of a table browse. Also the input a timed-out page load is
/// re-issued with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub schema: String,
    pub table: String,
    pub filter: RowFilter,
    pub page: u64,
}

/// Message posted back to the UI loop by a background task.
#[derive(Debug, Clone)]
pub enum Completion {
    Connected {
        profile: ConnectionProfile,
        outcome: Outcome<Arc<dyn DataAccess>>,
    },
    /// `requested` is the schema asked for; `None` lets the loader pick.
    TablesLoaded {
        requested: Option<String>,
        outcome: Outcome<TableListing>,
    },
    SchemaLoaded {
        schema: String,
        outcome: Outcome<Vec<SchemaTable>>,
    },
    PageLoaded {
        request: PageRequest,
        outcome: Outcome<QueryResult>,
    },
    QueryExecuted {
        sql: String,
        outcome: Outcome<QueryResult>,
    },
    HistoryRerun {
        sql: String,
        outcome: Outcome<QueryResult>,
    },
    ModelsLoaded {
        outcome: Outcome<Vec<String>>,
    },
    ChatResponse {
        prompt: String,
        outcome: Outcome<String>,
    },
    MetadataLoaded {
        seq: u64,
        keys: Vec<MetadataKey>,
        result: Result<Vec<MetadataEntry>, DataAccessError>,
    },
    ExportFinished {
        path: PathBuf,
        result: Result<usize, String>,
    },
    AutocompleteDebounceFired(DebounceTicket),
    StatusExpired(u64),
}

impl Completion {
    /// The view that owns this completion; `None` for controller-level
    /// messages.
    #[must_use]
    pub fn target(&self) -> Option<ViewMode> {
        match self {
            Self::Connected { .. } => Some(ViewMode::Connection),
            Self::TablesLoaded { .. } => Some(ViewMode::Browser),
            Self::SchemaLoaded { .. } => Some(ViewMode::Schema),
            Self::PageLoaded { .. } => Some(ViewMode::Results),
            Self::QueryExecuted { .. }
            | Self::MetadataLoaded { .. }
            | Self::AutocompleteDebounceFired(_) => Some(ViewMode::Editor),
            Self::HistoryRerun { .. } => Some(ViewMode::History),
            Self::ModelsLoaded { .. } | Self::ChatResponse { .. } => Some(ViewMode::Chat),
            Self::ExportFinished { .. } => Some(ViewMode::Export),
            Self::StatusExpired(_) => None,
        }
    }
}
