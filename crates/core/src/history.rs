use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::HistoryConfig;

pub const HISTORY_FILE_NAME: &str = "history.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub id: u64,
    pub query: String,
    pub success: bool,
    pub timestamp: u64,
    pub database: String,
}

#[must_use]
pub fn unix_timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to read history file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse history file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to create history directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize history: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write history file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Append-only record of executed queries.
pub trait HistorySink {
    fn add(&mut self, query: &str, success: bool, database: &str) -> Result<(), HistoryError>;
}

/// Newest-first history kept in `history.json`, bounded by
/// `max_entries`.
#[derive(Debug, Clone)]
pub struct FileHistoryStore {
    path: PathBuf,
    max_entries: usize,
    persist: bool,
    entries: Vec<HistoryEntry>,
}

impl FileHistoryStore {
    pub fn load_from_dir(dir: impl AsRef<Path>, config: &HistoryConfig) -> Result<Self, HistoryError> {
        Self::load_from_path(dir.as_ref().join(HISTORY_FILE_NAME), config)
    }

    pub fn load_from_path(
        path: impl Into<PathBuf>,
        config: &HistoryConfig,
    ) -> Result<Self, HistoryError> {
        let mut store = Self {
            path: path.into(),
            max_entries: config.max_entries,
            persist: config.persist,
            entries: Vec::new(),
        };
        if !store.persist || !store.path.exists() {
            return Ok(store);
        }

        let raw = fs::read_to_string(&store.path).map_err(|source| HistoryError::Read {
            path: store.path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(store);
        }

        store.entries = serde_json::from_str(&raw).map_err(|source| HistoryError::Parse {
            path: store.path.clone(),
            source,
        })?;
        store.entries.truncate(store.max_entries);
        Ok(store)
    }

    /// A store that never touches the disk.
    #[must_use]
    pub fn in_memory(max_entries: usize) -> Self {
        Self {
            path: PathBuf::new(),
            max_entries,
            persist: false,
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) -> Result<(), HistoryError> {
        self.entries.clear();
        self.save()
    }

    fn next_id(&self) -> u64 {
        self.entries
            .iter()
            .map(|entry| entry.id)
            .max()
            .map_or(1, |id| id + 1)
    }

    fn save(&self) -> Result<(), HistoryError> {
        if !self.persist {
            return Ok(());
        }
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| HistoryError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let rendered = serde_json::to_string_pretty(&self.entries)
            .map_err(|source| HistoryError::Serialize { source })?;
        fs::write(&self.path, rendered).map_err(|source| HistoryError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl HistorySink for FileHistoryStore {
    fn add(&mut self, query: &str, success: bool, database: &str) -> Result<(), HistoryError> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(());
        }

        let entry = HistoryEntry {
            id: self.next_id(),
            query: query.to_string(),
            success,
            timestamp: unix_timestamp_secs(),
            database: database.to_string(),
        };
        self.entries.insert(0, entry);
        self.entries.truncate(self.max_entries);
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::{FileHistoryStore, HistorySink};
    use crate::config::HistoryConfig;

    fn config(max_entries: usize) -> HistoryConfig {
        HistoryConfig {
            max_entries,
            persist: true,
        }
    }

    #[test]
    fn entries_are_newest_first_and_bounded() {
        let mut store = FileHistoryStore::in_memory(2);
        store.add("SELECT 1", true, "shop").expect("add first");
        store.add("SELECT 2", false, "shop").expect("add second");
        store.add("SELECT 3", true, "audit").expect("add third");

        let queries = store
            .entries()
            .iter()
            .map(|entry| entry.query.as_str())
            .collect::<Vec<_>>();
        assert_eq!(queries, ["SELECT 3", "SELECT 2"]);
        assert_eq!(store.entries()[0].database, "audit");
        assert!(!store.entries()[1].success);
        assert_eq!(store.entries()[0].id, 3);
    }

    #[test]
    fn blank_queries_are_ignored() {
        let mut store = FileHistoryStore::in_memory(10);
        store.add("   \n", true, "shop").expect("add blank");
        assert!(store.is_empty());
    }

    #[test]
    fn persisted_entries_reload_and_clear() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");

        let mut store =
            FileHistoryStore::load_from_dir(temp_dir.path(), &config(10)).expect("load empty");
        store
            .add("SELECT * FROM users", true, "shop")
            .expect("add entry");

        let mut reloaded =
            FileHistoryStore::load_from_dir(temp_dir.path(), &config(10)).expect("reload");
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.entries()[0].query, "SELECT * FROM users");
        assert!(reloaded.entries()[0].timestamp > 0);

        reloaded.clear().expect("clear history");
        let reloaded =
            FileHistoryStore::load_from_dir(temp_dir.path(), &config(10)).expect("reload");
        assert!(reloaded.is_empty());
    }

    #[test]
    fn disabled_persistence_leaves_no_file() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let settings = HistoryConfig {
            max_entries: 10,
            persist: false,
        };

        let mut store =
            FileHistoryStore::load_from_dir(temp_dir.path(), &settings).expect("load");
        store.add("SELECT 1", true, "shop").expect("add entry");
        assert_eq!(store.len(), 1);
        assert!(!store.path().exists());
    }
}
