use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::TimeoutPreferences;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseKind {
    #[default]
    Mysql,
    Sqlite,
}

impl DatabaseKind {
    pub const ALL: [Self; 2] = [Self::Mysql, Self::Sqlite];

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Mysql => "MySQL",
            Self::Sqlite => "SQLite",
        }
    }

    #[must_use]
    pub fn default_port(self) -> u16 {
        match self {
            Self::Mysql => 3306,
            Self::Sqlite => 0,
        }
    }

    #[must_use]
    pub fn next(self) -> Self {
        match self {
            Self::Mysql => Self::Sqlite,
            Self::Sqlite => Self::Mysql,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PasswordSource {
    #[default]
    EnvVar,
    Keyring,
}

/// A saved connection. For SQLite, `database` is the file path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub name: String,
    #[serde(default)]
    pub kind: DatabaseKind,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub password_source: PasswordSource,
    #[serde(default)]
    pub keyring_service: Option<String>,
    #[serde(default)]
    pub keyring_account: Option<String>,
}

impl ConnectionProfile {
    #[must_use]
    pub fn mysql(name: impl Into<String>, host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DatabaseKind::Mysql,
            host: host.into(),
            port: DatabaseKind::Mysql.default_port(),
            user: user.into(),
            database: None,
            schema: None,
            password_source: PasswordSource::EnvVar,
            keyring_service: None,
            keyring_account: None,
        }
    }

    #[must_use]
    pub fn sqlite(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: DatabaseKind::Sqlite,
            host: String::new(),
            port: 0,
            user: String::new(),
            database: Some(path.into()),
            schema: None,
            password_source: PasswordSource::EnvVar,
            keyring_service: None,
            keyring_account: None,
        }
    }

    /// Short target description for lists and status lines.
    #[must_use]
    pub fn target(&self) -> String {
        match self.kind {
            DatabaseKind::Mysql => {
                let database = self.database.as_deref().unwrap_or("");
                format!("{}@{}:{}/{database}", self.user, self.host, self.port)
            }
            DatabaseKind::Sqlite => self.database.clone().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_entries: usize,
    pub persist: bool,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            persist: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AiConfig {
    pub endpoint: String,
    pub model: Option<String>,
    /// Whether the user agreed to send schema context to the model.
    pub consent: bool,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: None,
            consent: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub query_timeout_secs: u64,
    /// `0` means no saved preference.
    pub preferred_timeout_secs: u64,
    pub page_size: u32,
    pub history: HistoryConfig,
    pub ai: AiConfig,
    pub connections: Vec<ConnectionProfile>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            query_timeout_secs: 30,
            preferred_timeout_secs: 0,
            page_size: 50,
            history: HistoryConfig::default(),
            ai: AiConfig::default(),
            connections: Vec::new(),
        }
    }
}

impl AppConfig {
    #[must_use]
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    fn normalize(&mut self) {
        let mut by_name = std::collections::BTreeMap::new();
        for profile in self.connections.drain(..) {
            by_name.insert(profile.name.clone(), profile);
        }
        self.connections = by_name.into_values().collect();
        if self.page_size == 0 {
            self.page_size = AppConfig::default().page_size;
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read config file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize config: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write config file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// `config.toml` on disk plus its parsed contents.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
    config: AppConfig,
}

impl FileConfigStore {
    pub fn load_default() -> Result<Self, ConfigError> {
        Self::load_from_dir(default_config_dir()?)
    }

    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_from_path(dir.as_ref().join(CONFIG_FILE_NAME))
    }

    pub fn load_from_path(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self::with_defaults(path));
        }

        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self::with_defaults(path));
        }

        let mut config: AppConfig = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.normalize();
        Ok(Self { path, config })
    }

    /// A store that has not been read from disk; `persist` creates the file.
    #[must_use]
    pub fn with_defaults(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: AppConfig::default(),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory holding the config file and its siblings (history).
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.path.parent().unwrap_or_else(|| Path::new("."))
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }

    #[must_use]
    pub fn profiles(&self) -> &[ConnectionProfile] {
        &self.config.connections
    }

    #[must_use]
    pub fn profile(&self, name: &str) -> Option<&ConnectionProfile> {
        self.config
            .connections
            .iter()
            .find(|profile| profile.name == name)
    }

    pub fn upsert_profile(&mut self, profile: ConnectionProfile) {
        let connections = &mut self.config.connections;
        if let Some(existing) = connections
            .iter_mut()
            .find(|existing| existing.name == profile.name)
        {
            *existing = profile;
        } else {
            connections.push(profile);
            connections.sort_unstable_by(|a, b| a.name.cmp(&b.name));
        }
    }

    #[must_use]
    pub fn delete_profile(&mut self, name: &str) -> bool {
        let original_len = self.config.connections.len();
        self.config
            .connections
            .retain(|profile| profile.name != name);
        self.config.connections.len() != original_len
    }

    pub fn persist(&self) -> Result<(), ConfigError> {
        if let Some(parent_dir) = self.path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| ConfigError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let rendered = toml::to_string_pretty(&self.config)
            .map_err(|source| ConfigError::Serialize { source })?;
        fs::write(&self.path, rendered).map_err(|source| ConfigError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

impl TimeoutPreferences for FileConfigStore {
    type Error = ConfigError;

    fn preferred_timeout(&self) -> Option<Duration> {
        let secs = self.config.preferred_timeout_secs;
        (secs > 0).then(|| Duration::from_secs(secs))
    }

    fn set_preferred_timeout(&mut self, timeout: Duration) {
        self.config.preferred_timeout_secs = timeout.as_secs();
    }

    fn save(&self) -> Result<(), ConfigError> {
        self.persist()
    }
}

/// `DBROWSE_CONFIG_DIR`, else the platform config dir joined with `dbrowse`.
pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
    if let Some(custom) = env::var_os("DBROWSE_CONFIG_DIR") {
        return Ok(PathBuf::from(custom));
    }

    let base_dir = if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(ConfigError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(ConfigError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("dbrowse"))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::{ConfigError, ConnectionProfile, DatabaseKind, FileConfigStore};
    use crate::retry::TimeoutPreferences;

    #[test]
    fn missing_config_file_loads_defaults() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");

        let store = FileConfigStore::load_from_dir(temp_dir.path()).expect("failed to load");
        assert_eq!(store.config().query_timeout_secs, 30);
        assert_eq!(store.config().page_size, 50);
        assert_eq!(store.config().history.max_entries, 1000);
        assert_eq!(store.config().ai.endpoint, "http://localhost:11434");
        assert!(store.profiles().is_empty());
        assert_eq!(store.preferred_timeout(), None);
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_fields() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            "page_size = 20\n\n[[connections]]\nname = \"notes\"\nkind = \"sqlite\"\ndatabase = \"notes.db\"\n",
        )
        .expect("failed to write config");

        let store = FileConfigStore::load_from_path(&path).expect("failed to load");
        assert_eq!(store.config().page_size, 20);
        assert_eq!(store.config().query_timeout_secs, 30);
        let notes = store.profile("notes").expect("sqlite profile");
        assert_eq!(notes.kind, DatabaseKind::Sqlite);
        assert_eq!(notes.target(), "notes.db");
    }

    #[test]
    fn unparsable_file_reports_path() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "page_size = [").expect("failed to write config");

        let error = FileConfigStore::load_from_path(&path).expect_err("parse should fail");
        assert!(matches!(error, ConfigError::Parse { path: ref failed, .. } if failed == &path));
    }

    #[test]
    fn upsert_persist_reload_and_delete_profile() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");

        let mut store = FileConfigStore::load_from_dir(temp_dir.path()).expect("failed to load");
        let mut profile = ConnectionProfile::mysql("local", "127.0.0.1", "root");
        profile.database = Some("shop".to_string());

        store.upsert_profile(profile.clone());
        store.persist().expect("failed to persist store");

        let mut reloaded =
            FileConfigStore::load_from_dir(temp_dir.path()).expect("failed to reload");
        assert_eq!(reloaded.profile("local"), Some(&profile));
        assert_eq!(
            reloaded.profile("local").map(ConnectionProfile::target),
            Some("root@127.0.0.1:3306/shop".to_string())
        );

        assert!(reloaded.delete_profile("local"));
        reloaded.persist().expect("failed to persist deletion");

        let reloaded = FileConfigStore::load_from_dir(temp_dir.path()).expect("final reload");
        assert!(reloaded.profiles().is_empty());
    }

    #[test]
    fn preferred_timeout_round_trips_through_file() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let mut store = FileConfigStore::load_from_dir(temp_dir.path()).expect("failed to load");

        store.set_preferred_timeout(Duration::from_secs(120));
        store.save().expect("failed to save preference");

        let reloaded = FileConfigStore::load_from_dir(temp_dir.path()).expect("failed to reload");
        assert_eq!(reloaded.preferred_timeout(), Some(Duration::from_secs(120)));
    }
}
