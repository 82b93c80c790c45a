use std::sync::Arc;
use std::time::Duration;

use dbrowse_core::catalog::CatalogCache;
use dbrowse_core::chat::ChatAssistant;
use dbrowse_core::config::{ConnectionProfile, FileConfigStore};
use dbrowse_core::data_access::{Connector, DataAccess};
use dbrowse_core::history::{FileHistoryStore, HistorySink};

/// The open connection.
#[derive(Debug, Clone)]
pub struct Session {
    /// Bumped on every connect so views can tell a reconnect apart.
    pub id: u64,
    pub profile: ConnectionProfile,
    pub data: Arc<dyn DataAccess>,
    pub schema: Option<String>,
}

/// State shared by every view: stores, collaborators and the session.
#[derive(Debug)]
pub struct AppContext {
    pub config: FileConfigStore,
    pub history: FileHistoryStore,
    pub connector: Arc<dyn Connector>,
    pub assistant: Option<Arc<dyn ChatAssistant>>,
    pub catalog: CatalogCache,
    session: Option<Session>,
    sessions_opened: u64,
}

impl AppContext {
    #[must_use]
    pub fn new(
        config: FileConfigStore,
        history: FileHistoryStore,
        connector: Arc<dyn Connector>,
        assistant: Option<Arc<dyn ChatAssistant>>,
    ) -> Self {
        Self {
            config,
            history,
            connector,
            assistant,
            catalog: CatalogCache::default(),
            session: None,
            sessions_opened: 0,
        }
    }

    #[must_use]
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    #[must_use]
    pub fn data(&self) -> Option<Arc<dyn DataAccess>> {
        self.session.as_ref().map(|session| Arc::clone(&session.data))
    }

    /// Installs a fresh session and drops all cached metadata.
    pub fn open_session(&mut self, profile: ConnectionProfile, data: Arc<dyn DataAccess>) {
        self.sessions_opened += 1;
        self.catalog.invalidate();
        self.catalog.set_preferred_schema(profile.schema.clone());
        tracing::info!(profile = %profile.name, target = %profile.target(), "connected");
        self.session = Some(Session {
            id: self.sessions_opened,
            schema: profile.schema.clone(),
            profile,
            data,
        });
    }

    pub fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            tracing::info!(profile = %session.profile.name, "disconnected");
        }
        self.catalog.invalidate();
        self.catalog.set_preferred_schema(None);
    }

    #[must_use]
    pub fn current_schema(&self) -> Option<String> {
        self.session.as_ref().and_then(|session| session.schema.clone())
    }

    pub fn set_current_schema(&mut self, schema: &str) {
        if let Some(session) = self.session.as_mut() {
            session.schema = Some(schema.to_string());
        }
        self.catalog.set_preferred_schema(Some(schema.to_string()));
    }

    /// Deadline for a fresh user-initiated start. The saved preference is
    /// kept for the automatic retry after a timeout.
    #[must_use]
    pub fn initial_timeout(&self) -> Option<Duration> {
        Some(self.config.config().query_timeout())
    }

    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.config.config().page_size
    }

    /// Records an executed query; persistence failures are logged only.
    pub fn record_history(&mut self, query: &str, success: bool) {
        let database = self
            .session
            .as_ref()
            .map(|session| session.data.database_name())
            .unwrap_or_default();
        if let Err(error) = self.history.add(query, success, &database) {
            tracing::warn!(%error, "failed to record query history");
        }
    }
}
