use std::sync::Arc;

use async_trait::async_trait;
use dbrowse_core::config::{ConnectionProfile, DatabaseKind};
use dbrowse_core::data_access::{Connector, DataAccess, DataAccessError};

use crate::mysql::MysqlDataAccess;
use crate::sqlite::SqliteDataAccess;

/// Opens profiles with the driver matching their kind.
#[derive(Debug, Clone, Default)]
pub struct DriverConnector;

#[async_trait]
impl Connector for DriverConnector {
    async fn connect(
        &self,
        profile: &ConnectionProfile,
    ) -> Result<Arc<dyn DataAccess>, DataAccessError> {
        match profile.kind {
            DatabaseKind::Mysql => {
                let access = MysqlDataAccess::connect(profile).await?;
                Ok(Arc::new(access))
            }
            DatabaseKind::Sqlite => {
                let path = profile
                    .database
                    .clone()
                    .filter(|path| !path.trim().is_empty())
                    .ok_or_else(|| {
                        DataAccessError::backend(format!(
                            "profile `{}` has no SQLite file path",
                            profile.name
                        ))
                    })?;
                let access = SqliteDataAccess::open_async(path).await?;
                Ok(Arc::new(access))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use dbrowse_core::config::ConnectionProfile;
    use dbrowse_core::data_access::{Connector, DataAccessError};

    use super::DriverConnector;

    #[tokio::test]
    async fn sqlite_profile_opens_file() {
        let temp_dir = tempfile::TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("shop.db");
        let profile = ConnectionProfile::sqlite("shop", path.display().to_string());

        let access = DriverConnector
            .connect(&profile)
            .await
            .expect("sqlite connect should succeed");
        assert_eq!(access.database_name(), "shop");
    }

    #[tokio::test]
    async fn sqlite_profile_without_path_fails() {
        let mut profile = ConnectionProfile::sqlite("broken", "");
        profile.database = None;

        let error = DriverConnector
            .connect(&profile)
            .await
            .expect_err("missing path should fail");
        assert!(matches!(error, DataAccessError::Backend(message) if message.contains("broken")));
    }
}
