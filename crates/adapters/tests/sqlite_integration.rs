use std::sync::Arc;

use dbrowse_adapters::connector::DriverConnector;
use dbrowse_adapters::sqlite::SqliteDataAccess;
use dbrowse_core::catalog::{fetch_metadata, MetadataEntry, MetadataKey};
use dbrowse_core::config::ConnectionProfile;
use dbrowse_core::data_access::{Connector, DataAccess};
use dbrowse_core::filter::{FilterOperator, RowFilter, WhereCondition};
use dbrowse_core::operation::{guarded, CancellationToken, Outcome};

async fn seeded() -> Arc<dyn DataAccess> {
    let access = SqliteDataAccess::open_async(":memory:".to_string())
        .await
        .expect("in-memory sqlite should open");
    access
        .execute_query(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL, age INTEGER)",
        )
        .await
        .expect("create should succeed");
    let inserted = access
        .execute_query(
            "INSERT INTO users (id, email, age) VALUES \
             (1, 'a@example.com', 22), (2, 'b@example.com', NULL), (3, 'c@example.com', 41)",
        )
        .await
        .expect("insert should succeed");
    assert_eq!(inserted.affected_rows, Some(3));
    Arc::new(access)
}

#[tokio::test]
async fn sqlite_lists_schema_tables_and_columns() {
    let access = seeded().await;

    let schemas = access.get_schemas().await.expect("schemas should load");
    assert_eq!(schemas.first().map(String::as_str), Some("main"));

    let tables = access
        .get_storage_units("main")
        .await
        .expect("tables should load");
    assert_eq!(tables.len(), 1);
    assert_eq!(tables[0].name, "users");
    assert_eq!(tables[0].kind, "TABLE");

    let columns = access
        .get_columns("main", "users")
        .await
        .expect("columns should load");
    let names = columns
        .iter()
        .map(|column| column.name.as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, ["id", "email", "age"]);
    assert!(!columns[1].nullable);
    assert!(columns[2].nullable);
}

#[tokio::test]
async fn sqlite_queries_and_pages_with_filters() {
    let access = seeded().await;

    let result = access
        .execute_query("SELECT id, email, age FROM users ORDER BY id")
        .await
        .expect("select should succeed");
    assert_eq!(result.columns, ["id", "email", "age"]);
    assert_eq!(result.row_count(), 3);
    assert_eq!(result.rows[1][2], "NULL");

    let filter = RowFilter {
        conditions: vec![WhereCondition::new("age", FilterOperator::Gt, "30")],
    };
    let page = access
        .get_rows("main", "users", &filter, 10, 0)
        .await
        .expect("filtered page should load");
    assert_eq!(page.row_count(), 1);
    assert_eq!(page.rows[0][1], "c@example.com");

    let second_page = access
        .get_rows("main", "users", &RowFilter::default(), 2, 2)
        .await
        .expect("second page should load");
    assert_eq!(second_page.row_count(), 1);

    let error = access
        .execute_query("SELEC nonsense")
        .await
        .expect_err("syntax error should fail");
    assert!(error.to_string().contains("syntax"));
}

#[tokio::test]
async fn sqlite_feeds_catalog_loads_and_guarded_calls() {
    let access = seeded().await;

    let entries = fetch_metadata(
        access.as_ref(),
        &[
            MetadataKey::Tables {
                schema: "main".to_string(),
            },
            MetadataKey::Columns {
                schema: "main".to_string(),
                table: "missing".to_string(),
            },
        ],
    )
    .await
    .expect("metadata should load");
    assert_eq!(
        entries[0],
        MetadataEntry::Tables {
            schema: "main".to_string(),
            tables: vec!["users".to_string()],
        }
    );
    assert_eq!(
        entries[1],
        MetadataEntry::Columns {
            schema: "main".to_string(),
            table: "missing".to_string(),
            columns: Vec::new(),
        }
    );

    let token = CancellationToken::new(Some(std::time::Duration::from_secs(5)));
    let outcome = guarded(token, access.execute_query("SELECT COUNT(*) FROM users")).await;
    let Outcome::Success(result) = outcome else {
        panic!("count should succeed, got {outcome:?}");
    };
    assert_eq!(result.rows[0][0], "3");
}

#[tokio::test]
async fn connector_opens_sqlite_profiles() {
    let temp_dir = tempfile::TempDir::new().expect("failed to create temp dir");
    let path = temp_dir.path().join("inventory.sqlite");
    let profile = ConnectionProfile::sqlite("inventory", path.display().to_string());

    let access = DriverConnector
        .connect(&profile)
        .await
        .expect("connect should succeed");
    access
        .execute_query("CREATE TABLE items (sku TEXT)")
        .await
        .expect("create should succeed");
    assert_eq!(access.database_name(), "inventory");
    assert!(path.exists());
}
