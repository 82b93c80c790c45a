use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::data_access::{select_best_schema, ColumnDescriptor, DataAccess, DataAccessError};
use crate::suggestions::MetadataSource;

pub const DEFAULT_CATALOG_TTL: Duration = Duration::from_secs(300);

/// One piece of schema metadata the autocomplete may need.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MetadataKey {
    Schemas,
    Tables { schema: String },
    Columns { schema: String, table: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataEntry {
    Schemas(Vec<String>),
    Tables {
        schema: String,
        tables: Vec<String>,
    },
    Columns {
        schema: String,
        table: String,
        columns: Vec<ColumnDescriptor>,
    },
}

impl MetadataEntry {
    /// An empty answer for `key`, cached so a failing lookup is not
    /// requested again until the entry expires.
    #[must_use]
    pub fn empty_for(key: &MetadataKey) -> Self {
        match key {
            MetadataKey::Schemas => Self::Schemas(Vec::new()),
            MetadataKey::Tables { schema } => Self::Tables {
                schema: schema.clone(),
                tables: Vec::new(),
            },
            MetadataKey::Columns { schema, table } => Self::Columns {
                schema: schema.clone(),
                table: table.clone(),
                columns: Vec::new(),
            },
        }
    }
}

#[derive(Debug)]
struct Cached<T> {
    fetched_at: Instant,
    value: T,
}

impl<T> Cached<T> {
    fn fresh(&self, now: Instant, ttl: Duration) -> Option<&T> {
        (now.saturating_duration_since(self.fetched_at) <= ttl).then_some(&self.value)
    }
}

/// Local, TTL-bounded copy of schema metadata, read synchronously by the
/// autocomplete and filled from background loads.
#[derive(Debug)]
pub struct CatalogCache {
    ttl: Duration,
    preferred_schema: Option<String>,
    schemas: Option<Cached<Vec<String>>>,
    tables: HashMap<String, Cached<Vec<String>>>,
    columns: HashMap<(String, String), Cached<Vec<ColumnDescriptor>>>,
}

impl Default for CatalogCache {
    fn default() -> Self {
        Self::new(DEFAULT_CATALOG_TTL)
    }
}

impl CatalogCache {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            preferred_schema: None,
            schemas: None,
            tables: HashMap::new(),
            columns: HashMap::new(),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Drops every cached entry and the preferred schema.
    pub fn invalidate(&mut self) {
        self.preferred_schema = None;
        self.schemas = None;
        self.tables.clear();
        self.columns.clear();
    }

    pub fn set_preferred_schema(&mut self, schema: Option<String>) {
        self.preferred_schema = schema;
    }

    pub fn store(&mut self, entry: MetadataEntry) {
        self.store_at(entry, Instant::now());
    }

    pub fn store_at(&mut self, entry: MetadataEntry, now: Instant) {
        match entry {
            MetadataEntry::Schemas(schemas) => {
                self.schemas = Some(Cached {
                    fetched_at: now,
                    value: schemas,
                });
            }
            MetadataEntry::Tables { schema, tables } => {
                self.tables.insert(
                    schema,
                    Cached {
                        fetched_at: now,
                        value: tables,
                    },
                );
            }
            MetadataEntry::Columns {
                schema,
                table,
                columns,
            } => {
                self.columns.insert(
                    (schema, table),
                    Cached {
                        fetched_at: now,
                        value: columns,
                    },
                );
            }
        }
    }

    #[must_use]
    pub fn schemas_at(&self, now: Instant) -> Option<Vec<String>> {
        self.schemas
            .as_ref()
            .and_then(|cached| cached.fresh(now, self.ttl))
            .cloned()
    }

    #[must_use]
    pub fn tables_at(&self, schema: &str, now: Instant) -> Option<Vec<String>> {
        self.tables
            .get(schema)
            .and_then(|cached| cached.fresh(now, self.ttl))
            .cloned()
    }

    #[must_use]
    pub fn columns_at(
        &self,
        schema: &str,
        table: &str,
        now: Instant,
    ) -> Option<Vec<ColumnDescriptor>> {
        self.columns
            .get(&(schema.to_string(), table.to_string()))
            .and_then(|cached| cached.fresh(now, self.ttl))
            .cloned()
    }
}

impl MetadataSource for CatalogCache {
    fn current_schema(&self) -> Option<String> {
        self.preferred_schema.clone().or_else(|| {
            self.schemas_at(Instant::now())
                .and_then(|schemas| select_best_schema(&schemas))
        })
    }

    fn schemas(&self) -> Option<Vec<String>> {
        self.schemas_at(Instant::now())
    }

    fn tables(&self, schema: &str) -> Option<Vec<String>> {
        self.tables_at(schema, Instant::now())
    }

    fn columns(&self, schema: &str, table: &str) -> Option<Vec<ColumnDescriptor>> {
        self.columns_at(schema, table, Instant::now())
    }
}

/// Loads `keys` one by one. Ordinary failures become empty entries; the
/// cancellation and deadline sentinels abort the whole load.
pub async fn fetch_metadata(
    data: &dyn DataAccess,
    keys: &[MetadataKey],
) -> Result<Vec<MetadataEntry>, DataAccessError> {
    let mut entries = Vec::with_capacity(keys.len());
    for key in keys {
        let fetched = match key {
            MetadataKey::Schemas => data.get_schemas().await.map(MetadataEntry::Schemas),
            MetadataKey::Tables { schema } => {
                data.get_storage_units(schema)
                    .await
                    .map(|units| MetadataEntry::Tables {
                        schema: schema.clone(),
                        tables: units.into_iter().map(|unit| unit.name).collect(),
                    })
            }
            MetadataKey::Columns { schema, table } => data
                .get_columns(schema, table)
                .await
                .map(|columns| MetadataEntry::Columns {
                    schema: schema.clone(),
                    table: table.clone(),
                    columns,
                }),
        };

        match fetched {
            Ok(entry) => entries.push(entry),
            Err(error @ (DataAccessError::Cancelled | DataAccessError::DeadlineExceeded)) => {
                return Err(error);
            }
            Err(error) => {
                tracing::warn!(?key, %error, "metadata lookup failed");
                entries.push(MetadataEntry::empty_for(key));
            }
        }
    }
    Ok(entries)
}
