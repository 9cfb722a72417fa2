//! Source catalog capability.
//!
//! The store only needs two questions answered about the source side: which
//! tables a database holds and what one table looks like. Live connectors
//! implement `CatalogAdapter` outside this crate; `FixtureCatalog` is the
//! in-process variant used by tests and by the CLI.

use crate::error::{MetaError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

impl ColumnMeta {
    pub fn new<N: Into<String>, T: Into<String>>(name: N, type_name: T) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            comment: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionMeta {
    pub values: Vec<String>,
}

/// Catalog view of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub database: String,
    pub table: String,
    pub columns: Vec<ColumnMeta>,
    #[serde(default)]
    pub partition_columns: Vec<ColumnMeta>,
    #[serde(default)]
    pub partitions: Vec<PartitionMeta>,
}

impl TableMeta {
    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        !self.partition_columns.is_empty()
    }
}

#[async_trait]
pub trait CatalogAdapter: Send + Sync {
    async fn list_tables(&self, database: &str) -> Result<Vec<String>>;
    async fn get_table_meta(&self, database: &str, table: &str) -> Result<TableMeta>;
}

/// Catalog answered from memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureCatalog {
    tables: BTreeMap<String, BTreeMap<String, TableMeta>>,
}

impl FixtureCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_table(mut self, meta: TableMeta) -> Self {
        self.insert(meta);
        self
    }

    pub fn insert(&mut self, meta: TableMeta) {
        let _ = self
            .tables
            .entry(meta.database.clone())
            .or_default()
            .insert(meta.table.clone(), meta);
    }

    /// Load a fixture from a JSON array of `TableMeta`.
    pub async fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| MetaError::storage(path, e))?;
        let metas: Vec<TableMeta> = serde_json::from_slice(&bytes).map_err(|e| {
            MetaError::catalog(format!("bad catalog fixture {}: {}", path.display(), e))
        })?;
        let mut catalog = Self::new();
        for meta in metas {
            catalog.insert(meta);
        }
        Ok(catalog)
    }
}

#[async_trait]
impl CatalogAdapter for FixtureCatalog {
    async fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        let tables = self
            .tables
            .get(database)
            .ok_or_else(|| MetaError::catalog(format!("database {} not found", database)))?;
        Ok(tables.keys().cloned().collect())
    }

    async fn get_table_meta(&self, database: &str, table: &str) -> Result<TableMeta> {
        self.tables
            .get(database)
            .and_then(|tables| tables.get(table))
            .cloned()
            .ok_or_else(|| MetaError::catalog(format!("table {}.{} not found", database, table)))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub const DB_NAME: &str = "test_db";
    pub const TBL_NON_PARTITIONED: &str = "test_non_partitioned";
    pub const TBL_PARTITIONED: &str = "test_partitioned";

    /// Two tables: one plain, one partitioned by `bar` with a single partition.
    pub fn fixture() -> FixtureCatalog {
        FixtureCatalog::new()
            .with_table(TableMeta {
                database: DB_NAME.to_string(),
                table: TBL_NON_PARTITIONED.to_string(),
                columns: vec![ColumnMeta::new("foo", "string")],
                partition_columns: vec![],
                partitions: vec![],
            })
            .with_table(TableMeta {
                database: DB_NAME.to_string(),
                table: TBL_PARTITIONED.to_string(),
                columns: vec![ColumnMeta::new("foo", "string")],
                partition_columns: vec![ColumnMeta::new("bar", "string")],
                partitions: vec![PartitionMeta {
                    values: vec!["hello_world".to_string()],
                }],
            })
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_fixture_lists_tables_sorted() {
        let catalog = fixture();
        let tables = catalog.list_tables(DB_NAME).await.expect("db exists");
        assert_eq!(tables, vec![TBL_NON_PARTITIONED, TBL_PARTITIONED]);
    }

    #[tokio::test]
    async fn test_fixture_missing_table() {
        let catalog = fixture();
        let err = catalog.get_table_meta(DB_NAME, "nope").await.expect_err("missing");
        assert!(matches!(err, MetaError::Catalog { .. }));
        assert!(catalog.list_tables("other").await.is_err());
    }

    #[tokio::test]
    async fn test_fixture_from_json_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("catalog.json");
        let json = r#"[
            {"database": "db", "table": "t", "columns": [{"name": "id", "type_name": "bigint"}],
             "partition_columns": [{"name": "dt", "type_name": "string"}],
             "partitions": [{"values": ["2021-01"]}, {"values": ["2021-02"]}]}
        ]"#;
        tokio::fs::write(&path, json).await?;

        let catalog = FixtureCatalog::from_json_file(&path).await?;
        let meta = catalog.get_table_meta("db", "t").await?;
        assert!(meta.is_partitioned());
        assert_eq!(meta.partitions.len(), 2);
        Ok(())
    }
}
