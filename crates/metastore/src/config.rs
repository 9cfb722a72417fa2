//! Job and store configuration.

use crate::catalog::{ColumnMeta, TableMeta};
use crate::error::Result;
use crate::job::JobKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Environment variable naming the store root when no path is given.
pub const ROOT_ENV_VAR: &str = "MMA_META_ROOT";

/// Where the store keeps its directory tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOptions {
    pub root: PathBuf,
}

impl StoreOptions {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    /// Use `root` when given, otherwise `MMA_META_ROOT`.
    pub fn with_override(root: Option<PathBuf>) -> Option<Self> {
        root.or_else(|| std::env::var_os(ROOT_ENV_VAR).map(PathBuf::from))
            .map(Self::new)
    }
}

/// Per-table knobs. Anything the store does not interpret lives in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditionalTableConfig {
    #[serde(default)]
    pub partition_filter: Option<String>,
    #[serde(default)]
    pub destination_storage: Option<String>,
    #[serde(default = "default_partition_group_size")]
    pub partition_group_size: u32,
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

fn default_partition_group_size() -> u32 {
    10
}

fn default_retry_limit() -> u32 {
    1
}

impl Default for AdditionalTableConfig {
    fn default() -> Self {
        Self {
            partition_filter: None,
            destination_storage: None,
            partition_group_size: default_partition_group_size(),
            retry_limit: default_retry_limit(),
            extra: BTreeMap::new(),
        }
    }
}

/// A request to migrate one source table into one destination table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMigrationConfig {
    pub source_database: String,
    pub source_table: String,
    pub dest_project: String,
    pub dest_table: String,
    /// Explicit partition value tuples. `None` means "ask the catalog".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition_values: Option<Vec<Vec<String>>>,
    #[serde(default)]
    pub additional: AdditionalTableConfig,
}

impl TableMigrationConfig {
    /// Migrate `db.table` to a destination of the same name.
    pub fn same_name<D: Into<String>, T: Into<String>>(database: D, table: T) -> Self {
        let database = database.into();
        let table = table.into();
        Self {
            dest_project: database.clone(),
            dest_table: table.clone(),
            source_database: database,
            source_table: table,
            partition_values: None,
            additional: AdditionalTableConfig::default(),
        }
    }

    #[must_use]
    pub fn with_partitions(mut self, partitions: Vec<Vec<String>>) -> Self {
        self.partition_values = Some(partitions);
        self
    }

    #[must_use]
    pub fn with_retry_limit(mut self, retry_limit: u32) -> Self {
        self.additional.retry_limit = retry_limit;
        self
    }

    pub fn job_key(&self) -> Result<JobKey> {
        JobKey::new(self.source_database.as_str(), self.source_table.as_str())
    }

    #[must_use]
    pub fn retry_limit(&self) -> u32 {
        self.additional.retry_limit
    }
}

/// Column layout captured from the catalog when a job is (re)submitted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnMeta>,
    #[serde(default)]
    pub partition_columns: Vec<ColumnMeta>,
}

impl TableSchema {
    #[must_use]
    pub fn is_partitioned(&self) -> bool {
        !self.partition_columns.is_empty()
    }
}

impl From<&TableMeta> for TableSchema {
    fn from(meta: &TableMeta) -> Self {
        Self {
            columns: meta.columns.clone(),
            partition_columns: meta.partition_columns.clone(),
        }
    }
}

/// Contents of a job's `config` record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobConfigRecord {
    pub migration: TableMigrationConfig,
    pub schema: TableSchema,
}

impl JobConfigRecord {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, String> {
        serde_json::from_slice(bytes).map_err(|e| e.to_string())
    }
}
