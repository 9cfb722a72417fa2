//! Job identity and the listing view of a job.

use crate::config::TableMigrationConfig;
use crate::error::{MetaError, Result};
use crate::status::JobState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a migration job: one source table.
///
/// Each part becomes one directory level under the store root, so both
/// must be valid single path components.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub database: String,
    pub table: String,
}

impl JobKey {
    pub fn new<D: Into<String>, T: Into<String>>(database: D, table: T) -> Result<Self> {
        let database = database.into();
        let table = table.into();
        validate_component(&database)?;
        validate_component(&table)?;
        Ok(Self { database, table })
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.table)
    }
}

fn validate_component(value: &str) -> Result<()> {
    let reason = if value.is_empty() {
        "must not be empty"
    } else if value == "." || value == ".." {
        "must not be a relative path component"
    } else if value.starts_with('.') {
        "must not start with '.'"
    } else if value.contains(['/', '\\', '\0']) {
        "must not contain path separators or NUL"
    } else {
        return Ok(());
    };
    Err(MetaError::InvalidJobKey {
        value: value.to_string(),
        reason,
    })
}

/// One entry of `list_migration_jobs`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationJob {
    pub key: JobKey,
    pub state: JobState,
    pub config: TableMigrationConfig,
}
