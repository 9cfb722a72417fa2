use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use metastore::{
    CatalogAdapter, FixtureCatalog, JobStore, MigrationJob, StoreOptions, config::ROOT_ENV_VAR,
};

/// Where the store lives, resolved from `--root` or `MMA_META_ROOT`.
#[derive(Debug, Clone)]
pub struct StoreContext {
    pub options: StoreOptions,
}

impl StoreContext {
    pub fn from_override(root: Option<PathBuf>) -> Result<Self> {
        let options = StoreOptions::with_override(root)
            .ok_or_else(|| anyhow!("{} environment variable not set and no --root given", ROOT_ENV_VAR))?;
        Ok(Self { options })
    }

    /// Open the store for commands that never consult the catalog.
    pub async fn open(&self) -> Result<JobStore> {
        self.open_with_catalog(Arc::new(FixtureCatalog::new())).await
    }

    pub async fn open_with_catalog(&self, catalog: Arc<dyn CatalogAdapter>) -> Result<JobStore> {
        JobStore::open(&self.options, catalog)
            .await
            .map_err(|e| anyhow!("Failed to open job store at {}: {}", self.options.root.display(), e))
    }
}

/// One line per job: `db.table STATUS retries -> project.table`
pub fn format_job_line(job: &MigrationJob) -> String {
    format!(
        "{:<40} {:<9} {:>3} -> {}.{}",
        job.key.to_string(),
        job.state.status,
        job.state.retry_count,
        job.config.dest_project,
        job.config.dest_table
    )
}
