use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use metastore::{AddOutcome, FixtureCatalog, TableMigrationConfig};

use crate::common::StoreContext;

/// Parse a job file holding one `TableMigrationConfig` or an array of them.
pub fn parse_job_file(text: &str) -> Result<Vec<TableMigrationConfig>> {
    let value: serde_json::Value = serde_json::from_str(text).context("job file is not JSON")?;
    let configs = if value.is_array() {
        serde_json::from_value(value)?
    } else {
        vec![serde_json::from_value(value)?]
    };
    Ok(configs)
}

/// Submit or resubmit jobs, resolving schemas through a catalog fixture.
///
/// Every job is attempted; the command fails afterwards if any job did.
pub async fn add_command(
    ctx: &StoreContext,
    catalog_path: &Path,
    jobs_path: &Path,
    out: &mut impl Write,
) -> Result<()> {
    let catalog = FixtureCatalog::from_json_file(catalog_path)
        .await
        .map_err(|e| anyhow!("Failed to load catalog {}: {}", catalog_path.display(), e))?;
    let text = tokio::fs::read_to_string(jobs_path)
        .await
        .with_context(|| format!("Failed to read {}", jobs_path.display()))?;
    let configs = parse_job_file(&text)?;

    let store = ctx.open_with_catalog(Arc::new(catalog)).await?;
    let mut failures = 0;
    for config in &configs {
        let name = format!("{}.{}", config.source_database, config.source_table);
        match store.add_migration_job(config).await {
            Ok(AddOutcome::Created) => writeln!(out, "created   {}", name)?,
            Ok(AddOutcome::Restarted { new_partitions }) => {
                writeln!(out, "restarted {} (+{} partitions)", name, new_partitions)?
            }
            Err(e) => {
                failures += 1;
                diagnostics::error!("failed to add {name}: {error}", name: name.as_str(), error: e.to_string());
                writeln!(out, "failed    {}: {}", name, e)?;
            }
        }
    }

    if failures > 0 {
        return Err(anyhow!("{} of {} jobs could not be added", failures, configs.len()));
    }
    Ok(())
}
