use std::io::Write;

use anyhow::{Result, anyhow};
use metastore::MigrationStatus;

use crate::common::{StoreContext, format_job_line};

pub async fn list_command(
    ctx: &StoreContext,
    status: Option<MigrationStatus>,
    limit: Option<usize>,
    out: &mut impl Write,
) -> Result<()> {
    let store = ctx.open().await?;
    let limit = limit.map_or(-1, |n| i64::try_from(n).unwrap_or(i64::MAX));
    for job in store.list_migration_jobs(status, limit).await? {
        writeln!(out, "{}", format_job_line(&job))?;
    }
    Ok(())
}

/// Print pending work: one line per table, indented partition lines below,
/// or the full records as a JSON array.
pub async fn pending_command(ctx: &StoreContext, json: bool, out: &mut impl Write) -> Result<()> {
    let store = ctx.open().await?;
    let tables = store.get_pending_tables().await?;
    if json {
        serde_json::to_writer_pretty(&mut *out, &tables)?;
        writeln!(out)?;
        return Ok(());
    }
    for pending in &tables {
        let meta = &pending.meta;
        writeln!(
            out,
            "{}.{} -> {}.{} ({} columns, {} partitions pending)",
            meta.database,
            meta.table,
            pending.config.dest_project,
            pending.config.dest_table,
            meta.columns.len(),
            meta.partitions.len()
        )?;
        for partition in &meta.partitions {
            writeln!(out, "  {}", partition.values.join("/"))?;
        }
    }
    Ok(())
}

/// Report jobs whose records no longer parse. Fails if any are found.
pub async fn check_command(ctx: &StoreContext, out: &mut impl Write) -> Result<()> {
    let store = ctx.open().await?;
    let broken = store.verify_jobs().await?;
    for (key, err) in &broken {
        writeln!(out, "{}: {}", key, err)?;
    }
    if broken.is_empty() {
        writeln!(out, "all jobs readable")?;
        Ok(())
    } else {
        Err(anyhow!("{} jobs have unreadable records", broken.len()))
    }
}
