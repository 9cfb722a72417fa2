use std::io::Write;

use anyhow::Result;
use metastore::MigrationStatus;

use crate::common::StoreContext;

pub async fn status_command(
    ctx: &StoreContext,
    database: &str,
    table: &str,
    out: &mut impl Write,
) -> Result<()> {
    let store = ctx.open().await?;
    let state = store.get_state(database, table).await?;
    let config = store.get_config(database, table).await?;
    writeln!(out, "{}.{}", database, table)?;
    writeln!(out, "  status:      {}", state.status)?;
    writeln!(out, "  retries:     {} of {}", state.retry_count, config.retry_limit())?;
    writeln!(out, "  destination: {}.{}", config.dest_project, config.dest_table)?;

    let ledger = store.get_partition_ledger(database, table).await?;
    if !ledger.all.is_empty() {
        writeln!(
            out,
            "  partitions:  {} known, {} succeeded, {} failed, {} pending",
            ledger.all.len(),
            ledger.succeeded.len(),
            ledger.failed.len(),
            ledger.pending().len()
        )?;
    }
    Ok(())
}

pub async fn update_command(
    ctx: &StoreContext,
    database: &str,
    table: &str,
    event: MigrationStatus,
    out: &mut impl Write,
) -> Result<()> {
    let store = ctx.open().await?;
    let state = store.update_status(database, table, event).await?;
    writeln!(out, "{}.{} {} {}", database, table, state.status, state.retry_count)?;
    Ok(())
}

pub async fn remove_command(
    ctx: &StoreContext,
    database: &str,
    table: &str,
    out: &mut impl Write,
) -> Result<()> {
    let store = ctx.open().await?;
    store.remove_migration_job(database, table).await?;
    writeln!(out, "removed {}.{}", database, table)?;
    Ok(())
}
