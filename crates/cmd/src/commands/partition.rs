use std::io::Write;

use anyhow::{Result, anyhow};
use metastore::{PartitionKey, PartitionOutcome};

use crate::common::StoreContext;

/// Parse `-p` arguments, written in the same form as the partition files
/// (`2021,01` for a two-column partition).
pub fn parse_partition_args(args: &[String]) -> Result<Vec<Vec<String>>> {
    args.iter()
        .map(|arg| {
            PartitionKey::decode(arg)
                .map(PartitionKey::into_values)
                .map_err(|e| anyhow!("bad partition {:?}: {}", arg, e))
        })
        .collect()
}

pub async fn partition_command(
    ctx: &StoreContext,
    database: &str,
    table: &str,
    outcome: PartitionOutcome,
    partitions: &[String],
    out: &mut impl Write,
) -> Result<()> {
    let values = parse_partition_args(partitions)?;
    let store = ctx.open().await?;
    store
        .update_partition_status(database, table, &values, outcome)
        .await?;
    writeln!(
        out,
        "{}.{}: {} partitions marked {:?}",
        database,
        table,
        values.len(),
        outcome
    )?;
    Ok(())
}

pub async fn reset_partitions_command(
    ctx: &StoreContext,
    database: &str,
    table: &str,
    out: &mut impl Write,
) -> Result<()> {
    let store = ctx.open().await?;
    store.reset_partition_outcomes(database, table).await?;
    writeln!(out, "{}.{}: partition outcomes cleared", database, table)?;
    Ok(())
}
