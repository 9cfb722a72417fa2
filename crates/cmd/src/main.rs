use std::io::Write;
use std::path::PathBuf;

use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use metastore::{MigrationStatus, PartitionOutcome};

use cmd::commands;
use cmd::common::StoreContext;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "mma-meta")]
struct Cli {
    /// Store root directory (overrides MMA_META_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit jobs from a JSON file (one config or an array of them)
    Add {
        /// JSON array of table descriptions standing in for the source catalog
        #[arg(long)]
        catalog: PathBuf,
        /// Job configuration file
        #[arg(long)]
        config: PathBuf,
    },
    /// Delete a job and all its records
    Remove { database: String, table: String },
    /// Show status, retries and partition progress of one job
    Status { database: String, table: String },
    /// Apply a status event (PENDING, RUNNING, SUCCEEDED, FAILED)
    Update {
        database: String,
        table: String,
        event: MigrationStatus,
    },
    /// Record partition outcomes (SUCCEEDED or FAILED)
    Partition {
        database: String,
        table: String,
        outcome: MigrationStatus,
        /// Partition values, comma separated for multi-column partitions
        #[arg(short = 'p', long = "partition", required = true)]
        partitions: Vec<String>,
    },
    /// Clear succeeded and failed partition lists of a finished job
    ResetPartitions { database: String, table: String },
    /// List jobs
    List {
        #[arg(long)]
        status: Option<MigrationStatus>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show pending tables with their schema and pending partitions
    Pending {
        /// Print the records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check that every job's records are readable
    Check,
}

async fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    let ctx = StoreContext::from_override(cli.root)?;
    match cli.command {
        Commands::Add { catalog, config } => {
            commands::add_command(&ctx, &catalog, &config, out).await
        }
        Commands::Remove { database, table } => {
            commands::remove_command(&ctx, &database, &table, out).await
        }
        Commands::Status { database, table } => {
            commands::status_command(&ctx, &database, &table, out).await
        }
        Commands::Update {
            database,
            table,
            event,
        } => commands::update_command(&ctx, &database, &table, event, out).await,
        Commands::Partition {
            database,
            table,
            outcome,
            partitions,
        } => {
            let outcome = PartitionOutcome::try_from(outcome).map_err(|e| anyhow!("{}", e))?;
            commands::partition_command(&ctx, &database, &table, outcome, &partitions, out).await
        }
        Commands::ResetPartitions { database, table } => {
            commands::reset_partitions_command(&ctx, &database, &table, out).await
        }
        Commands::List { status, limit } => commands::list_command(&ctx, status, limit, out).await,
        Commands::Pending { json } => commands::pending_command(&ctx, json, out).await,
        Commands::Check => commands::check_command(&ctx, out).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    diagnostics::init();

    let cli = Cli::parse();
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run(cli, &mut out).await
}
