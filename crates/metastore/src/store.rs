//! The job store: durable migration job state on top of a `RecordStore`.
//!
//! Every mutation of a job runs under that job's lock and is made of whole
//! record replacements, so readers never lock and never see a torn record.
//! The `metadata` record is always written last when a job is created or
//! resubmitted; a job without it does not exist as far as queries go.

use crate::catalog::{CatalogAdapter, PartitionMeta, TableMeta};
use crate::config::{JobConfigRecord, StoreOptions, TableMigrationConfig, TableSchema};
use crate::error::{MetaError, Result};
use crate::job::{JobKey, MigrationJob};
use crate::partition::{
    KeySet, PartitionKey, PartitionLedger, PartitionOutcome, decode_list, encode_list,
};
use crate::record::{HostDirStore, RecordKind, RecordLock, RecordStore};
use crate::status::{JobState, MigrationStatus, transition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// What `add_migration_job` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Created,
    /// A terminal job was reset to PENDING; `new_partitions` were merged in.
    Restarted { new_partitions: usize },
}

/// A PENDING job together with the work it still has.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTable {
    pub config: TableMigrationConfig,
    /// Schema snapshot; `partitions` holds only partitions not yet succeeded.
    pub meta: TableMeta,
}

/// Per-job async locks, created on first use.
#[derive(Default)]
struct JobLocks {
    locks: Mutex<HashMap<JobKey, Arc<Mutex<()>>>>,
}

impl JobLocks {
    async fn acquire(&self, key: &JobKey) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(locks.entry(key.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Drop the entry for `key` unless someone holds or waits on it.
    async fn forget(&self, key: &JobKey) {
        let mut locks = self.locks.lock().await;
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            let _ = locks.remove(key);
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.locks.lock().await.len()
    }
}

/// Exclusive hold on one job: the in-process mutex first, then the
/// backend's cross-process lock.
struct JobGuard {
    _record: RecordLock,
    _local: OwnedMutexGuard<()>,
}

pub struct JobStore {
    records: Arc<dyn RecordStore>,
    catalog: Arc<dyn CatalogAdapter>,
    locks: JobLocks,
}

impl JobStore {
    /// Open a store over a host directory, creating the root if needed.
    pub async fn open(options: &StoreOptions, catalog: Arc<dyn CatalogAdapter>) -> Result<Self> {
        let records = HostDirStore::open(&options.root).await?;
        diagnostics::info!("job store opened at {root}", root: options.root.display().to_string());
        Ok(Self::with_records(Arc::new(records), catalog))
    }

    /// Build a store over any record backend.
    pub fn with_records(records: Arc<dyn RecordStore>, catalog: Arc<dyn CatalogAdapter>) -> Self {
        Self {
            records,
            catalog,
            locks: JobLocks::default(),
        }
    }

    /// Create a job, or resubmit one that has finished.
    ///
    /// Resubmission resets status and retry count, merges any new partitions
    /// into the known set and keeps the succeeded/failed history. A job that
    /// is still PENDING or RUNNING is rejected with `JobActive`.
    pub async fn add_migration_job(&self, config: &TableMigrationConfig) -> Result<AddOutcome> {
        let key = config.job_key()?;
        let meta = self
            .catalog
            .get_table_meta(&key.database, &key.table)
            .await?;
        let schema = TableSchema::from(&meta);
        let supplied = supplied_partitions(&key, config, &meta, &schema)?;
        let record = JobConfigRecord {
            migration: config.clone(),
            schema,
        };

        let _guard = self.lock_job(&key).await?;
        match self.read_state(&key).await? {
            None => {
                self.create_job(&key, &record, supplied).await?;
                diagnostics::info!("created migration job {key}", key: key.to_string());
                Ok(AddOutcome::Created)
            }
            Some(state) if state.status.is_terminal() => {
                let added = self.restart_job(&key, &record, supplied).await?;
                diagnostics::info!(
                    "restarted migration job {key} from {status} with {added} new partitions",
                    key: key.to_string(),
                    status: state.status.as_str(),
                    added: added
                );
                Ok(AddOutcome::Restarted {
                    new_partitions: added,
                })
            }
            Some(state) => Err(MetaError::JobActive {
                key,
                status: state.status,
            }),
        }
    }

    async fn create_job(
        &self,
        key: &JobKey,
        record: &JobConfigRecord,
        partitions: Vec<PartitionKey>,
    ) -> Result<()> {
        let _ = self.records.sweep_job(key).await?;
        // Leftovers from an interrupted create or remove must not leak in
        for kind in [
            RecordKind::PartitionsAll,
            RecordKind::PartitionsSucceeded,
            RecordKind::PartitionsFailed,
        ] {
            self.records.delete(key, kind).await?;
        }
        self.records
            .write(key, RecordKind::Config, &record.to_bytes()?)
            .await?;
        if record.schema.is_partitioned() {
            let all = KeySet::from_keys(partitions);
            self.write_keys(key, RecordKind::PartitionsAll, all.as_slice())
                .await?;
        }
        self.write_state(key, JobState::initial()).await
    }

    async fn restart_job(
        &self,
        key: &JobKey,
        record: &JobConfigRecord,
        partitions: Vec<PartitionKey>,
    ) -> Result<usize> {
        let _ = self.records.sweep_job(key).await?;
        let mut added = 0;
        if record.schema.is_partitioned() {
            let mut all = KeySet::from_keys(self.read_keys(key, RecordKind::PartitionsAll).await?);
            added = all.extend(partitions);
            self.write_keys(key, RecordKind::PartitionsAll, all.as_slice())
                .await?;
        }
        self.records
            .write(key, RecordKind::Config, &record.to_bytes()?)
            .await?;
        self.write_state(key, JobState::initial()).await?;
        Ok(added)
    }

    /// Delete a job and all its records. Removing a missing job succeeds.
    pub async fn remove_migration_job(&self, database: &str, table: &str) -> Result<()> {
        let key = JobKey::new(database, table)?;
        let guard = self.lock_job(&key).await?;
        let removed = self.records.remove_job(&key).await?;
        drop(guard);
        self.locks.forget(&key).await;
        if removed {
            diagnostics::info!("removed migration job {key}", key: key.to_string());
        } else {
            diagnostics::debug!("remove of absent job {key}", key: key.to_string());
        }
        Ok(())
    }

    pub async fn get_status(&self, database: &str, table: &str) -> Result<MigrationStatus> {
        Ok(self.get_state(database, table).await?.status)
    }

    /// Status and retry count, read together.
    pub async fn get_state(&self, database: &str, table: &str) -> Result<JobState> {
        let key = JobKey::new(database, table)?;
        self.require_state(&key).await
    }

    pub async fn get_config(&self, database: &str, table: &str) -> Result<TableMigrationConfig> {
        let key = JobKey::new(database, table)?;
        let _ = self.require_state(&key).await?;
        Ok(self.read_config(&key).await?.migration)
    }

    /// Apply a table-level status event and persist the resulting state.
    pub async fn update_status(
        &self,
        database: &str,
        table: &str,
        event: MigrationStatus,
    ) -> Result<JobState> {
        let key = JobKey::new(database, table)?;
        let _guard = self.lock_job(&key).await?;
        let current = self.require_state(&key).await?;
        let retry_limit = self.read_config(&key).await?.migration.retry_limit();
        let next = transition(current, event, retry_limit);
        self.write_state(&key, next).await?;
        diagnostics::debug!(
            "{key}: {event} moved {from}/{from_count} to {to}/{to_count}",
            key: key.to_string(),
            event: event.as_str(),
            from: current.status.as_str(),
            from_count: current.retry_count,
            to: next.status.as_str(),
            to_count: next.retry_count
        );
        Ok(next)
    }

    /// Record an outcome for some partitions of a job.
    ///
    /// Table-level status is not touched. Either every listed partition is
    /// recorded or, if one is unknown to the job, none are.
    pub async fn update_partition_status(
        &self,
        database: &str,
        table: &str,
        partitions: &[Vec<String>],
        outcome: PartitionOutcome,
    ) -> Result<()> {
        let key = JobKey::new(database, table)?;
        let keys = partitions
            .iter()
            .map(|values| PartitionKey::new(values.iter().cloned()))
            .collect::<Result<Vec<_>>>()?;

        let _guard = self.lock_job(&key).await?;
        let _ = self.require_state(&key).await?;
        if !self.read_config(&key).await?.schema.is_partitioned() {
            return Err(MetaError::NotPartitioned { key });
        }

        let mut ledger = self.read_ledger(&key).await?;
        let added = ledger
            .record(outcome, &keys)
            .map_err(|unknown| MetaError::UnknownPartition {
                key: key.clone(),
                partition: unknown.to_string(),
            })?;
        if added > 0 {
            let (kind, set) = match outcome {
                PartitionOutcome::Succeeded => (RecordKind::PartitionsSucceeded, &ledger.succeeded),
                PartitionOutcome::Failed => (RecordKind::PartitionsFailed, &ledger.failed),
            };
            self.write_keys(&key, kind, set.as_slice()).await?;
        }
        diagnostics::debug!(
            "{key}: marked {count} partitions {outcome} ({added} new)",
            key: key.to_string(),
            count: keys.len(),
            outcome: format!("{:?}", outcome),
            added: added
        );
        Ok(())
    }

    /// Forget which partitions succeeded or failed. The known set is kept.
    pub async fn reset_partition_outcomes(&self, database: &str, table: &str) -> Result<()> {
        let key = JobKey::new(database, table)?;
        let _guard = self.lock_job(&key).await?;
        let state = self.require_state(&key).await?;
        if state.status == MigrationStatus::Running {
            return Err(MetaError::JobActive {
                key,
                status: state.status,
            });
        }
        self.records
            .delete(&key, RecordKind::PartitionsSucceeded)
            .await?;
        self.records.delete(&key, RecordKind::PartitionsFailed).await?;
        diagnostics::info!("cleared partition outcomes of {key}", key: key.to_string());
        Ok(())
    }

    pub async fn get_partition_ledger(&self, database: &str, table: &str) -> Result<PartitionLedger> {
        let key = JobKey::new(database, table)?;
        let _ = self.require_state(&key).await?;
        self.read_ledger(&key).await
    }

    /// Jobs in key order, optionally only those with `status_filter`.
    ///
    /// A negative `limit` means no limit. Jobs whose records cannot be
    /// parsed are logged and left out; `verify_jobs` reports them.
    pub async fn list_migration_jobs(
        &self,
        status_filter: Option<MigrationStatus>,
        limit: i64,
    ) -> Result<Vec<MigrationJob>> {
        let limit = usize::try_from(limit).ok();
        let mut jobs = Vec::new();
        for key in self.records.list_jobs().await? {
            if limit.is_some_and(|limit| jobs.len() >= limit) {
                break;
            }
            let Some((state, record)) = self.load_job_for_listing(&key).await? else {
                continue;
            };
            if status_filter.is_some_and(|wanted| wanted != state.status) {
                continue;
            }
            jobs.push(MigrationJob {
                key,
                state,
                config: record.migration,
            });
        }
        Ok(jobs)
    }

    /// Every PENDING job with the partitions it still has to migrate.
    pub async fn get_pending_tables(&self) -> Result<Vec<PendingTable>> {
        let mut pending = Vec::new();
        for key in self.records.list_jobs().await? {
            let Some((state, record)) = self.load_job_for_listing(&key).await? else {
                continue;
            };
            if state.status != MigrationStatus::Pending {
                continue;
            }
            let partitions = if record.schema.is_partitioned() {
                let ledger = match self.read_ledger(&key).await {
                    Ok(ledger) => ledger,
                    Err(e) if e.is_corrupt() => {
                        diagnostics::error!(
                            "skipping job {key}: {error}",
                            key: key.to_string(),
                            error: e.to_string()
                        );
                        continue;
                    }
                    Err(e) => return Err(e),
                };
                ledger
                    .pending()
                    .into_iter()
                    .map(|k| PartitionMeta {
                        values: k.into_values(),
                    })
                    .collect()
            } else {
                Vec::new()
            };
            pending.push(PendingTable {
                meta: TableMeta {
                    database: key.database,
                    table: key.table,
                    columns: record.schema.columns,
                    partition_columns: record.schema.partition_columns,
                    partitions,
                },
                config: record.migration,
            });
        }
        Ok(pending)
    }

    /// Check every job's records, returning the ones that fail to load.
    pub async fn verify_jobs(&self) -> Result<Vec<(JobKey, MetaError)>> {
        let mut broken = Vec::new();
        for key in self.records.list_jobs().await? {
            match self.check_job(&key).await {
                Ok(()) | Err(MetaError::JobNotFound { .. }) => {}
                Err(e) => broken.push((key, e)),
            }
        }
        Ok(broken)
    }

    async fn lock_job(&self, key: &JobKey) -> Result<JobGuard> {
        let local = self.locks.acquire(key).await;
        let record = self.records.lock_job(key).await?;
        Ok(JobGuard {
            _record: record,
            _local: local,
        })
    }

    async fn check_job(&self, key: &JobKey) -> Result<()> {
        let _ = self.require_state(key).await?;
        let _ = self.read_config(key).await?;
        let _ = self.read_ledger(key).await?;
        Ok(())
    }

    async fn load_job(&self, key: &JobKey) -> Result<Option<(JobState, JobConfigRecord)>> {
        let Some(state) = self.read_state(key).await? else {
            return Ok(None);
        };
        Ok(Some((state, self.read_config(key).await?)))
    }

    async fn load_job_for_listing(
        &self,
        key: &JobKey,
    ) -> Result<Option<(JobState, JobConfigRecord)>> {
        match self.load_job(key).await {
            Err(e) if e.is_corrupt() => {
                diagnostics::error!(
                    "skipping job {key}: {error}",
                    key: key.to_string(),
                    error: e.to_string()
                );
                Ok(None)
            }
            other => other,
        }
    }

    async fn read_state(&self, key: &JobKey) -> Result<Option<JobState>> {
        let Some(bytes) = self.records.read(key, RecordKind::Metadata).await? else {
            return Ok(None);
        };
        let text = String::from_utf8(bytes)
            .map_err(|_| MetaError::corrupt(key, RecordKind::Metadata, "not valid UTF-8"))?;
        JobState::decode(&text)
            .map(Some)
            .map_err(|reason| MetaError::corrupt(key, RecordKind::Metadata, reason))
    }

    async fn require_state(&self, key: &JobKey) -> Result<JobState> {
        self.read_state(key)
            .await?
            .ok_or_else(|| MetaError::job_not_found(key))
    }

    async fn write_state(&self, key: &JobKey, state: JobState) -> Result<()> {
        self.records
            .write(key, RecordKind::Metadata, state.encode().as_bytes())
            .await
    }

    async fn read_config(&self, key: &JobKey) -> Result<JobConfigRecord> {
        let bytes = self
            .records
            .read(key, RecordKind::Config)
            .await?
            .ok_or_else(|| MetaError::corrupt(key, RecordKind::Config, "record is missing"))?;
        JobConfigRecord::from_bytes(&bytes)
            .map_err(|reason| MetaError::corrupt(key, RecordKind::Config, reason))
    }

    async fn read_keys(&self, key: &JobKey, kind: RecordKind) -> Result<Vec<PartitionKey>> {
        let Some(bytes) = self.records.read(key, kind).await? else {
            return Ok(Vec::new());
        };
        let text =
            String::from_utf8(bytes).map_err(|_| MetaError::corrupt(key, kind, "not valid UTF-8"))?;
        decode_list(&text).map_err(|reason| MetaError::corrupt(key, kind, reason))
    }

    async fn write_keys(&self, key: &JobKey, kind: RecordKind, keys: &[PartitionKey]) -> Result<()> {
        self.records
            .write(key, kind, encode_list(keys).as_bytes())
            .await
    }

    async fn read_ledger(&self, key: &JobKey) -> Result<PartitionLedger> {
        Ok(PartitionLedger {
            all: KeySet::from_keys(self.read_keys(key, RecordKind::PartitionsAll).await?),
            succeeded: KeySet::from_keys(
                self.read_keys(key, RecordKind::PartitionsSucceeded).await?,
            ),
            failed: KeySet::from_keys(self.read_keys(key, RecordKind::PartitionsFailed).await?),
        })
    }
}

/// Partitions a submission brings: the explicit list if given, else the
/// catalog's. Each tuple must match the table's partition columns.
fn supplied_partitions(
    key: &JobKey,
    config: &TableMigrationConfig,
    meta: &TableMeta,
    schema: &TableSchema,
) -> Result<Vec<PartitionKey>> {
    if !schema.is_partitioned() {
        if config.partition_values.as_ref().is_some_and(|p| !p.is_empty()) {
            diagnostics::warn!(
                "ignoring partitions given for non-partitioned table {key}",
                key: key.to_string()
            );
        }
        return Ok(Vec::new());
    }

    let tuples: Vec<Vec<String>> = match &config.partition_values {
        Some(explicit) => explicit.clone(),
        None => meta.partitions.iter().map(|p| p.values.clone()).collect(),
    };
    let width = schema.partition_columns.len();
    tuples
        .into_iter()
        .map(|values| {
            if values.len() != width {
                return Err(MetaError::InvalidPartition {
                    reason: format!(
                        "{} has {} partition columns but got values {:?}",
                        key, width, values
                    ),
                });
            }
            PartitionKey::new(values)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::{DB_NAME, TBL_NON_PARTITIONED, TBL_PARTITIONED, fixture};
    use crate::record::MemoryStore;

    fn memory_store() -> JobStore {
        JobStore::with_records(Arc::new(MemoryStore::new()), Arc::new(fixture()))
    }

    #[tokio::test]
    async fn test_add_then_active_readd_is_rejected() -> anyhow::Result<()> {
        let store = memory_store();
        let config = TableMigrationConfig::same_name(DB_NAME, TBL_PARTITIONED);
        assert_eq!(store.add_migration_job(&config).await?, AddOutcome::Created);

        let err = store.add_migration_job(&config).await.expect_err("still pending");
        assert!(matches!(err, MetaError::JobActive { status: MigrationStatus::Pending, .. }));

        let _ = store
            .update_status(DB_NAME, TBL_PARTITIONED, MigrationStatus::Running)
            .await?;
        let err = store.add_migration_job(&config).await.expect_err("running");
        assert!(matches!(err, MetaError::JobActive { status: MigrationStatus::Running, .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_prunes_lock_table() -> anyhow::Result<()> {
        let store = memory_store();
        for table in [TBL_PARTITIONED, TBL_NON_PARTITIONED] {
            let _ = store
                .add_migration_job(&TableMigrationConfig::same_name(DB_NAME, table))
                .await?;
        }
        assert_eq!(store.locks.len().await, 2);

        store.remove_migration_job(DB_NAME, TBL_PARTITIONED).await?;
        assert_eq!(store.locks.len().await, 1);

        // An entry somebody holds survives
        let key = JobKey::new(DB_NAME, TBL_NON_PARTITIONED)?;
        let held = store.locks.acquire(&key).await;
        store.locks.forget(&key).await;
        assert_eq!(store.locks.len().await, 1);
        drop(held);
        store.locks.forget(&key).await;
        assert_eq!(store.locks.len().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_partition_arity_checked() {
        let store = memory_store();
        let config = TableMigrationConfig::same_name(DB_NAME, TBL_PARTITIONED)
            .with_partitions(vec![vec!["a".to_string(), "b".to_string()]]);
        let err = store.add_migration_job(&config).await.expect_err("arity");
        assert!(matches!(err, MetaError::InvalidPartition { .. }));
        assert!(store.get_status(DB_NAME, TBL_PARTITIONED).await.is_err());
    }

    #[tokio::test]
    async fn test_partition_update_on_plain_table() -> anyhow::Result<()> {
        let store = memory_store();
        let _ = store
            .add_migration_job(&TableMigrationConfig::same_name(DB_NAME, TBL_NON_PARTITIONED))
            .await?;
        let err = store
            .update_partition_status(
                DB_NAME,
                TBL_NON_PARTITIONED,
                &[vec!["x".to_string()]],
                PartitionOutcome::Succeeded,
            )
            .await
            .expect_err("not partitioned");
        assert!(matches!(err, MetaError::NotPartitioned { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_partition_is_all_or_nothing() -> anyhow::Result<()> {
        let store = memory_store();
        let _ = store
            .add_migration_job(&TableMigrationConfig::same_name(DB_NAME, TBL_PARTITIONED))
            .await?;
        let err = store
            .update_partition_status(
                DB_NAME,
                TBL_PARTITIONED,
                &[vec!["hello_world".to_string()], vec!["nope".to_string()]],
                PartitionOutcome::Succeeded,
            )
            .await
            .expect_err("unknown partition");
        assert!(matches!(err, MetaError::UnknownPartition { .. }));

        let ledger = store.get_partition_ledger(DB_NAME, TBL_PARTITIONED).await?;
        assert!(ledger.succeeded.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_list_limit_and_filter() -> anyhow::Result<()> {
        let store = memory_store();
        for table in [TBL_NON_PARTITIONED, TBL_PARTITIONED] {
            let _ = store
                .add_migration_job(&TableMigrationConfig::same_name(DB_NAME, table))
                .await?;
        }
        let _ = store
            .update_status(DB_NAME, TBL_PARTITIONED, MigrationStatus::Succeeded)
            .await?;

        assert_eq!(store.list_migration_jobs(None, -1).await?.len(), 2);
        assert_eq!(store.list_migration_jobs(None, 1).await?.len(), 1);
        assert!(store.list_migration_jobs(None, 0).await?.is_empty());

        let done = store
            .list_migration_jobs(Some(MigrationStatus::Succeeded), -1)
            .await?;
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].key.table, TBL_PARTITIONED);
        Ok(())
    }

    #[tokio::test]
    async fn test_corrupt_metadata_is_reported_not_fatal() -> anyhow::Result<()> {
        let records = Arc::new(MemoryStore::new());
        let store = JobStore::with_records(records.clone(), Arc::new(fixture()));
        let _ = store
            .add_migration_job(&TableMigrationConfig::same_name(DB_NAME, TBL_PARTITIONED))
            .await?;
        let key = JobKey::new(DB_NAME, TBL_PARTITIONED)?;
        records
            .write(&key, RecordKind::Metadata, b"SOMETHING\nweird\n")
            .await?;

        let err = store.get_status(DB_NAME, TBL_PARTITIONED).await.expect_err("corrupt");
        assert!(err.is_corrupt());
        assert!(store.list_migration_jobs(None, -1).await?.is_empty());

        let broken = store.verify_jobs().await?;
        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].0, key);
        Ok(())
    }

    #[tokio::test]
    async fn test_reset_partition_outcomes() -> anyhow::Result<()> {
        let store = memory_store();
        let _ = store
            .add_migration_job(&TableMigrationConfig::same_name(DB_NAME, TBL_PARTITIONED))
            .await?;
        store
            .update_partition_status(
                DB_NAME,
                TBL_PARTITIONED,
                &[vec!["hello_world".to_string()]],
                PartitionOutcome::Succeeded,
            )
            .await?;

        let _ = store
            .update_status(DB_NAME, TBL_PARTITIONED, MigrationStatus::Running)
            .await?;
        assert!(store.reset_partition_outcomes(DB_NAME, TBL_PARTITIONED).await.is_err());

        let _ = store
            .update_status(DB_NAME, TBL_PARTITIONED, MigrationStatus::Succeeded)
            .await?;
        store.reset_partition_outcomes(DB_NAME, TBL_PARTITIONED).await?;
        let ledger = store.get_partition_ledger(DB_NAME, TBL_PARTITIONED).await?;
        assert!(ledger.succeeded.is_empty());
        assert_eq!(ledger.all.len(), 1);
        Ok(())
    }
}
