//! Record storage: a small key-value layer under the job store.
//!
//! A job owns a fixed set of named records. Backends guarantee that a
//! `write` replaces a record atomically: a concurrent `read` sees either the
//! previous bytes or the new bytes, never a mix.

use crate::error::Result;
use crate::job::JobKey;
use async_trait::async_trait;
use std::fmt;

mod hostdir;
mod memory;

pub use hostdir::HostDirStore;
pub use memory::MemoryStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    /// Status and retry count. Its presence marks a job as existing.
    Metadata,
    Config,
    PartitionsAll,
    PartitionsSucceeded,
    PartitionsFailed,
}

impl RecordKind {
    pub const ALL: [RecordKind; 5] = [
        RecordKind::Metadata,
        RecordKind::Config,
        RecordKind::PartitionsAll,
        RecordKind::PartitionsSucceeded,
        RecordKind::PartitionsFailed,
    ];

    /// File name of the record inside the job directory.
    #[must_use]
    pub fn file_name(&self) -> &'static str {
        match self {
            RecordKind::Metadata => "metadata",
            RecordKind::Config => "config",
            RecordKind::PartitionsAll => "partitions_all",
            RecordKind::PartitionsSucceeded => "partitions_succeeded",
            RecordKind::PartitionsFailed => "partitions_failed",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file_name())
    }
}

/// Cross-process hold on one job, released when dropped.
///
/// Backends without other writers hand out an empty lock.
#[derive(Debug, Default)]
pub struct RecordLock {
    _file: Option<std::fs::File>,
}

impl RecordLock {
    /// Wrap a file that is already locked exclusively.
    #[must_use]
    pub fn from_locked_file(file: std::fs::File) -> Self {
        Self { _file: Some(file) }
    }
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read a record. `None` if the record does not exist.
    async fn read(&self, key: &JobKey, kind: RecordKind) -> Result<Option<Vec<u8>>>;

    /// Atomically create or replace a record, creating the job if needed.
    async fn write(&self, key: &JobKey, kind: RecordKind, data: &[u8]) -> Result<()>;

    /// Delete one record. Missing records are not an error.
    async fn delete(&self, key: &JobKey, kind: RecordKind) -> Result<()>;

    /// Delete a job and all of its records. Returns whether anything existed.
    async fn remove_job(&self, key: &JobKey) -> Result<bool>;

    /// Every job holding a `Metadata` record, sorted by key.
    async fn list_jobs(&self) -> Result<Vec<JobKey>>;

    /// Exclude other processes from mutating `key` until the lock is dropped.
    async fn lock_job(&self, _key: &JobKey) -> Result<RecordLock> {
        Ok(RecordLock::default())
    }

    /// Drop scratch files an interrupted write left in the job. Must be
    /// called with the job locked. Returns how many were removed.
    async fn sweep_job(&self, _key: &JobKey) -> Result<usize> {
        Ok(0)
    }
}
