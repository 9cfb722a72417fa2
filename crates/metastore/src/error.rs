// Error types for metadata store operations
use crate::job::JobKey;
use crate::record::RecordKind;
use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, MetaError>;

#[derive(Debug, thiserror::Error)]
pub enum MetaError {
    #[error("Migration job not found: {key}")]
    JobNotFound { key: JobKey },

    #[error("Migration job {key} is still active ({status}); wait for it to finish before resubmitting")]
    JobActive {
        key: JobKey,
        status: crate::status::MigrationStatus,
    },

    #[error("Job registry is already initialized")]
    AlreadyInitialized,

    #[error("Job registry is not initialized")]
    NotInitialized,

    #[error("Storage unavailable at {path}: {source}")]
    StorageUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt {record} record for {key}: {reason}")]
    CorruptRecord {
        key: JobKey,
        record: RecordKind,
        reason: String,
    },

    #[error("Invalid job key component {value:?}: {reason}")]
    InvalidJobKey { value: String, reason: &'static str },

    #[error("Invalid partition: {reason}")]
    InvalidPartition { reason: String },

    #[error("Partition {partition} is not known to job {key}")]
    UnknownPartition { key: JobKey, partition: String },

    #[error("Migration job {key} has no partition columns")]
    NotPartitioned { key: JobKey },

    #[error("Catalog error: {message}")]
    Catalog { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MetaError {
    pub fn job_not_found(key: &JobKey) -> Self {
        MetaError::JobNotFound { key: key.clone() }
    }

    pub fn storage<P: AsRef<Path>>(path: P, source: std::io::Error) -> Self {
        MetaError::StorageUnavailable {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn corrupt<S: Into<String>>(key: &JobKey, record: RecordKind, reason: S) -> Self {
        MetaError::CorruptRecord {
            key: key.clone(),
            record,
            reason: reason.into(),
        }
    }

    pub fn catalog<S: Into<String>>(message: S) -> Self {
        MetaError::Catalog {
            message: message.into(),
        }
    }

    /// True for the error kinds a caller may want to quarantine a job over.
    #[must_use]
    pub fn is_corrupt(&self) -> bool {
        matches!(self, MetaError::CorruptRecord { .. })
    }
}
