//! Metastore - durable state for table migration jobs
//!
//! Tracks, for every source table being migrated, its status, retry count
//! and per-partition progress in a plain directory tree:
//!
//! ```text
//! <root>/<database>/<table>/
//!     metadata              "<STATUS>\n<retryCount>\n"
//!     config                job configuration and schema snapshot (JSON)
//!     partitions_all        known partitions, one per line
//!     partitions_succeeded
//!     partitions_failed
//! ```
//!
//! `JobStore` owns the tree. `JobRegistry` is the process-level handle the
//! scheduler holds. The source catalog is reached through `CatalogAdapter`.

pub mod catalog;
pub mod config;
pub mod error;
pub mod job;
pub mod partition;
pub mod record;
pub mod registry;
pub mod status;
pub mod store;

pub use catalog::{CatalogAdapter, ColumnMeta, FixtureCatalog, PartitionMeta, TableMeta};
pub use config::{AdditionalTableConfig, StoreOptions, TableMigrationConfig, TableSchema};
pub use error::{MetaError, Result};
pub use job::{JobKey, MigrationJob};
pub use partition::{PartitionKey, PartitionLedger, PartitionOutcome};
pub use record::{HostDirStore, MemoryStore, RecordKind, RecordLock, RecordStore};
pub use registry::JobRegistry;
pub use status::{JobState, MigrationStatus};
pub use store::{AddOutcome, JobStore, PendingTable};
