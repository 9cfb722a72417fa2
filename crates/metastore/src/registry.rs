//! Process-level handle over the job store.
//!
//! The registry is an explicit value the service constructs at startup and
//! passes to whoever needs it. It enforces the lifecycle: one `init` before
//! use, `teardown` before a second `init`.

use crate::catalog::CatalogAdapter;
use crate::config::StoreOptions;
use crate::error::{MetaError, Result};
use crate::job::MigrationJob;
use crate::status::MigrationStatus;
use crate::store::{JobStore, PendingTable};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Default)]
pub struct JobRegistry {
    // Holds a complete value or nothing, so a poisoned lock is still sound
    store: RwLock<Option<Arc<JobStore>>>,
}

impl JobRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the store at `options.root` and install it.
    pub async fn init(&self, options: &StoreOptions, catalog: Arc<dyn CatalogAdapter>) -> Result<()> {
        if self.is_initialized() {
            return Err(MetaError::AlreadyInitialized);
        }
        let store = JobStore::open(options, catalog).await?;
        self.init_with_store(store)
    }

    /// Install an already constructed store.
    pub fn init_with_store(&self, store: JobStore) -> Result<()> {
        let mut slot = self.store.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(MetaError::AlreadyInitialized);
        }
        *slot = Some(Arc::new(store));
        Ok(())
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The installed store. Callers keep the `Arc` for the duration of a call.
    pub fn store(&self) -> Result<Arc<JobStore>> {
        self.store
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(MetaError::NotInitialized)
    }

    /// Drop the installed store. Calls already holding it finish normally.
    pub fn teardown(&self) -> Result<()> {
        let mut slot = self.store.write().unwrap_or_else(PoisonError::into_inner);
        slot.take().map(|_| ()).ok_or(MetaError::NotInitialized)
    }

    pub async fn list_migration_jobs(
        &self,
        status_filter: Option<MigrationStatus>,
        limit: i64,
    ) -> Result<Vec<MigrationJob>> {
        self.store()?.list_migration_jobs(status_filter, limit).await
    }

    pub async fn get_pending_tables(&self) -> Result<Vec<PendingTable>> {
        self.store()?.get_pending_tables().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::fixture;
    use crate::record::MemoryStore;
    use tokio_test::{assert_err, assert_ok};

    fn memory_store() -> JobStore {
        JobStore::with_records(Arc::new(MemoryStore::new()), Arc::new(fixture()))
    }

    #[tokio::test]
    async fn test_not_initialized() {
        let registry = JobRegistry::new();
        assert!(matches!(registry.store(), Err(MetaError::NotInitialized)));
        assert!(matches!(
            registry.get_pending_tables().await,
            Err(MetaError::NotInitialized)
        ));
        assert_err!(registry.teardown());
    }

    #[tokio::test]
    async fn test_double_init_rejected_until_teardown() {
        let registry = JobRegistry::new();
        assert_ok!(registry.init_with_store(memory_store()));
        assert!(matches!(
            registry.init_with_store(memory_store()),
            Err(MetaError::AlreadyInitialized)
        ));

        assert_ok!(registry.teardown());
        assert!(!registry.is_initialized());
        assert_ok!(registry.init_with_store(memory_store()));
    }

    #[tokio::test]
    async fn test_poisoned_slot_still_usable() {
        let registry = Arc::new(JobRegistry::new());
        assert_ok!(registry.init_with_store(memory_store()));

        let poisoner = Arc::clone(&registry);
        let panicked = std::thread::spawn(move || {
            let _slot = poisoner.store.write();
            panic!("writer died");
        })
        .join();
        assert!(panicked.is_err());
        assert!(registry.store.is_poisoned());

        assert!(registry.is_initialized());
        assert_ok!(registry.store());
        assert_ok!(registry.teardown());
        assert!(matches!(registry.store(), Err(MetaError::NotInitialized)));
    }

    #[tokio::test]
    async fn test_init_opens_host_store() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let registry = JobRegistry::new();
        let options = StoreOptions::new(tmp.path().join(".mma"));
        registry.init(&options, Arc::new(fixture())).await?;
        assert!(options.root.is_dir());
        assert!(registry.list_migration_jobs(None, -1).await?.is_empty());

        let again = registry.init(&options, Arc::new(fixture())).await;
        assert!(matches!(again, Err(MetaError::AlreadyInitialized)));
        Ok(())
    }
}
