use super::{RecordKind, RecordStore};
use crate::error::Result;
use crate::job::JobKey;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

/// In-memory record store for tests and dry runs.
///
/// Every operation holds the map lock for its whole duration, which makes
/// each write trivially atomic.
#[derive(Clone, Default)]
pub struct MemoryStore {
    jobs: Arc<Mutex<BTreeMap<JobKey, HashMap<RecordKind, Vec<u8>>>>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn read(&self, key: &JobKey, kind: RecordKind) -> Result<Option<Vec<u8>>> {
        let jobs = self.jobs.lock().await;
        Ok(jobs.get(key).and_then(|records| records.get(&kind)).cloned())
    }

    async fn write(&self, key: &JobKey, kind: RecordKind, data: &[u8]) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        let _ = jobs
            .entry(key.clone())
            .or_default()
            .insert(kind, data.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &JobKey, kind: RecordKind) -> Result<()> {
        let mut jobs = self.jobs.lock().await;
        if let Some(records) = jobs.get_mut(key) {
            let _ = records.remove(&kind);
        }
        Ok(())
    }

    async fn remove_job(&self, key: &JobKey) -> Result<bool> {
        let mut jobs = self.jobs.lock().await;
        Ok(jobs.remove(key).is_some())
    }

    async fn list_jobs(&self) -> Result<Vec<JobKey>> {
        let jobs = self.jobs.lock().await;
        Ok(jobs
            .iter()
            .filter(|(_, records)| records.contains_key(&RecordKind::Metadata))
            .map(|(key, _)| key.clone())
            .collect())
    }
}
