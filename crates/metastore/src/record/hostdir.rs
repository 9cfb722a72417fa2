//! Records as files in a host directory tree.
//!
//! Layout: `<root>/<database>/<table>/<record file>`. Writes go to a hidden
//! scratch file in the job directory, are synced, then renamed over the
//! target. Cross-process job locks live apart from the job directories in
//! `<root>/.locks/<database>/<table>.lock` so removing a job never unlinks a
//! lock file another process is waiting on. Lock files outlive their jobs.

use super::{RecordKind, RecordLock, RecordStore};
use crate::error::{MetaError, Result};
use crate::job::JobKey;
use async_trait::async_trait;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const LOCK_DIR: &str = ".locks";
const SCRATCH_PREFIX: &str = ".mma-tmp-";

pub struct HostDirStore {
    root: PathBuf,
}

impl HostDirStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| MetaError::storage(&root, e))?;
        let meta = tokio::fs::metadata(&root)
            .await
            .map_err(|e| MetaError::storage(&root, e))?;
        if !meta.is_dir() {
            return Err(MetaError::storage(
                &root,
                std::io::Error::new(ErrorKind::NotADirectory, "store root is not a directory"),
            ));
        }
        diagnostics::debug!("opened record store at {root}", root: root.display().to_string());
        Ok(Self { root })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn job_dir(&self, key: &JobKey) -> PathBuf {
        self.root.join(&key.database).join(&key.table)
    }

    #[must_use]
    pub fn record_path(&self, key: &JobKey, kind: RecordKind) -> PathBuf {
        self.job_dir(key).join(kind.file_name())
    }

    #[must_use]
    pub fn lock_path(&self, key: &JobKey) -> PathBuf {
        self.root
            .join(LOCK_DIR)
            .join(&key.database)
            .join(format!("{}.lock", key.table))
    }

    /// Sorted names of visible subdirectories of `dir`.
    async fn subdirs(dir: &Path) -> std::io::Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            if entry.file_type().await?.is_dir() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

fn write_atomic(dir: &Path, target: &Path, data: &[u8]) -> std::io::Result<()> {
    let mut temp = tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .tempfile_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    let _ = temp.persist(target).map_err(|e| e.error)?;
    sync_dir(dir)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

fn lock_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(path)?;
    file.lock()?;
    Ok(file)
}

async fn run_blocking<T, F>(f: F) -> std::io::Result<T>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(std::io::Error::other)?
}

#[async_trait]
impl RecordStore for HostDirStore {
    async fn read(&self, key: &JobKey, kind: RecordKind) -> Result<Option<Vec<u8>>> {
        let path = self.record_path(key, kind);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MetaError::storage(&path, e)),
        }
    }

    async fn write(&self, key: &JobKey, kind: RecordKind, data: &[u8]) -> Result<()> {
        let dir = self.job_dir(key);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| MetaError::storage(&dir, e))?;
        let target = dir.join(kind.file_name());
        let (scratch_dir, dest, bytes) = (dir.clone(), target.clone(), data.to_vec());
        run_blocking(move || write_atomic(&scratch_dir, &dest, &bytes))
            .await
            .map_err(|e| MetaError::storage(&target, e))?;
        diagnostics::debug!(
            "wrote {record} for {key} ({bytes} bytes)",
            record: kind.file_name(),
            key: key.to_string(),
            bytes: data.len()
        );
        Ok(())
    }

    async fn delete(&self, key: &JobKey, kind: RecordKind) -> Result<()> {
        let path = self.record_path(key, kind);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MetaError::storage(&path, e)),
        }
    }

    async fn remove_job(&self, key: &JobKey) -> Result<bool> {
        let dir = self.job_dir(key);

        // Metadata goes first and durably: from then on the job no longer
        // exists, whatever part of the directory a crash leaves behind.
        let metadata = self.record_path(key, RecordKind::Metadata);
        let had_metadata = match tokio::fs::remove_file(&metadata).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(MetaError::storage(&metadata, e)),
        };
        if had_metadata {
            let synced = dir.clone();
            run_blocking(move || sync_dir(&synced))
                .await
                .map_err(|e| MetaError::storage(&dir, e))?;
        }

        let had_dir = match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(MetaError::storage(&dir, e)),
        };
        let existed = had_metadata || had_dir;

        // Prune the database directory once its last table is gone. Losing a
        // race with a concurrent create is fine.
        let db_dir = self.root.join(&key.database);
        if let Err(e) = tokio::fs::remove_dir(&db_dir).await {
            diagnostics::debug!(
                "kept database dir {dir}: {error}",
                dir: db_dir.display().to_string(),
                error: e.to_string()
            );
        }
        Ok(existed)
    }

    async fn list_jobs(&self) -> Result<Vec<JobKey>> {
        let databases = Self::subdirs(&self.root)
            .await
            .map_err(|e| MetaError::storage(&self.root, e))?;

        let mut keys = Vec::new();
        for database in databases {
            let db_dir = self.root.join(&database);
            let tables = match Self::subdirs(&db_dir).await {
                Ok(tables) => tables,
                // Removed underneath us
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(MetaError::storage(&db_dir, e)),
            };
            for table in tables {
                let Ok(key) = JobKey::new(database.as_str(), table.as_str()) else {
                    diagnostics::warn!(
                        "skipping foreign directory {db}/{table}",
                        db: database.as_str(),
                        table: table.as_str()
                    );
                    continue;
                };
                let metadata = self.record_path(&key, RecordKind::Metadata);
                match tokio::fs::try_exists(&metadata).await {
                    Ok(true) => keys.push(key),
                    Ok(false) => {}
                    Err(e) => return Err(MetaError::storage(&metadata, e)),
                }
            }
        }
        Ok(keys)
    }

    async fn lock_job(&self, key: &JobKey) -> Result<RecordLock> {
        let path = self.lock_path(key);
        let locked = path.clone();
        let file = run_blocking(move || lock_file(&locked))
            .await
            .map_err(|e| MetaError::storage(&path, e))?;
        Ok(RecordLock::from_locked_file(file))
    }

    async fn sweep_job(&self, key: &JobKey) -> Result<usize> {
        let dir = self.job_dir(key);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(MetaError::storage(&dir, e)),
        };
        let mut removed = 0;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MetaError::storage(&dir, e))?
        {
            if !entry.file_name().to_string_lossy().starts_with(SCRATCH_PREFIX) {
                continue;
            }
            let path = entry.path();
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(MetaError::storage(&path, e)),
            }
        }
        if removed > 0 {
            diagnostics::warn!(
                "removed {count} interrupted writes from {key}",
                count: removed,
                key: key.to_string()
            );
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn key(db: &str, table: &str) -> JobKey {
        JobKey::new(db, table).expect("valid key")
    }

    #[tokio::test]
    async fn test_write_read_replace() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let store = HostDirStore::open(tmp.path().join("meta")).await?;
        let k = key("db", "t");

        assert_eq!(store.read(&k, RecordKind::Config).await?, None);
        store.write(&k, RecordKind::Config, b"one").await?;
        store.write(&k, RecordKind::Config, b"two").await?;
        assert_eq!(store.read(&k, RecordKind::Config).await?, Some(b"two".to_vec()));

        let on_disk = tokio::fs::read(tmp.path().join("meta/db/t/config")).await?;
        assert_eq!(on_disk, b"two");
        Ok(())
    }

    #[tokio::test]
    async fn test_no_temp_files_left_behind() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let store = HostDirStore::open(tmp.path()).await?;
        let k = key("db", "t");
        for i in 0..5 {
            store.write(&k, RecordKind::Metadata, format!("PENDING\n{i}\n").as_bytes()).await?;
        }

        let mut entries = tokio::fs::read_dir(store.job_dir(&k)).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["metadata"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_requires_metadata() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let store = HostDirStore::open(tmp.path()).await?;
        store.write(&key("b", "t"), RecordKind::Metadata, b"PENDING\n0\n").await?;
        store.write(&key("a", "t"), RecordKind::Metadata, b"PENDING\n0\n").await?;
        // Half-created job: config but no metadata yet
        store.write(&key("a", "half"), RecordKind::Config, b"{}").await?;
        tokio::fs::create_dir_all(tmp.path().join(".hidden/x")).await?;

        assert_eq!(store.list_jobs().await?, vec![key("a", "t"), key("b", "t")]);
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_job_is_idempotent() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let store = HostDirStore::open(tmp.path()).await?;
        let k = key("db", "t");
        store.write(&k, RecordKind::Metadata, b"PENDING\n0\n").await?;

        assert!(store.remove_job(&k).await?);
        assert!(!store.remove_job(&k).await?);
        assert!(!tmp.path().join("db").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_job_after_interrupted_remove() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let store = HostDirStore::open(tmp.path()).await?;
        let k = key("db", "t");
        store.write(&k, RecordKind::Config, b"{}").await?;

        // Metadata already gone: the job is invisible but the directory remains
        assert!(store.list_jobs().await?.is_empty());
        assert!(store.remove_job(&k).await?);
        assert!(!store.job_dir(&k).exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_sweep_removes_scratch_files() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let store = HostDirStore::open(tmp.path()).await?;
        let k = key("db", "t");
        assert_eq!(store.sweep_job(&k).await?, 0);

        store.write(&k, RecordKind::Metadata, b"PENDING\n0\n").await?;
        let dir = store.job_dir(&k);
        tokio::fs::write(dir.join(".mma-tmp-abc123"), b"half").await?;
        tokio::fs::write(dir.join(".mma-tmp-def456"), b"").await?;

        assert_eq!(store.sweep_job(&k).await?, 2);
        assert!(dir.join("metadata").exists());
        assert!(!dir.join(".mma-tmp-abc123").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_lock_job_excludes_other_handles() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let store = HostDirStore::open(tmp.path()).await?;
        let k = key("db", "t");
        let path = store.lock_path(&k);

        let held = store.lock_job(&k).await?;
        assert!(path.starts_with(tmp.path().join(".locks")));
        let other = std::fs::OpenOptions::new().write(true).open(&path)?;
        assert!(other.try_lock().is_err());

        drop(held);
        assert!(other.try_lock().is_ok());
        other.unlock()?;

        // Lock files never make a job visible
        assert!(store.list_jobs().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_open_rejects_file_root() -> anyhow::Result<()> {
        let tmp = tempdir()?;
        let file = tmp.path().join("not_a_dir");
        tokio::fs::write(&file, b"x").await?;
        let err = HostDirStore::open(&file).await.err().expect("should fail");
        assert!(matches!(err, MetaError::StorageUnavailable { .. }));
        Ok(())
    }
}
