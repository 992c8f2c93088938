//! Snapshot storage backends

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use crate::snapshot::Snapshot;

/// Trait for snapshot storage backends
#[async_trait]
pub trait SnapshotStorage: Send + Sync {
    /// Load the most recent snapshot; `Ok(None)` if there is none
    async fn load(&self) -> Result<Option<Snapshot>>;

    /// Persist a snapshot, replacing the previous one
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;
}

/// JSON file storage
///
/// Writes go to a sibling temporary file that is then renamed over the
/// target, so a crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct FileSnapshotStorage {
    path: PathBuf,
}

impl FileSnapshotStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl SnapshotStorage for FileSnapshotStorage {
    async fn load(&self) -> Result<Option<Snapshot>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", self.path.display()))
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let snapshot = serde_json::from_slice(&bytes)
            .with_context(|| format!("Malformed snapshot in {}", self.path.display()))?;
        Ok(Some(snapshot))
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        let temp = self.temp_path();

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&temp, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", temp.display()))?;
        tokio::fs::rename(&temp, &self.path)
            .await
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;

        debug!("Wrote {} bytes to {}", bytes.len(), self.path.display());
        Ok(())
    }
}

/// In-memory storage for tests
#[derive(Debug, Default)]
pub struct InMemorySnapshotStorage {
    stored: RwLock<Option<Snapshot>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl InMemorySnapshotStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            stored: RwLock::new(Some(snapshot)),
            ..Self::default()
        }
    }

    /// Make every subsequent save fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Option<Snapshot> {
        self.stored.read().ok().and_then(|s| s.clone())
    }
}

#[async_trait]
impl SnapshotStorage for InMemorySnapshotStorage {
    async fn load(&self) -> Result<Option<Snapshot>> {
        let stored = self
            .stored
            .read()
            .map_err(|_| anyhow!("Failed to acquire snapshot storage lock"))?;
        Ok(stored.clone())
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("Simulated snapshot write failure"));
        }
        let mut stored = self
            .stored
            .write()
            .map_err(|_| anyhow!("Failed to acquire snapshot storage lock"))?;
        *stored = Some(snapshot.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env::temp_dir;

    fn test_path(name: &str) -> PathBuf {
        temp_dir().join(format!("anteroom_snapshot_test_{}_{}.json", name, uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn test_missing_file_loads_none() {
        let storage = FileSnapshotStorage::new(test_path("missing"));
        assert!(storage.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_file_loads_none() {
        let path = test_path("empty");
        std::fs::write(&path, "  \n").unwrap();
        let storage = FileSnapshotStorage::new(&path);
        assert!(storage.load().await.unwrap().is_none());
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_malformed_file_is_an_error() {
        let path = test_path("malformed");
        std::fs::write(&path, "{ not json").unwrap();
        let storage = FileSnapshotStorage::new(&path);
        assert!(storage.load().await.is_err());
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let path = test_path("roundtrip");
        let storage = FileSnapshotStorage::new(&path);
        let mut snapshot = Snapshot::default();
        snapshot.insert_partition("p".to_string(), Default::default());

        storage.save(&snapshot).await.unwrap();
        assert!(!storage.temp_path().exists());
        assert_eq!(storage.load().await.unwrap(), Some(snapshot));
        std::fs::remove_file(&path).ok();
    }

    #[tokio::test]
    async fn test_in_memory_failure_injection() {
        let storage = InMemorySnapshotStorage::new();
        storage.set_fail_writes(true);
        assert!(storage.save(&Snapshot::default()).await.is_err());
        assert_eq!(storage.write_count(), 0);

        storage.set_fail_writes(false);
        storage.save(&Snapshot::default()).await.unwrap();
        assert_eq!(storage.write_count(), 1);
        assert_eq!(storage.stored(), Some(Snapshot::default()));
    }
}
