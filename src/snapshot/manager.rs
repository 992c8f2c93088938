//! Snapshot manager: load on start, debounced saves, pause and resume
//!
//! Writes are best-effort. A failed write is logged, counted and kept in
//! [`SnapshotStatus::last_error`]; it is never returned to the command that
//! caused it.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{LobbyError, LobbyResult, Result};
use crate::lobby::store::LobbyStore;
use crate::metrics::MetricsCollector;
use crate::snapshot::storage::SnapshotStorage;
use crate::snapshot::Snapshot;
use crate::types::PartitionName;

/// Operational view of persistence
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotStatus {
    pub paused: bool,
    pub writes: u64,
    pub failures: u64,
    pub last_write_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Mutations not yet written
    pub pending: bool,
}

#[derive(Debug, Default)]
struct WriterState {
    last_write: Option<Instant>,
    last_write_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    saved_generation: u64,
    writes: u64,
    failures: u64,
}

pub struct SnapshotManager {
    store: Arc<LobbyStore>,
    storage: Arc<dyn SnapshotStorage>,
    configured: Vec<PartitionName>,
    debounce: Duration,
    state: Mutex<WriterState>,
    write_lock: tokio::sync::Mutex<()>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl SnapshotManager {
    pub fn new(
        store: Arc<LobbyStore>,
        storage: Arc<dyn SnapshotStorage>,
        configured: Vec<PartitionName>,
        debounce: Duration,
    ) -> Self {
        Self {
            store,
            storage,
            configured,
            debounce,
            state: Mutex::new(WriterState::default()),
            write_lock: tokio::sync::Mutex::new(()),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &Arc<LobbyStore> {
        &self.store
    }

    /// Restore the last snapshot, or start every configured partition empty
    ///
    /// Returns the number of lobbies restored.
    pub async fn load_on_start(&self) -> Result<usize> {
        let snapshot = match self.read_valid_snapshot().await {
            Some(snapshot) => snapshot,
            None => {
                info!(
                    "Starting with {} empty partitions",
                    self.configured.len()
                );
                Snapshot::default()
            }
        };

        let restored = snapshot.lobby_count();
        self.store.restore(snapshot, &self.configured)?;
        self.mark_saved();

        info!("Restored {} lobbies from snapshot", restored);
        Ok(restored)
    }

    async fn read_valid_snapshot(&self) -> Option<Snapshot> {
        match self.storage.load().await {
            Ok(Some(snapshot)) => match snapshot.validate(self.store.capacity()) {
                Ok(()) => Some(snapshot),
                Err(e) => {
                    warn!("Ignoring snapshot that violates lobby invariants: {}", e);
                    None
                }
            },
            Ok(None) => {
                info!("No snapshot found");
                None
            }
            Err(e) => {
                warn!("Ignoring unreadable snapshot: {:#}", e);
                None
            }
        }
    }

    fn mark_saved(&self) {
        let generation = self.store.mutation_signal().generation();
        if let Ok(mut state) = self.state.lock() {
            state.saved_generation = generation;
        }
    }

    /// Write the current store immediately
    ///
    /// The error is returned for operator-facing callers; the background
    /// writer only logs it.
    pub async fn save_now(&self) -> LobbyResult<()> {
        let _write = self.write_lock.lock().await;
        let generation = self.store.mutation_signal().generation();
        let started = Instant::now();

        let snapshot = self.store.snapshot().await?;
        let result = self.storage.save(&snapshot).await;
        let elapsed = started.elapsed();

        let mut state = self
            .state
            .lock()
            .map_err(|_| LobbyError::lock_poisoned("snapshot state"))?;
        state.last_write = Some(Instant::now());

        match result {
            Ok(()) => {
                state.saved_generation = generation;
                state.last_write_at = Some(self.store.clock().now());
                state.last_error = None;
                state.writes += 1;
                drop(state);

                if let Some(metrics) = &self.metrics {
                    metrics.persistence.record_write(true, elapsed.as_secs_f64());
                }
                debug!(
                    "Saved snapshot with {} lobbies in {:?}",
                    snapshot.lobby_count(),
                    elapsed
                );
                Ok(())
            }
            Err(e) => {
                let message = format!("{:#}", e);
                state.last_error = Some(message.clone());
                state.failures += 1;
                drop(state);

                if let Some(metrics) = &self.metrics {
                    metrics.persistence.record_write(false, elapsed.as_secs_f64());
                }
                error!("Snapshot write failed: {}", message);
                Err(LobbyError::PersistenceWriteFailed { message })
            }
        }
    }

    fn has_pending(&self) -> bool {
        let generation = self.store.mutation_signal().generation();
        self.state
            .lock()
            .map(|state| state.saved_generation != generation)
            .unwrap_or(true)
    }

    fn remaining_debounce(&self) -> Duration {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.last_write)
            .map(|last| self.debounce.saturating_sub(last.elapsed()))
            .unwrap_or(Duration::ZERO)
    }

    /// Background writer: at most one write per debounce window
    pub async fn run_writer(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let signal = self.store.mutation_signal();
        info!("Snapshot writer started (debounce {:?})", self.debounce);

        loop {
            tokio::select! {
                _ = signal.changed() => {}
                _ = shutdown.changed() => break,
            }

            let wait = self.remaining_debounce();
            if !wait.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown.changed() => break,
                }
            }

            if self.is_paused() || !self.has_pending() {
                continue;
            }
            // failure already logged and recorded
            let _ = self.save_now().await;
        }

        info!("Snapshot writer stopped");
    }

    /// Stop accepting lobby commands and write a snapshot right away
    ///
    /// A command still in flight either lands before the snapshot copies
    /// its partition or fails with `CommandsPaused`.
    pub async fn pause(&self) -> SnapshotStatus {
        self.store.set_paused(true);
        info!("Lobby commands paused, saving snapshot");
        if let Err(e) = self.save_now().await {
            warn!("Snapshot on pause failed: {}", e);
        }
        self.status()
    }

    /// Reload the last snapshot and accept commands again
    ///
    /// If the snapshot cannot be read the in-memory state is kept.
    pub async fn resume(&self) -> LobbyResult<usize> {
        let restored = match self.read_valid_snapshot().await {
            Some(snapshot) => {
                let count = snapshot.lobby_count();
                self.store.restore(snapshot, &self.configured)?;
                self.mark_saved();
                count
            }
            None => {
                warn!("Resuming without reload, keeping in-memory lobbies");
                self.store
                    .counts()
                    .await?
                    .iter()
                    .map(|(_, lobbies, _)| lobbies)
                    .sum()
            }
        };

        self.store.set_paused(false);
        info!("Lobby commands resumed with {} lobbies", restored);
        Ok(restored)
    }

    pub fn is_paused(&self) -> bool {
        self.store.is_paused()
    }

    /// Final write on shutdown, only if something changed
    pub async fn flush(&self) -> LobbyResult<()> {
        if self.has_pending() {
            self.save_now().await
        } else {
            Ok(())
        }
    }

    pub fn status(&self) -> SnapshotStatus {
        let pending = self.has_pending();
        let state = match self.state.lock() {
            Ok(state) => state,
            Err(_) => return SnapshotStatus::default(),
        };
        SnapshotStatus {
            paused: self.is_paused(),
            writes: state.writes,
            failures: state.failures,
            last_write_at: state.last_write_at,
            last_error: state.last_error.clone(),
            pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::snapshot::storage::InMemorySnapshotStorage;
    use crate::types::{Region, Tier};

    const P: &str = "open-lobbies";

    fn setup_with(storage: Arc<InMemorySnapshotStorage>, debounce: Duration) -> Arc<SnapshotManager> {
        let store = Arc::new(LobbyStore::new(&[], 8, Arc::new(ManualClock::default())));
        Arc::new(SnapshotManager::new(
            store,
            storage,
            vec![P.to_string()],
            debounce,
        ))
    }

    fn setup(storage: Arc<InMemorySnapshotStorage>) -> Arc<SnapshotManager> {
        setup_with(storage, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_load_without_snapshot_creates_configured_partitions() {
        let manager = setup(Arc::new(InMemorySnapshotStorage::new()));
        assert_eq!(manager.load_on_start().await.unwrap(), 0);
        assert_eq!(manager.store().partition_names().unwrap(), vec![P.to_string()]);
        assert!(!manager.status().pending);
    }

    #[tokio::test]
    async fn test_invalid_snapshot_falls_back_to_empty() {
        let snapshot: Snapshot = serde_json::from_str(
            r#"{"open-lobbies": {"h1": {"host": "h1", "credential": "na_aaaaa",
                "participants": ["u2"], "region": "NA", "minTier": 3,
                "createdAt": 0, "lastActivityAt": 0}}}"#,
        )
        .unwrap();
        let manager = setup(Arc::new(InMemorySnapshotStorage::with_snapshot(snapshot)));
        assert_eq!(manager.load_on_start().await.unwrap(), 0);
        assert!(manager.store().lobbies(P).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_is_recorded_not_fatal() {
        let storage = Arc::new(InMemorySnapshotStorage::new());
        let manager = setup(storage.clone());
        manager.load_on_start().await.unwrap();

        storage.set_fail_writes(true);
        manager
            .store()
            .create(P, "h1", Region::NA, Tier::MIN)
            .await
            .unwrap();

        let err = manager.save_now().await.unwrap_err();
        assert_eq!(err.tag(), "persistence_write_failed");
        let status = manager.status();
        assert_eq!(status.failures, 1);
        assert!(status.last_error.is_some());
        assert!(status.pending);
    }

    #[tokio::test]
    async fn test_pause_saves_and_resume_reloads() {
        let storage = Arc::new(InMemorySnapshotStorage::new());
        let manager = setup(storage.clone());
        manager.load_on_start().await.unwrap();
        manager
            .store()
            .create(P, "h1", Region::NA, Tier::MIN)
            .await
            .unwrap();

        let status = manager.pause().await;
        assert!(status.paused);
        assert_eq!(storage.write_count(), 1);
        assert_eq!(storage.stored().unwrap().lobby_count(), 1);
        let err = manager
            .store()
            .add_participant(P, "h1", "u2", Tier::MIN)
            .await
            .unwrap_err();
        assert_eq!(err.tag(), "commands_paused");

        // edits made to the file while paused are picked up on resume
        storage.save(&Snapshot::default()).await.unwrap();
        assert_eq!(manager.resume().await.unwrap(), 0);
        assert!(!manager.is_paused());
        assert!(manager.store().find_by_host(P, "h1").await.unwrap().is_none());
        assert!(manager.store().has_partition(P));
    }

    #[tokio::test]
    async fn test_writer_debounces_bursts() {
        let storage = Arc::new(InMemorySnapshotStorage::new());
        let manager = setup_with(storage.clone(), Duration::from_millis(400));
        manager.load_on_start().await.unwrap();

        let (tx, rx) = watch::channel(false);
        let writer = tokio::spawn(manager.clone().run_writer(rx));

        for i in 0..5 {
            manager
                .store()
                .create(P, &format!("h{i}"), Region::EU, Tier::MIN)
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        // first mutation is written immediately, the burst is coalesced
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(storage.write_count(), 1);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(storage.write_count(), 2);
        assert_eq!(storage.stored().unwrap().lobby_count(), 5);

        tx.send(true).unwrap();
        writer.await.unwrap();
    }
}
