//! Shared fixtures for integration tests

#![allow(dead_code)]

use anteroom::amqp::MockEventPublisher;
use anteroom::clock::ManualClock;
use anteroom::config::{LeagueSettings, LobbySettings};
use anteroom::error::Result;
use anteroom::lobby::{LobbyManager, LobbyStore, StaticPartitionProvider};
use anteroom::rank::{TierLookup, TimedTierLookup};
use anteroom::snapshot::{InMemorySnapshotStorage, SnapshotManager, SnapshotStorage};
use anteroom::types::{JoinTarget, Region, Tier, TierInfo};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const OPEN: &str = "open-lobbies";
pub const OPEN_NA: &str = "open-lobbies-na";
pub const OPEN_EU: &str = "open-lobbies-eu";
pub const BISHOP: &str = "bishop-lobbies";

/// Tier lookup with per-participant tiers, an optional fallback tier and an
/// artificial delay to widen race windows
#[derive(Default)]
pub struct ScriptedTierLookup {
    tiers: Mutex<HashMap<String, Tier>>,
    fallback: Option<Tier>,
    delay: Option<Duration>,
    calls: Mutex<usize>,
}

impl ScriptedTierLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every participant without an explicit tier gets this one
    pub fn with_fallback(mut self, tier: u32) -> Self {
        self.fallback = Tier::new(tier).ok();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set(&self, participant: &str, tier: u32) {
        if let (Ok(mut tiers), Ok(tier)) = (self.tiers.lock(), Tier::new(tier)) {
            tiers.insert(participant.to_string(), tier);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().map(|c| *c).unwrap_or(0)
    }
}

#[async_trait]
impl TierLookup for ScriptedTierLookup {
    async fn lookup_tier(&self, participant: &str) -> Result<Option<TierInfo>> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let tier = self
            .tiers
            .lock()
            .ok()
            .and_then(|t| t.get(participant).copied())
            .or(self.fallback);
        Ok(tier.map(|tier| TierInfo {
            tier,
            score: tier.value() as f64 * 100.0,
        }))
    }
}

pub fn leagues() -> Vec<LeagueSettings> {
    vec![
        LeagueSettings {
            regions: vec![Region::NA, Region::EU],
            ..LeagueSettings::default()
        },
        LeagueSettings {
            name: "bishop".to_string(),
            prefix: BISHOP.to_string(),
            min_tier: Tier::new(19).unwrap(),
            regions: vec![],
            exempt_from_pruning: true,
        },
    ]
}

/// A lobby manager over in-process collaborators
pub struct TestSystem {
    pub manager: Arc<LobbyManager>,
    pub snapshots: Arc<SnapshotManager>,
    pub clock: ManualClock,
    pub events: Arc<MockEventPublisher>,
    pub tiers: Arc<ScriptedTierLookup>,
}

impl TestSystem {
    pub async fn new() -> Self {
        Self::build(
            Arc::new(InMemorySnapshotStorage::new()),
            ScriptedTierLookup::new().with_fallback(12),
            ManualClock::default(),
        )
        .await
    }

    pub async fn with_tiers(tiers: ScriptedTierLookup) -> Self {
        Self::build(
            Arc::new(InMemorySnapshotStorage::new()),
            tiers,
            ManualClock::default(),
        )
        .await
    }

    pub async fn with_storage(storage: Arc<dyn SnapshotStorage>, clock: ManualClock) -> Self {
        Self::build(storage, ScriptedTierLookup::new().with_fallback(12), clock).await
    }

    async fn build(
        storage: Arc<dyn SnapshotStorage>,
        tiers: ScriptedTierLookup,
        clock: ManualClock,
    ) -> Self {
        let provider = Arc::new(StaticPartitionProvider::from_leagues(&leagues()).unwrap());
        let settings = LobbySettings::default();
        let store = Arc::new(LobbyStore::new(
            &provider.partition_names(),
            settings.capacity,
            Arc::new(clock.clone()),
        ));
        let snapshots = Arc::new(SnapshotManager::new(
            store,
            storage,
            provider.partition_names(),
            Duration::from_secs(5),
        ));
        snapshots.load_on_start().await.unwrap();

        let tiers = Arc::new(tiers);
        let events = Arc::new(MockEventPublisher::new());
        let manager = LobbyManager::new(
            snapshots.clone(),
            provider,
            TimedTierLookup::new(tiers.clone(), Duration::from_secs(2)),
            events.clone(),
            &settings,
        )
        .unwrap();

        Self {
            manager: Arc::new(manager),
            snapshots,
            clock,
            events,
            tiers,
        }
    }

    /// Create a lobby hosted by `host` and add `extra` participants named
    /// `<host>-<n>`
    pub async fn lobby_with(&self, partition: &str, host: &str, region: Region, extra: usize) {
        self.manager
            .create(partition, host, Some(region), None)
            .await
            .unwrap();
        for n in 1..=extra {
            self.manager
                .join(partition, &format!("{}-{}", host, n), by_host(host))
                .await
                .unwrap();
        }
    }
}

pub fn by_host(host: &str) -> JoinTarget {
    JoinTarget::Host {
        host: host.to_string(),
    }
}

pub fn by_region(region: Region) -> JoinTarget {
    JoinTarget::Region { region }
}
