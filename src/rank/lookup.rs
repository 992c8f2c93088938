//! Tier lookup trait and implementations

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{LobbyError, LobbyResult, Result};
use crate::metrics::MetricsCollector;
use crate::types::{ParticipantId, Tier, TierInfo};

/// Source of participant tiers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TierLookup: Send + Sync {
    /// `Ok(None)` when the service has no tier for this participant
    async fn lookup_tier(&self, participant: &str) -> Result<Option<TierInfo>>;
}

/// Wraps a lookup with a timeout and maps failures to lobby errors
pub struct TimedTierLookup {
    inner: Arc<dyn TierLookup>,
    timeout: Duration,
    metrics: Option<Arc<MetricsCollector>>,
}

impl TimedTierLookup {
    pub fn new(inner: Arc<dyn TierLookup>, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    fn record(&self, status: &str, started: std::time::Instant) {
        if let Some(metrics) = &self.metrics {
            metrics
                .lookups
                .record(status, started.elapsed().as_secs_f64());
        }
    }

    /// Look up a tier, failing with `ServiceUnavailable` on error or timeout
    /// and `UnknownTier` when the participant has none
    pub async fn tier_of(&self, participant: &str) -> LobbyResult<TierInfo> {
        let started = std::time::Instant::now();

        match tokio::time::timeout(self.timeout, self.inner.lookup_tier(participant)).await {
            Ok(Ok(Some(info))) => {
                self.record("found", started);
                debug!("Tier of {} is {}", participant, info.tier);
                Ok(info)
            }
            Ok(Ok(None)) => {
                self.record("unknown", started);
                Err(LobbyError::UnknownTier {
                    participant: participant.to_string(),
                })
            }
            Ok(Err(e)) => {
                self.record("error", started);
                warn!("Tier lookup for {} failed: {:#}", participant, e);
                Err(LobbyError::ServiceUnavailable {
                    message: e.to_string(),
                })
            }
            Err(_) => {
                self.record("timeout", started);
                warn!(
                    "Tier lookup for {} timed out after {:?}",
                    participant, self.timeout
                );
                Err(LobbyError::ServiceUnavailable {
                    message: format!("tier lookup timed out after {:?}", self.timeout),
                })
            }
        }
    }
}

/// In-memory tier table
#[derive(Debug, Default)]
pub struct StaticTierLookup {
    tiers: RwLock<HashMap<ParticipantId, TierInfo>>,
}

impl StaticTierLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tiers(tiers: HashMap<ParticipantId, TierInfo>) -> Self {
        Self {
            tiers: RwLock::new(tiers),
        }
    }

    /// Load a JSON object mapping participant ids to `{ "tier": n, "score": x }`
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read tiers file {}", path.display()))?;
        let tiers: HashMap<ParticipantId, TierInfo> = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse tiers file {}", path.display()))?;
        Ok(Self::with_tiers(tiers))
    }

    pub fn set_tier(&self, participant: &str, tier: Tier, score: f64) -> Result<()> {
        let mut tiers = self
            .tiers
            .write()
            .map_err(|_| anyhow!("Failed to acquire tiers lock"))?;
        tiers.insert(participant.to_string(), TierInfo { tier, score });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tiers.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl TierLookup for StaticTierLookup {
    async fn lookup_tier(&self, participant: &str) -> Result<Option<TierInfo>> {
        let tiers = self
            .tiers
            .read()
            .map_err(|_| anyhow!("Failed to acquire tiers lock"))?;
        Ok(tiers.get(participant).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(tier: u32) -> TierInfo {
        TierInfo {
            tier: Tier::new(tier).unwrap(),
            score: 1000.0,
        }
    }

    #[tokio::test]
    async fn test_found_tier_is_returned() {
        let mut mock = MockTierLookup::new();
        mock.expect_lookup_tier()
            .times(1)
            .returning(|_| Ok(Some(info(12))));

        let lookup = TimedTierLookup::new(Arc::new(mock), Duration::from_secs(1));
        assert_eq!(lookup.tier_of("u1").await.unwrap().tier.value(), 12);
    }

    #[tokio::test]
    async fn test_unknown_tier() {
        let mut mock = MockTierLookup::new();
        mock.expect_lookup_tier().returning(|_| Ok(None));

        let lookup = TimedTierLookup::new(Arc::new(mock), Duration::from_secs(1));
        let err = lookup.tier_of("u1").await.unwrap_err();
        assert_eq!(err.tag(), "unknown_tier");
    }

    #[tokio::test]
    async fn test_service_error_maps_to_unavailable() {
        let mut mock = MockTierLookup::new();
        mock.expect_lookup_tier()
            .returning(|_| Err(anyhow!("connection refused")));

        let lookup = TimedTierLookup::new(Arc::new(mock), Duration::from_secs(1));
        let err = lookup.tier_of("u1").await.unwrap_err();
        assert_eq!(err.tag(), "service_unavailable");
    }

    struct SlowLookup;

    #[async_trait]
    impl TierLookup for SlowLookup {
        async fn lookup_tier(&self, _participant: &str) -> Result<Option<TierInfo>> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Some(info(1)))
        }
    }

    #[tokio::test]
    async fn test_timeout_maps_to_unavailable() {
        let lookup = TimedTierLookup::new(Arc::new(SlowLookup), Duration::from_millis(20));
        let err = lookup.tier_of("u1").await.unwrap_err();
        assert_eq!(err.tag(), "service_unavailable");
    }

    #[tokio::test]
    async fn test_static_lookup() {
        let lookup = StaticTierLookup::new();
        lookup.set_tier("u1", Tier::new(20).unwrap(), 1500.0).unwrap();
        assert_eq!(lookup.len(), 1);
        assert_eq!(
            lookup.lookup_tier("u1").await.unwrap().unwrap().tier.to_string(),
            "Bishop-2"
        );
        assert!(lookup.lookup_tier("u2").await.unwrap().is_none());
    }

    #[test]
    fn test_static_lookup_from_file() {
        let path = std::env::temp_dir().join(format!("anteroom_tiers_{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"{"u1": {"tier": 12, "score": 2210.5}}"#).unwrap();
        let lookup = StaticTierLookup::from_file(&path).unwrap();
        assert_eq!(lookup.len(), 1);
        std::fs::remove_file(&path).ok();
    }
}
