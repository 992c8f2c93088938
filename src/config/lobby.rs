//! Lobby policy configuration

use anyhow::{anyhow, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::lobby::pruning::PruningPolicy;

fn checked_seconds(value: u64) -> Option<Duration> {
    i64::try_from(value).ok().and_then(Duration::try_seconds)
}

fn checked_minutes(value: u64) -> Option<Duration> {
    i64::try_from(value).ok().and_then(Duration::try_minutes)
}

/// Lobby capacity, listing cooldown, pruning thresholds and lookup timeout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LobbySettings {
    /// Maximum participants per lobby, host included
    pub capacity: usize,
    /// Minimum interval between two listings of the same partition
    pub list_cooldown_seconds: u64,
    /// Prune any lobby idle for longer than this
    pub idle_prune_minutes: u64,
    /// Prune a full lobby idle for longer than this
    pub full_idle_prune_minutes: u64,
    /// Prune a lobby older than this that never started
    pub max_age_minutes: u64,
    /// Upper bound on a single rank service lookup
    pub tier_lookup_timeout_ms: u64,
}

impl Default for LobbySettings {
    fn default() -> Self {
        Self {
            capacity: 8,
            list_cooldown_seconds: 15,
            idle_prune_minutes: 15,
            full_idle_prune_minutes: 10,
            max_age_minutes: 60,
            tier_lookup_timeout_ms: 5_000,
        }
    }
}

impl LobbySettings {
    /// Reject durations too large to represent
    pub fn check_durations(&self) -> Result<()> {
        checked_seconds(self.list_cooldown_seconds)
            .ok_or_else(|| anyhow!("List cooldown out of range: {}s", self.list_cooldown_seconds))?;
        for (name, value) in [
            ("idle_prune_minutes", self.idle_prune_minutes),
            ("full_idle_prune_minutes", self.full_idle_prune_minutes),
            ("max_age_minutes", self.max_age_minutes),
        ] {
            checked_minutes(value)
                .ok_or_else(|| anyhow!("{} out of range: {}", name, value))?;
        }
        Ok(())
    }

    /// Saturates for values `check_durations` rejects
    pub fn list_cooldown(&self) -> Duration {
        checked_seconds(self.list_cooldown_seconds).unwrap_or(Duration::MAX)
    }

    pub fn tier_lookup_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tier_lookup_timeout_ms)
    }

    pub fn pruning_policy(&self) -> PruningPolicy {
        PruningPolicy {
            idle_limit: checked_minutes(self.idle_prune_minutes).unwrap_or(Duration::MAX),
            full_idle_limit: checked_minutes(self.full_idle_prune_minutes)
                .unwrap_or(Duration::MAX),
            max_age: checked_minutes(self.max_age_minutes).unwrap_or(Duration::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_thresholds() {
        let settings = LobbySettings::default();
        let policy = settings.pruning_policy();
        assert_eq!(policy.idle_limit, Duration::minutes(15));
        assert_eq!(policy.full_idle_limit, Duration::minutes(10));
        assert_eq!(policy.max_age, Duration::minutes(60));
        assert_eq!(settings.list_cooldown(), Duration::seconds(15));
        assert_eq!(settings.capacity, 8);
        assert!(settings.check_durations().is_ok());
    }

    #[test]
    fn test_huge_durations_do_not_wrap() {
        let settings = LobbySettings {
            list_cooldown_seconds: u64::MAX,
            idle_prune_minutes: 1 << 63,
            max_age_minutes: i64::MAX as u64,
            ..LobbySettings::default()
        };
        assert!(settings.check_durations().is_err());

        // never negative, so nothing is pruned or admitted early
        let policy = settings.pruning_policy();
        assert_eq!(policy.idle_limit, Duration::MAX);
        assert_eq!(policy.max_age, Duration::MAX);
        assert_eq!(policy.full_idle_limit, Duration::minutes(10));
        assert_eq!(settings.list_cooldown(), Duration::MAX);
    }
}
