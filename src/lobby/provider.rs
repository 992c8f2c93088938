//! Partition policies
//!
//! Every partition belongs to a league and inherits its minimum tier and
//! pruning exemption. Region-locked partitions additionally pin the region
//! of every lobby created in them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::RwLock;

use crate::config::LeagueSettings;
use crate::error::{LobbyError, LobbyResult};
use crate::types::{PartitionName, Region, Tier};

/// Policy applied to one partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionPolicy {
    pub name: PartitionName,
    pub league: String,
    /// League minimum; hosts and joiners below it are rejected
    pub min_tier: Tier,
    pub region_lock: Option<Region>,
    pub exempt_from_pruning: bool,
}

impl PartitionPolicy {
    /// Policy for a partition with no league behind it
    pub fn standalone(name: &str) -> Self {
        Self {
            name: name.to_string(),
            league: name.to_string(),
            min_tier: Tier::MIN,
            region_lock: None,
            exempt_from_pruning: false,
        }
    }

    /// Region for a new lobby in this partition
    ///
    /// A locked partition fills in its own region and rejects any other.
    pub fn lobby_region(&self, requested: Option<Region>) -> LobbyResult<Region> {
        match (self.region_lock, requested) {
            (Some(lock), Some(region)) if lock != region => Err(LobbyError::InvalidRegion {
                value: format!("{} (partition {} is locked to {})", region, self.name, lock),
            }),
            (Some(lock), _) => Ok(lock),
            (None, Some(region)) => Ok(region),
            (None, None) => Err(LobbyError::InvalidRegion {
                value: "missing".to_string(),
            }),
        }
    }

    /// Minimum tier for a new lobby, never below the league minimum
    pub fn lobby_min_tier(&self, requested: Option<Tier>) -> Tier {
        requested.map_or(self.min_tier, |t| t.max(self.min_tier))
    }

    pub fn check_tier(&self, participant: &str, tier: Tier) -> LobbyResult<()> {
        if tier < self.min_tier {
            return Err(LobbyError::TierTooLow {
                participant: participant.to_string(),
                required: self.min_tier.to_string(),
                actual: tier.to_string(),
            });
        }
        Ok(())
    }
}

/// Source of partition policies
pub trait PartitionProvider: Send + Sync {
    /// Fails `PartitionNotFound` for unknown partitions
    fn policy(&self, partition: &str) -> LobbyResult<PartitionPolicy>;

    /// All known partitions, ordered by name
    fn partitions(&self) -> Vec<PartitionPolicy>;

    /// Register a partition; `false` if it already existed
    fn add_partition(&self, name: &str) -> LobbyResult<bool>;

    fn remove_partition(&self, name: &str) -> LobbyResult<Option<PartitionPolicy>>;
}

/// Provider built from the configured leagues
#[derive(Debug)]
pub struct StaticPartitionProvider {
    leagues: Vec<LeagueSettings>,
    policies: RwLock<BTreeMap<PartitionName, PartitionPolicy>>,
}

impl StaticPartitionProvider {
    pub fn from_leagues(leagues: &[LeagueSettings]) -> LobbyResult<Self> {
        let mut policies = BTreeMap::new();
        for league in leagues {
            for policy in league_policies(league) {
                if policies.contains_key(&policy.name) {
                    return Err(LobbyError::ConfigurationError {
                        message: format!("Partition {} is defined twice", policy.name),
                    });
                }
                policies.insert(policy.name.clone(), policy);
            }
        }

        Ok(Self {
            leagues: leagues.to_vec(),
            policies: RwLock::new(policies),
        })
    }

    pub fn partition_names(&self) -> Vec<PartitionName> {
        self.policies
            .read()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Policy for a partition added at runtime
    ///
    /// Names following a league's scheme inherit that league; anything else
    /// becomes a standalone partition.
    fn infer_policy(&self, name: &str) -> PartitionPolicy {
        self.leagues
            .iter()
            .flat_map(league_policies)
            .find(|p| p.name == name)
            .unwrap_or_else(|| PartitionPolicy::standalone(name))
    }
}

fn league_policies(league: &LeagueSettings) -> Vec<PartitionPolicy> {
    let wide = PartitionPolicy {
        name: league.prefix.clone(),
        league: league.name.clone(),
        min_tier: league.min_tier,
        region_lock: None,
        exempt_from_pruning: league.exempt_from_pruning,
    };

    std::iter::once(wide)
        .chain(league.regions.iter().map(|region| PartitionPolicy {
            name: league.region_partition(*region),
            league: league.name.clone(),
            min_tier: league.min_tier,
            region_lock: Some(*region),
            exempt_from_pruning: league.exempt_from_pruning,
        }))
        .collect()
}

impl PartitionProvider for StaticPartitionProvider {
    fn policy(&self, partition: &str) -> LobbyResult<PartitionPolicy> {
        let policies = self
            .policies
            .read()
            .map_err(|_| LobbyError::lock_poisoned("partition policy"))?;
        policies
            .get(partition)
            .cloned()
            .ok_or_else(|| LobbyError::PartitionNotFound {
                partition: partition.to_string(),
            })
    }

    fn partitions(&self) -> Vec<PartitionPolicy> {
        self.policies
            .read()
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }

    fn add_partition(&self, name: &str) -> LobbyResult<bool> {
        if name.trim().is_empty() {
            return Err(LobbyError::ConfigurationError {
                message: "Partition name cannot be empty".to_string(),
            });
        }

        let policy = self.infer_policy(name);
        let mut policies = self
            .policies
            .write()
            .map_err(|_| LobbyError::lock_poisoned("partition policy"))?;
        if policies.contains_key(name) {
            return Ok(false);
        }
        policies.insert(name.to_string(), policy);
        Ok(true)
    }

    fn remove_partition(&self, name: &str) -> LobbyResult<Option<PartitionPolicy>> {
        let mut policies = self
            .policies
            .write()
            .map_err(|_| LobbyError::lock_poisoned("partition policy"))?;
        Ok(policies.remove(name))
    }
}
