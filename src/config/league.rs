//! League configuration
//!
//! A league yields one league-wide partition named by its prefix and one
//! region-locked partition per region, e.g. `bishop-lobbies` and
//! `bishop-lobbies-eu`.

use serde::{Deserialize, Serialize};

use crate::types::{PartitionName, Region, Tier};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeagueSettings {
    pub name: String,
    /// Partition name prefix
    pub prefix: String,
    /// Lowest tier allowed to host or join in this league
    pub min_tier: Tier,
    /// Regions that get their own region-locked partition
    #[serde(default)]
    pub regions: Vec<Region>,
    /// Lobbies in this league's partitions are never pruned
    #[serde(default)]
    pub exempt_from_pruning: bool,
}

impl LeagueSettings {
    pub fn region_partition(&self, region: Region) -> PartitionName {
        format!("{}-{}", self.prefix, region.slug())
    }

    /// League-wide partition first, then one per region
    pub fn partition_names(&self) -> Vec<PartitionName> {
        std::iter::once(self.prefix.clone())
            .chain(self.regions.iter().map(|r| self.region_partition(*r)))
            .collect()
    }
}

impl Default for LeagueSettings {
    fn default() -> Self {
        Self {
            name: "open".to_string(),
            prefix: "open-lobbies".to_string(),
            min_tier: Tier::MIN,
            regions: vec![Region::NA, Region::EU, Region::SEA],
            exempt_from_pruning: false,
        }
    }
}
