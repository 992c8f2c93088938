//! Snapshot persistence for crash recovery and coordinated restarts
//!
//! A snapshot is a JSON object mapping partition names to objects mapping
//! host keys to lobby records.

pub mod manager;
pub mod storage;

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{LobbyError, LobbyResult};
use crate::lobby::instance::Lobby;
use crate::types::{HostKey, PartitionName};

pub use manager::{SnapshotManager, SnapshotStatus};
pub use storage::{FileSnapshotStorage, InMemorySnapshotStorage, SnapshotStorage};

/// Full serializable image of the store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    partitions: BTreeMap<PartitionName, BTreeMap<HostKey, Lobby>>,
}

impl Snapshot {
    pub fn insert_partition(&mut self, name: PartitionName, lobbies: BTreeMap<HostKey, Lobby>) {
        self.partitions.insert(name, lobbies);
    }

    pub fn remove_partition(&mut self, name: &str) -> Option<BTreeMap<HostKey, Lobby>> {
        self.partitions.remove(name)
    }

    pub fn partitions(&self) -> &BTreeMap<PartitionName, BTreeMap<HostKey, Lobby>> {
        &self.partitions
    }

    pub fn into_partitions(self) -> BTreeMap<PartitionName, BTreeMap<HostKey, Lobby>> {
        self.partitions
    }

    pub fn lobby_count(&self) -> usize {
        self.partitions.values().map(|lobbies| lobbies.len()).sum()
    }

    /// Check every stored invariant: keys match hosts, sizes are within
    /// capacity, and nobody appears twice in one partition
    pub fn validate(&self, capacity: usize) -> LobbyResult<()> {
        for (partition, lobbies) in &self.partitions {
            let mut seen = HashSet::new();
            for (key, lobby) in lobbies {
                if key != lobby.host() {
                    return Err(LobbyError::InternalError {
                        message: format!(
                            "Partition {} keys lobby of {} under {}",
                            partition,
                            lobby.host(),
                            key
                        ),
                    });
                }
                lobby.check_invariants(capacity)?;
                for participant in lobby.participants() {
                    if !seen.insert(participant.as_str()) {
                        return Err(LobbyError::InternalError {
                            message: format!(
                                "Participant {} is in more than one lobby of {}",
                                participant, partition
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Region, Tier};
    use chrono::{TimeZone, Utc};

    fn lobby(host: &str, others: &[&str]) -> Lobby {
        let now = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();
        let mut lobby = Lobby::new(host.to_string(), "eu_aaaaa".to_string(), Region::EU, Tier::MIN, now);
        for other in others {
            lobby.push_participant(other.to_string(), now);
        }
        lobby
    }

    #[test]
    fn test_json_layout() {
        let mut snapshot = Snapshot::default();
        let mut lobbies = BTreeMap::new();
        lobbies.insert("h1".to_string(), lobby("h1", &["u2"]));
        snapshot.insert_partition("open-lobbies".to_string(), lobbies);

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["open-lobbies"]["h1"]["participants"][1], "u2");
        assert_eq!(json["open-lobbies"]["h1"]["createdAt"], 1_700_000_000_000i64);

        let back: Snapshot = serde_json::from_value(json).unwrap();
        assert_eq!(back, snapshot);
        assert_eq!(back.lobby_count(), 1);
    }

    #[test]
    fn test_validate_detects_duplicate_membership() {
        let mut snapshot = Snapshot::default();
        let mut lobbies = BTreeMap::new();
        lobbies.insert("h1".to_string(), lobby("h1", &["u2"]));
        lobbies.insert("h2".to_string(), lobby("h2", &["u2"]));
        snapshot.insert_partition("p".to_string(), lobbies);
        assert!(snapshot.validate(8).is_err());
    }

    #[test]
    fn test_validate_detects_mismatched_key() {
        let mut snapshot = Snapshot::default();
        let mut lobbies = BTreeMap::new();
        lobbies.insert("someone-else".to_string(), lobby("h1", &[]));
        snapshot.insert_partition("p".to_string(), lobbies);
        assert!(snapshot.validate(8).is_err());
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(serde_json::from_str::<Snapshot>(r#"{"p": {"h1": {"host": "h1"}}}"#).is_err());
        assert!(serde_json::from_str::<Snapshot>("[]").is_err());
    }
}
