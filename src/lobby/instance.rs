//! Lobby record and its structural invariants
//!
//! A [`Lobby`] is plain data owned by the store. Mutators are crate-private
//! so every change goes through the store's guarded transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{LobbyError, LobbyResult};
use crate::types::{HostKey, ParticipantId, Region, RosterEntry, Tier};

/// Active sub-state of a lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LobbyState {
    /// Fewer participants than capacity
    Open,
    /// At capacity
    Full,
}

/// One hosted matchmaking session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lobby {
    host: HostKey,
    credential: String,
    participants: Vec<ParticipantId>,
    region: Region,
    min_tier: Tier,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    last_activity_at: DateTime<Utc>,
}

impl Lobby {
    pub(crate) fn new(
        host: HostKey,
        credential: String,
        region: Region,
        min_tier: Tier,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            participants: vec![host.clone()],
            host,
            credential,
            region,
            min_tier,
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }

    /// Participants in join order, host first
    pub fn participants(&self) -> &[ParticipantId] {
        &self.participants
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn min_tier(&self) -> Tier {
        self.min_tier
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    pub fn size(&self) -> usize {
        self.participants.len()
    }

    pub fn has_member(&self, participant: &str) -> bool {
        self.participants.iter().any(|p| p == participant)
    }

    pub fn is_full(&self, capacity: usize) -> bool {
        self.participants.len() >= capacity
    }

    pub fn state(&self, capacity: usize) -> LobbyState {
        if self.is_full(capacity) {
            LobbyState::Full
        } else {
            LobbyState::Open
        }
    }

    /// Ordered roster with the host flagged
    pub fn roster(&self) -> Vec<RosterEntry> {
        self.participants
            .iter()
            .map(|participant| RosterEntry {
                participant: participant.clone(),
                is_host: *participant == self.host,
            })
            .collect()
    }

    /// Check the structural invariants that must hold for any stored lobby
    pub fn check_invariants(&self, capacity: usize) -> LobbyResult<()> {
        let violation = |message: String| Err(LobbyError::InternalError { message });

        if self.participants.is_empty() || self.participants.len() > capacity {
            return violation(format!(
                "Lobby hosted by {} has {} participants (capacity {})",
                self.host,
                self.participants.len(),
                capacity
            ));
        }
        if self.participants.first() != Some(&self.host) {
            return violation(format!(
                "Lobby hosted by {} does not list its host first",
                self.host
            ));
        }
        for (i, participant) in self.participants.iter().enumerate() {
            if self.participants[..i].contains(participant) {
                return violation(format!(
                    "Lobby hosted by {} lists {} twice",
                    self.host, participant
                ));
            }
        }
        Ok(())
    }

    pub(crate) fn push_participant(&mut self, participant: ParticipantId, now: DateTime<Utc>) {
        self.participants.push(participant);
        self.last_activity_at = now;
    }

    pub(crate) fn remove_participant(&mut self, participant: &str, now: DateTime<Utc>) {
        self.participants.retain(|p| p != participant);
        self.last_activity_at = now;
    }
}
