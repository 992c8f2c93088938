//! Common types used throughout the lobby service

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::LobbyError;

/// Identifier of a participant, already resolved by the identity directory
pub type ParticipantId = String;

/// Host identity, which keys a lobby within its partition
pub type HostKey = ParticipantId;

/// Name of a partition (league-wide or league x region)
pub type PartitionName = String;

/// Regions a lobby can be advertised in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    NA,
    EU,
    SEA,
    SA,
    OCE,
    RU,
    CN,
}

impl Region {
    pub const ALL: [Region; 7] = [
        Region::NA,
        Region::EU,
        Region::SEA,
        Region::SA,
        Region::OCE,
        Region::RU,
        Region::CN,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Region::NA => "NA",
            Region::EU => "EU",
            Region::SEA => "SEA",
            Region::SA => "SA",
            Region::OCE => "OCE",
            Region::RU => "RU",
            Region::CN => "CN",
        }
    }

    /// Lowercase form used in partition names and credentials
    pub fn slug(&self) -> String {
        self.as_str().to_lowercase()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Region {
    type Err = LobbyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_uppercase();
        Region::ALL
            .iter()
            .copied()
            .find(|region| region.as_str() == wanted)
            .ok_or_else(|| LobbyError::InvalidRegion {
                value: s.to_string(),
            })
    }
}

/// Skill tier used for eligibility gating
///
/// Valid tiers run from 1 (`Pawn-1`) to 38 (`Queen`). Each of the four
/// lower ranks spans nine steps, followed by `King` and `Queen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Tier(u32);

const RANK_NAMES: [&str; 4] = ["Pawn", "Knight", "Bishop", "Rook"];

impl Tier {
    pub const MIN: Tier = Tier(1);
    pub const KING: Tier = Tier(37);
    pub const MAX: Tier = Tier(38);

    pub fn new(value: u32) -> Result<Self, LobbyError> {
        if (Self::MIN.0..=Self::MAX.0).contains(&value) {
            Ok(Tier(value))
        } else {
            Err(LobbyError::InvalidTier {
                value: value.to_string(),
            })
        }
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Tier {
    type Error = LobbyError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Tier::new(value)
    }
}

impl From<Tier> for u32 {
    fn from(tier: Tier) -> Self {
        tier.0
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            37 => write!(f, "King"),
            38 => write!(f, "Queen"),
            n => {
                let rank = ((n - 1) / 9) as usize;
                let step = (n - 1) % 9 + 1;
                write!(f, "{}-{}", RANK_NAMES[rank], step)
            }
        }
    }
}

impl FromStr for Tier {
    type Err = LobbyError;

    /// Accepts either the integer value or a rank string such as `bishop-3`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || LobbyError::InvalidTier {
            value: s.to_string(),
        };
        let text = s.trim().to_lowercase();

        if let Ok(value) = text.parse::<u32>() {
            return Tier::new(value).map_err(|_| invalid());
        }

        match text.as_str() {
            "king" => return Ok(Tier::KING),
            "queen" => return Ok(Tier::MAX),
            _ => {}
        }

        let (name, step) = text.split_once('-').ok_or_else(invalid)?;
        let rank = RANK_NAMES
            .iter()
            .position(|candidate| candidate.eq_ignore_ascii_case(name))
            .ok_or_else(invalid)? as u32;
        let step: u32 = step.parse().map_err(|_| invalid())?;
        if !(1..=9).contains(&step) {
            return Err(invalid());
        }

        Tier::new(rank * 9 + step)
    }
}

/// Tier information returned by the rank service
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierInfo {
    pub tier: Tier,
    pub score: f64,
}

/// One line of a lobby roster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub participant: ParticipantId,
    pub is_host: bool,
}

/// How a seeker asked to join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum JoinTarget {
    Host { host: HostKey },
    Region { region: Region },
}

impl JoinTarget {
    pub fn mode(&self) -> &'static str {
        match self {
            JoinTarget::Host { .. } => "host",
            JoinTarget::Region { .. } => "region",
        }
    }
}

/// Why the pruner removed a lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneReason {
    /// No activity past the idle limit
    Inactive,
    /// Full, but nobody started it
    FullAndIdle,
    /// Open for too long without starting
    NeverStarted,
}

impl fmt::Display for PruneReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PruneReason::Inactive => write!(f, "inactive"),
            PruneReason::FullAndIdle => write!(f, "full_and_idle"),
            PruneReason::NeverStarted => write!(f, "never_started"),
        }
    }
}

/// Event emitted when a lobby is created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyCreated {
    pub partition: PartitionName,
    pub host: HostKey,
    pub region: Region,
    pub min_tier: Tier,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a participant joins a lobby
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantJoined {
    pub partition: PartitionName,
    pub host: HostKey,
    pub participant: ParticipantId,
    pub participants: Vec<ParticipantId>,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a participant leaves a lobby on their own
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantLeft {
    pub partition: PartitionName,
    pub host: HostKey,
    pub participant: ParticipantId,
    pub remaining: Vec<ParticipantId>,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a participant is kicked by the host or an admin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantKicked {
    pub partition: PartitionName,
    pub host: HostKey,
    pub participant: ParticipantId,
    pub by_admin: bool,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a lobby reaches capacity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyFilled {
    pub partition: PartitionName,
    pub host: HostKey,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a host starts their lobby
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyStarted {
    pub partition: PartitionName,
    pub host: HostKey,
    pub region: Region,
    pub roster: Vec<RosterEntry>,
    pub forced: bool,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when a lobby is cancelled
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyCancelled {
    pub partition: PartitionName,
    pub host: HostKey,
    pub participants: Vec<ParticipantId>,
    pub by_admin: bool,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when the pruner reclaims a lobby
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LobbyPruned {
    pub partition: PartitionName,
    pub host: HostKey,
    pub participants: Vec<ParticipantId>,
    pub reason: PruneReason,
    pub timestamp: DateTime<Utc>,
}

/// Event emitted when an admin clears a partition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionCleared {
    pub partition: PartitionName,
    pub lobbies_removed: usize,
    pub timestamp: DateTime<Utc>,
}

/// Union type for all outbound lobby events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LobbyEvent {
    LobbyCreated(LobbyCreated),
    ParticipantJoined(ParticipantJoined),
    ParticipantLeft(ParticipantLeft),
    ParticipantKicked(ParticipantKicked),
    LobbyFilled(LobbyFilled),
    LobbyStarted(LobbyStarted),
    LobbyCancelled(LobbyCancelled),
    LobbyPruned(LobbyPruned),
    PartitionCleared(PartitionCleared),
}

impl LobbyEvent {
    pub fn partition(&self) -> &str {
        match self {
            LobbyEvent::LobbyCreated(e) => &e.partition,
            LobbyEvent::ParticipantJoined(e) => &e.partition,
            LobbyEvent::ParticipantLeft(e) => &e.partition,
            LobbyEvent::ParticipantKicked(e) => &e.partition,
            LobbyEvent::LobbyFilled(e) => &e.partition,
            LobbyEvent::LobbyStarted(e) => &e.partition,
            LobbyEvent::LobbyCancelled(e) => &e.partition,
            LobbyEvent::LobbyPruned(e) => &e.partition,
            LobbyEvent::PartitionCleared(e) => &e.partition,
        }
    }

    /// Short name used for routing keys and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            LobbyEvent::LobbyCreated(_) => "created",
            LobbyEvent::ParticipantJoined(_) => "joined",
            LobbyEvent::ParticipantLeft(_) => "left",
            LobbyEvent::ParticipantKicked(_) => "kicked",
            LobbyEvent::LobbyFilled(_) => "filled",
            LobbyEvent::LobbyStarted(_) => "started",
            LobbyEvent::LobbyCancelled(_) => "cancelled",
            LobbyEvent::LobbyPruned(_) => "pruned",
            LobbyEvent::PartitionCleared(_) => "cleared",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_parsing_is_case_insensitive() {
        assert_eq!("eu".parse::<Region>().unwrap(), Region::EU);
        assert_eq!(" Sea ".parse::<Region>().unwrap(), Region::SEA);
        assert!(matches!(
            "mars".parse::<Region>(),
            Err(LobbyError::InvalidRegion { .. })
        ));
    }

    #[test]
    fn test_region_serializes_uppercase() {
        let json = serde_json::to_string(&Region::OCE).unwrap();
        assert_eq!(json, "\"OCE\"");
        assert_eq!(Region::OCE.slug(), "oce");
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(Tier::new(1).unwrap().to_string(), "Pawn-1");
        assert_eq!(Tier::new(9).unwrap().to_string(), "Pawn-9");
        assert_eq!(Tier::new(10).unwrap().to_string(), "Knight-1");
        assert_eq!(Tier::new(21).unwrap().to_string(), "Bishop-3");
        assert_eq!(Tier::new(36).unwrap().to_string(), "Rook-9");
        assert_eq!(Tier::new(37).unwrap().to_string(), "King");
        assert_eq!(Tier::new(38).unwrap().to_string(), "Queen");
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("bishop-3".parse::<Tier>().unwrap().value(), 21);
        assert_eq!("Knight-1".parse::<Tier>().unwrap().value(), 10);
        assert_eq!("KING".parse::<Tier>().unwrap(), Tier::KING);
        assert_eq!("queen".parse::<Tier>().unwrap(), Tier::MAX);
        assert_eq!("12".parse::<Tier>().unwrap().value(), 12);

        for bad in ["0", "39", "pawn-0", "rook-10", "wizard-2", "bishop", ""] {
            assert!(
                matches!(bad.parse::<Tier>(), Err(LobbyError::InvalidTier { .. })),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_tier_display_parse_agree() {
        for value in 1..=38 {
            let tier = Tier::new(value).unwrap();
            assert_eq!(tier.to_string().parse::<Tier>().unwrap(), tier);
        }
    }

    #[test]
    fn test_tier_deserialize_rejects_out_of_range() {
        assert!(serde_json::from_str::<Tier>("0").is_err());
        assert_eq!(serde_json::from_str::<Tier>("10").unwrap().value(), 10);
    }

    #[test]
    fn test_event_tagging() {
        let event = LobbyEvent::LobbyFilled(LobbyFilled {
            partition: "bishop-lobbies".to_string(),
            host: "h1".to_string(),
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "LobbyFilled");
        assert_eq!(event.kind(), "filled");
        assert_eq!(event.partition(), "bishop-lobbies");
    }
}
