//! Lobby lifecycle state machine
//!
//! The valid transitions are listed once in [`TRANSITIONS`]. Every store
//! operation calls [`guard`] inside its critical section before mutating,
//! so capacity, membership and authority checks cannot diverge between
//! commands.

use serde::{Deserialize, Serialize};

use crate::error::{LobbyError, LobbyResult};
use crate::lobby::instance::{Lobby, LobbyState};
use crate::types::Tier;

/// Lifecycle phase of a lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Not in the store yet
    Absent,
    Open,
    Full,
    Started,
    Cancelled,
    Pruned,
}

impl Phase {
    /// Terminal phases remove the lobby from the store
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Started | Phase::Cancelled | Phase::Pruned)
    }
}

impl From<LobbyState> for Phase {
    fn from(state: LobbyState) -> Self {
        match state {
            LobbyState::Open => Phase::Open,
            LobbyState::Full => Phase::Full,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransitionKind {
    Create,
    Join,
    Leave,
    Kick,
    Start,
    ForceStart,
    Cancel,
    Prune,
}

/// Every allowed (from, kind, to) edge
pub const TRANSITIONS: &[(Phase, TransitionKind, Phase)] = &[
    (Phase::Absent, TransitionKind::Create, Phase::Open),
    (Phase::Open, TransitionKind::Join, Phase::Open),
    (Phase::Open, TransitionKind::Join, Phase::Full),
    (Phase::Open, TransitionKind::Leave, Phase::Open),
    (Phase::Full, TransitionKind::Leave, Phase::Open),
    (Phase::Open, TransitionKind::Kick, Phase::Open),
    (Phase::Full, TransitionKind::Kick, Phase::Open),
    (Phase::Full, TransitionKind::Start, Phase::Started),
    (Phase::Open, TransitionKind::ForceStart, Phase::Started),
    (Phase::Full, TransitionKind::ForceStart, Phase::Started),
    (Phase::Open, TransitionKind::Cancel, Phase::Cancelled),
    (Phase::Full, TransitionKind::Cancel, Phase::Cancelled),
    (Phase::Open, TransitionKind::Prune, Phase::Pruned),
    (Phase::Full, TransitionKind::Prune, Phase::Pruned),
];

pub fn is_allowed(from: Phase, kind: TransitionKind, to: Phase) -> bool {
    TRANSITIONS
        .iter()
        .any(|&(f, k, t)| f == from && k == kind && t == to)
}

/// Who is driving a host-only transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor<'a> {
    /// A participant claiming to be the host
    Participant(&'a str),
    /// Operator action, bypasses the host check
    Admin,
}

/// A requested change to an existing lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<'a> {
    Join { participant: &'a str, tier: Tier },
    Leave { participant: &'a str },
    Kick { actor: Actor<'a>, target: &'a str },
    Start { caller: &'a str, force: bool },
    Cancel { actor: Actor<'a> },
    Prune,
}

impl Transition<'_> {
    pub fn kind(&self) -> TransitionKind {
        match self {
            Transition::Join { .. } => TransitionKind::Join,
            Transition::Leave { .. } => TransitionKind::Leave,
            Transition::Kick { .. } => TransitionKind::Kick,
            Transition::Start { force: false, .. } => TransitionKind::Start,
            Transition::Start { force: true, .. } => TransitionKind::ForceStart,
            Transition::Cancel { .. } => TransitionKind::Cancel,
            Transition::Prune => TransitionKind::Prune,
        }
    }
}

fn require_host(lobby: &Lobby, actor: Actor<'_>) -> LobbyResult<()> {
    match actor {
        Actor::Admin => Ok(()),
        Actor::Participant(caller) if caller == lobby.host() => Ok(()),
        Actor::Participant(caller) => Err(LobbyError::NotAuthorized {
            caller: caller.to_string(),
            host: lobby.host().to_string(),
        }),
    }
}

/// Removal checks shared by leave and kick
fn check_removal(lobby: &Lobby, partition: &str, target: &str) -> LobbyResult<()> {
    if !lobby.has_member(target) {
        return Err(LobbyError::NotMember {
            partition: partition.to_string(),
            participant: target.to_string(),
        });
    }
    if target == lobby.host() {
        return Err(LobbyError::CannotRemoveHost {
            host: lobby.host().to_string(),
        });
    }
    if lobby.size() <= 1 {
        return Err(LobbyError::CannotRemoveLast {
            host: lobby.host().to_string(),
        });
    }
    Ok(())
}

/// Check a transition against the lobby's current contents
///
/// Returns the phase the lobby will be in once the transition is applied.
/// Membership in *other* lobbies of the partition is the store's concern.
pub fn guard(
    lobby: &Lobby,
    partition: &str,
    transition: &Transition<'_>,
    capacity: usize,
) -> LobbyResult<Phase> {
    let from = Phase::from(lobby.state(capacity));

    let to = match *transition {
        Transition::Join { participant, tier } => {
            if lobby.has_member(participant) {
                return Err(LobbyError::AlreadyMember {
                    participant: participant.to_string(),
                    host: lobby.host().to_string(),
                });
            }
            if lobby.is_full(capacity) {
                return Err(LobbyError::LobbyFull {
                    host: lobby.host().to_string(),
                });
            }
            if tier < lobby.min_tier() {
                return Err(LobbyError::TierTooLow {
                    participant: participant.to_string(),
                    required: lobby.min_tier().to_string(),
                    actual: tier.to_string(),
                });
            }
            if lobby.size() + 1 >= capacity {
                Phase::Full
            } else {
                Phase::Open
            }
        }
        Transition::Leave { participant } => {
            check_removal(lobby, partition, participant)?;
            Phase::Open
        }
        Transition::Kick { actor, target } => {
            require_host(lobby, actor)?;
            check_removal(lobby, partition, target)?;
            Phase::Open
        }
        Transition::Start { caller, force } => {
            require_host(lobby, Actor::Participant(caller))?;
            let required = if force { 2 } else { capacity };
            if lobby.size() < required {
                return Err(LobbyError::NotReady {
                    host: lobby.host().to_string(),
                    size: lobby.size(),
                    required,
                });
            }
            Phase::Started
        }
        Transition::Cancel { actor } => {
            require_host(lobby, actor)?;
            Phase::Cancelled
        }
        Transition::Prune => Phase::Pruned,
    };

    if !is_allowed(from, transition.kind(), to) {
        return Err(LobbyError::InternalError {
            message: format!(
                "Transition {:?} from {:?} to {:?} is not allowed",
                transition.kind(),
                from,
                to
            ),
        });
    }
    Ok(to)
}
