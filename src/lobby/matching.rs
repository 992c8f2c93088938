//! Lobby resolution for region-based joins
//!
//! The resolver only reads; the store applies its decision inside the same
//! critical section in which the candidate list was taken.

use std::cmp::Ordering;

use crate::lobby::instance::Lobby;
use crate::types::{HostKey, Region, Tier};

/// Result of resolving a seeker against a partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveOutcome {
    /// Join the lobby keyed by this host
    Chosen(HostKey),
    /// Lobbies the seeker qualifies for exist, but all are at capacity
    AllFull,
    /// Lobbies exist, none for this region and tier
    NoneEligible,
    /// The partition has no lobbies at all
    NoneExist,
}

/// Trait for lobby selection strategies
pub trait LobbyResolver: Send + Sync {
    fn resolve(&self, lobbies: &[&Lobby], region: Region, tier: Tier, capacity: usize)
        -> ResolveOutcome;
}

/// Greedy fill: prefer the fullest eligible lobby, then the oldest
///
/// Host key is the final tie-break so the choice never depends on map order.
#[derive(Debug, Default, Clone, Copy)]
pub struct GreedyFillResolver;

impl GreedyFillResolver {
    pub fn new() -> Self {
        Self
    }

    fn qualifies(lobby: &Lobby, region: Region, tier: Tier) -> bool {
        lobby.region() == region && lobby.min_tier() <= tier
    }

    fn preference(a: &Lobby, b: &Lobby) -> Ordering {
        b.size()
            .cmp(&a.size())
            .then_with(|| a.created_at().cmp(&b.created_at()))
            .then_with(|| a.host().cmp(b.host()))
    }
}

impl LobbyResolver for GreedyFillResolver {
    fn resolve(
        &self,
        lobbies: &[&Lobby],
        region: Region,
        tier: Tier,
        capacity: usize,
    ) -> ResolveOutcome {
        if lobbies.is_empty() {
            return ResolveOutcome::NoneExist;
        }

        let qualifying: Vec<&Lobby> = lobbies
            .iter()
            .copied()
            .filter(|lobby| Self::qualifies(lobby, region, tier))
            .collect();

        if qualifying.is_empty() {
            return ResolveOutcome::NoneEligible;
        }

        qualifying
            .into_iter()
            .filter(|lobby| !lobby.is_full(capacity))
            .min_by(|a, b| Self::preference(a, b))
            .map(|lobby| ResolveOutcome::Chosen(lobby.host().to_string()))
            .unwrap_or(ResolveOutcome::AllFull)
    }
}
