//! Activity-based pruning policy
//!
//! Pruning is lazy: the store evaluates it at the start of list and info
//! reads. Rules are checked in order and the first match wins.

use chrono::{DateTime, Duration, Utc};

use crate::lobby::instance::Lobby;
use crate::types::PruneReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruningPolicy {
    /// Any lobby idle for longer than this is pruned
    pub idle_limit: Duration,
    /// A full lobby idle for longer than this is pruned
    pub full_idle_limit: Duration,
    /// A lobby older than this is pruned
    pub max_age: Duration,
}

impl Default for PruningPolicy {
    fn default() -> Self {
        Self {
            idle_limit: Duration::minutes(15),
            full_idle_limit: Duration::minutes(10),
            max_age: Duration::minutes(60),
        }
    }
}

impl PruningPolicy {
    pub fn evaluate(&self, lobby: &Lobby, capacity: usize, now: DateTime<Utc>) -> Option<PruneReason> {
        let idle = now - lobby.last_activity_at();
        let age = now - lobby.created_at();

        if idle > self.idle_limit {
            Some(PruneReason::Inactive)
        } else if lobby.is_full(capacity) && idle > self.full_idle_limit {
            Some(PruneReason::FullAndIdle)
        } else if age > self.max_age {
            Some(PruneReason::NeverStarted)
        } else {
            None
        }
    }
}
