//! Per-partition cooldown in front of the listing command

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;
use crate::error::{LobbyError, LobbyResult};
use crate::types::PartitionName;

/// One gate per partition holding the last successful listing time
pub struct ListRateLimiter {
    cooldown: Duration,
    gates: Mutex<HashMap<PartitionName, DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl ListRateLimiter {
    pub fn new(cooldown: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            cooldown,
            gates: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Pass the gate and record the attempt, or fail without touching it
    pub fn try_acquire(&self, partition: &str) -> LobbyResult<()> {
        let now = self.clock.now();
        let mut gates = self
            .gates
            .lock()
            .map_err(|_| LobbyError::lock_poisoned("rate gate"))?;

        if let Some(last) = gates.get(partition) {
            let elapsed = now - *last;
            if elapsed < self.cooldown {
                return Err(LobbyError::rate_limited(partition, self.cooldown - elapsed));
            }
        }

        gates.insert(partition.to_string(), now);
        Ok(())
    }

    /// Forget a partition's gate, e.g. when the partition is removed
    pub fn reset(&self, partition: &str) {
        if let Ok(mut gates) = self.gates.lock() {
            gates.remove(partition);
        }
    }
}
