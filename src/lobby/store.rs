//! Partitioned lobby store
//!
//! The store is the only owner of lobby state. Each partition sits behind
//! its own async mutex; every operation takes that lock once, runs the
//! lifecycle guard and applies the change before releasing it. Nothing
//! awaits while a partition lock is held except acquiring it.
//!
//! While the store is paused every lobby mutation fails with
//! `CommandsPaused`. The flag is read under the partition lock, so a
//! snapshot taken after `set_paused(true)` sees every change that landed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, Notify};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{LobbyError, LobbyResult};
use crate::lobby::instance::Lobby;
use crate::lobby::lifecycle::{guard, is_allowed, Actor, Phase, Transition, TransitionKind};
use crate::lobby::matching::{GreedyFillResolver, LobbyResolver, ResolveOutcome};
use crate::lobby::pruning::PruningPolicy;
use crate::snapshot::Snapshot;
use crate::types::{HostKey, PartitionName, PruneReason, Region, Tier};
use crate::utils::generate_credential;

type PartitionLobbies = HashMap<HostKey, Lobby>;

/// Wakes the snapshot writer after successful mutations
#[derive(Debug, Default)]
pub struct MutationSignal {
    generation: AtomicU64,
    notify: Notify,
}

impl MutationSignal {
    fn bump(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Number of successful mutations so far
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Resolves after the next mutation, or immediately if one happened
    /// since the last call
    pub async fn changed(&self) {
        self.notify.notified().await;
    }
}

/// Result of a transition that keeps the lobby alive
#[derive(Debug, Clone)]
pub struct Updated {
    pub lobby: Lobby,
    pub phase: Phase,
}

/// Result of a terminal transition; the lobby is no longer stored
#[derive(Debug, Clone)]
pub struct Closed {
    pub lobby: Lobby,
    pub phase: Phase,
}

/// A lobby removed by the pruner
#[derive(Debug, Clone)]
pub struct PrunedLobby {
    pub lobby: Lobby,
    pub reason: PruneReason,
}

/// How a transition locates its lobby
#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    /// The lobby keyed by this host
    Host(&'a str),
    /// The lobby hosted by the caller; a non-host member gets `NotAuthorized`
    HostedBy(&'a str),
    /// The lobby containing this participant
    MemberOf(&'a str),
}

enum Applied {
    Updated(Updated),
    Closed(Closed),
}

pub struct LobbyStore {
    partitions: RwLock<HashMap<PartitionName, Arc<Mutex<PartitionLobbies>>>>,
    capacity: usize,
    clock: Arc<dyn Clock>,
    resolver: Arc<dyn LobbyResolver>,
    mutations: Arc<MutationSignal>,
    paused: AtomicBool,
}

impl LobbyStore {
    pub fn new(partitions: &[PartitionName], capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self::with_resolver(partitions, capacity, clock, Arc::new(GreedyFillResolver::new()))
    }

    pub fn with_resolver(
        partitions: &[PartitionName],
        capacity: usize,
        clock: Arc<dyn Clock>,
        resolver: Arc<dyn LobbyResolver>,
    ) -> Self {
        let map = partitions
            .iter()
            .map(|name| (name.clone(), Arc::new(Mutex::new(HashMap::new()))))
            .collect();

        Self {
            partitions: RwLock::new(map),
            capacity,
            clock,
            resolver,
            mutations: Arc::new(MutationSignal::default()),
            paused: AtomicBool::new(false),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn mutation_signal(&self) -> Arc<MutationSignal> {
        self.mutations.clone()
    }

    /// Reject (or accept again) lobby mutations
    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Must be called with the partition lock held
    fn ensure_writable(&self) -> LobbyResult<()> {
        if self.is_paused() {
            Err(LobbyError::CommandsPaused)
        } else {
            Ok(())
        }
    }

    fn partition(&self, name: &str) -> LobbyResult<Arc<Mutex<PartitionLobbies>>> {
        let partitions = self
            .partitions
            .read()
            .map_err(|_| LobbyError::lock_poisoned("partition map"))?;
        partitions
            .get(name)
            .cloned()
            .ok_or_else(|| LobbyError::PartitionNotFound {
                partition: name.to_string(),
            })
    }

    pub fn has_partition(&self, name: &str) -> bool {
        self.partition(name).is_ok()
    }

    /// Partition names, sorted
    pub fn partition_names(&self) -> LobbyResult<Vec<PartitionName>> {
        let partitions = self
            .partitions
            .read()
            .map_err(|_| LobbyError::lock_poisoned("partition map"))?;
        let mut names: Vec<_> = partitions.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Add an empty partition; returns false if it already existed
    pub fn add_partition(&self, name: &str) -> LobbyResult<bool> {
        let mut partitions = self
            .partitions
            .write()
            .map_err(|_| LobbyError::lock_poisoned("partition map"))?;
        if partitions.contains_key(name) {
            return Ok(false);
        }
        partitions.insert(name.to_string(), Arc::new(Mutex::new(HashMap::new())));
        drop(partitions);

        info!("Added partition {}", name);
        self.mutations.bump();
        Ok(true)
    }

    /// Remove a partition and return the lobbies it still held
    pub async fn remove_partition(&self, name: &str) -> LobbyResult<Vec<Lobby>> {
        let removed = {
            let mut partitions = self
                .partitions
                .write()
                .map_err(|_| LobbyError::lock_poisoned("partition map"))?;
            partitions
                .remove(name)
                .ok_or_else(|| LobbyError::PartitionNotFound {
                    partition: name.to_string(),
                })?
        };

        let lobbies: Vec<Lobby> = removed.lock().await.drain().map(|(_, l)| l).collect();
        info!("Removed partition {} ({} lobbies dropped)", name, lobbies.len());
        self.mutations.bump();
        Ok(lobbies)
    }

    /// Open a new lobby with the host as its only participant
    pub async fn create(
        &self,
        partition: &str,
        host: &str,
        region: Region,
        min_tier: Tier,
    ) -> LobbyResult<Lobby> {
        let handle = self.partition(partition)?;
        let mut lobbies = handle.lock().await;
        self.ensure_writable()?;

        if lobbies.contains_key(host) {
            return Err(LobbyError::AlreadyHosting {
                partition: partition.to_string(),
                host: host.to_string(),
            });
        }
        if let Some(other) = lobbies.values().find(|l| l.has_member(host)) {
            return Err(LobbyError::AlreadyMember {
                participant: host.to_string(),
                host: other.host().to_string(),
            });
        }
        if !is_allowed(Phase::Absent, TransitionKind::Create, Phase::Open) {
            return Err(LobbyError::InternalError {
                message: "Create transition missing from lifecycle table".to_string(),
            });
        }

        let lobby = Lobby::new(
            host.to_string(),
            generate_credential(region),
            region,
            min_tier,
            self.clock.now(),
        );
        lobby.check_invariants(self.capacity)?;
        lobbies.insert(host.to_string(), lobby.clone());
        drop(lobbies);

        debug!("Stored lobby {} in {}", host, partition);
        self.mutations.bump();
        Ok(lobby)
    }

    fn locate(
        lobbies: &PartitionLobbies,
        partition: &str,
        target: Target<'_>,
    ) -> LobbyResult<HostKey> {
        match target {
            Target::Host(host) => {
                if lobbies.contains_key(host) {
                    Ok(host.to_string())
                } else {
                    Err(LobbyError::LobbyNotFound {
                        partition: partition.to_string(),
                        host: host.to_string(),
                    })
                }
            }
            Target::HostedBy(caller) => {
                if lobbies.contains_key(caller) {
                    return Ok(caller.to_string());
                }
                match lobbies.values().find(|l| l.has_member(caller)) {
                    Some(lobby) => Err(LobbyError::NotAuthorized {
                        caller: caller.to_string(),
                        host: lobby.host().to_string(),
                    }),
                    None => Err(LobbyError::LobbyNotFound {
                        partition: partition.to_string(),
                        host: caller.to_string(),
                    }),
                }
            }
            Target::MemberOf(participant) => lobbies
                .values()
                .find(|l| l.has_member(participant))
                .map(|l| l.host().to_string())
                .ok_or_else(|| LobbyError::NotMember {
                    partition: partition.to_string(),
                    participant: participant.to_string(),
                }),
        }
    }

    /// Guard and apply one transition against a locked partition
    fn apply_locked(
        &self,
        lobbies: &mut PartitionLobbies,
        partition: &str,
        key: &str,
        transition: Transition<'_>,
    ) -> LobbyResult<Applied> {
        self.ensure_writable()?;
        let lobby = lobbies
            .get(key)
            .ok_or_else(|| LobbyError::LobbyNotFound {
                partition: partition.to_string(),
                host: key.to_string(),
            })?;

        let phase = guard(lobby, partition, &transition, self.capacity)?;

        if let Transition::Join { participant, .. } = transition {
            if let Some(other) = lobbies
                .values()
                .find(|l| l.host() != key && l.has_member(participant))
            {
                return Err(LobbyError::AlreadyMember {
                    participant: participant.to_string(),
                    host: other.host().to_string(),
                });
            }
        }

        if phase.is_terminal() {
            let lobby = lobbies
                .remove(key)
                .ok_or_else(|| LobbyError::InternalError {
                    message: format!("Lobby {} vanished while locked", key),
                })?;
            return Ok(Applied::Closed(Closed { lobby, phase }));
        }

        let now = self.clock.now();
        let lobby = lobbies
            .get_mut(key)
            .ok_or_else(|| LobbyError::InternalError {
                message: format!("Lobby {} vanished while locked", key),
            })?;

        match transition {
            Transition::Join { participant, .. } => {
                lobby.push_participant(participant.to_string(), now)
            }
            Transition::Leave { participant } => lobby.remove_participant(participant, now),
            Transition::Kick { target, .. } => lobby.remove_participant(target, now),
            Transition::Start { .. } | Transition::Cancel { .. } | Transition::Prune => {}
        }
        lobby.check_invariants(self.capacity)?;

        Ok(Applied::Updated(Updated {
            lobby: lobby.clone(),
            phase,
        }))
    }

    async fn transition(
        &self,
        partition: &str,
        target: Target<'_>,
        transition: Transition<'_>,
    ) -> LobbyResult<Applied> {
        let handle = self.partition(partition)?;
        let mut lobbies = handle.lock().await;

        let key = Self::locate(&lobbies, partition, target)?;
        let applied = self.apply_locked(&mut lobbies, partition, &key, transition)?;
        drop(lobbies);

        self.mutations.bump();
        Ok(applied)
    }

    async fn update(
        &self,
        partition: &str,
        target: Target<'_>,
        transition: Transition<'_>,
    ) -> LobbyResult<Updated> {
        match self.transition(partition, target, transition).await? {
            Applied::Updated(updated) => Ok(updated),
            Applied::Closed(closed) => Err(LobbyError::InternalError {
                message: format!("Lobby {} closed by a non-terminal transition", closed.lobby.host()),
            }),
        }
    }

    async fn close(
        &self,
        partition: &str,
        target: Target<'_>,
        transition: Transition<'_>,
    ) -> LobbyResult<Closed> {
        match self.transition(partition, target, transition).await? {
            Applied::Closed(closed) => Ok(closed),
            Applied::Updated(updated) => Err(LobbyError::InternalError {
                message: format!("Lobby {} survived a terminal transition", updated.lobby.host()),
            }),
        }
    }

    /// Add a participant to the lobby keyed by `host`, re-checking the tier
    pub async fn add_participant(
        &self,
        partition: &str,
        host: &str,
        participant: &str,
        tier: Tier,
    ) -> LobbyResult<Updated> {
        self.update(
            partition,
            Target::Host(host),
            Transition::Join { participant, tier },
        )
        .await
    }

    /// Resolve the best lobby for a region-based join and add the seeker,
    /// all under one partition lock
    pub async fn join_best(
        &self,
        partition: &str,
        participant: &str,
        region: Region,
        tier: Tier,
    ) -> LobbyResult<Updated> {
        let handle = self.partition(partition)?;
        let mut lobbies = handle.lock().await;
        self.ensure_writable()?;

        let outcome = {
            let candidates: Vec<&Lobby> = lobbies.values().collect();
            self.resolver
                .resolve(&candidates, region, tier, self.capacity)
        };

        let key = match outcome {
            ResolveOutcome::Chosen(key) => key,
            ResolveOutcome::AllFull => {
                return Err(LobbyError::AllFull {
                    partition: partition.to_string(),
                    region: region.to_string(),
                })
            }
            ResolveOutcome::NoneEligible => {
                return Err(LobbyError::NoneEligible {
                    partition: partition.to_string(),
                    region: region.to_string(),
                })
            }
            ResolveOutcome::NoneExist => {
                return Err(LobbyError::NoneExist {
                    partition: partition.to_string(),
                })
            }
        };

        let applied =
            self.apply_locked(&mut lobbies, partition, &key, Transition::Join { participant, tier })?;
        drop(lobbies);
        self.mutations.bump();

        match applied {
            Applied::Updated(updated) => Ok(updated),
            Applied::Closed(closed) => Err(LobbyError::InternalError {
                message: format!("Lobby {} closed by a join", closed.lobby.host()),
            }),
        }
    }

    /// Remove a non-host participant from the lobby keyed by `host`
    pub async fn remove_participant(
        &self,
        partition: &str,
        host: &str,
        participant: &str,
    ) -> LobbyResult<Updated> {
        self.update(
            partition,
            Target::Host(host),
            Transition::Leave { participant },
        )
        .await
    }

    /// Remove a participant from whichever lobby holds them
    pub async fn leave(&self, partition: &str, participant: &str) -> LobbyResult<Updated> {
        self.update(
            partition,
            Target::MemberOf(participant),
            Transition::Leave { participant },
        )
        .await
    }

    pub async fn kick(&self, partition: &str, caller: &str, target: &str) -> LobbyResult<Updated> {
        self.update(
            partition,
            Target::HostedBy(caller),
            Transition::Kick {
                actor: Actor::Participant(caller),
                target,
            },
        )
        .await
    }

    pub async fn admin_kick(&self, partition: &str, host: &str, target: &str) -> LobbyResult<Updated> {
        self.update(
            partition,
            Target::Host(host),
            Transition::Kick {
                actor: Actor::Admin,
                target,
            },
        )
        .await
    }

    pub async fn start(&self, partition: &str, caller: &str, force: bool) -> LobbyResult<Closed> {
        self.close(
            partition,
            Target::HostedBy(caller),
            Transition::Start { caller, force },
        )
        .await
    }

    pub async fn cancel(&self, partition: &str, caller: &str) -> LobbyResult<Closed> {
        self.close(
            partition,
            Target::HostedBy(caller),
            Transition::Cancel {
                actor: Actor::Participant(caller),
            },
        )
        .await
    }

    pub async fn admin_cancel(&self, partition: &str, host: &str) -> LobbyResult<Closed> {
        self.close(
            partition,
            Target::Host(host),
            Transition::Cancel {
                actor: Actor::Admin,
            },
        )
        .await
    }

    /// Remove a lobby without any lifecycle checks
    pub async fn delete(&self, partition: &str, host: &str) -> LobbyResult<Lobby> {
        let handle = self.partition(partition)?;
        let mut lobbies = handle.lock().await;
        self.ensure_writable()?;
        let removed = lobbies.remove(host);
        drop(lobbies);
        let lobby = removed.ok_or_else(|| LobbyError::LobbyNotFound {
            partition: partition.to_string(),
            host: host.to_string(),
        })?;
        self.mutations.bump();
        Ok(lobby)
    }

    pub async fn find_by_host(&self, partition: &str, host: &str) -> LobbyResult<Option<Lobby>> {
        let handle = self.partition(partition)?;
        let lobbies = handle.lock().await;
        Ok(lobbies.get(host).cloned())
    }

    pub async fn find_by_participant(
        &self,
        partition: &str,
        participant: &str,
    ) -> LobbyResult<Option<Lobby>> {
        let handle = self.partition(partition)?;
        let lobbies = handle.lock().await;
        Ok(lobbies.values().find(|l| l.has_member(participant)).cloned())
    }

    /// Copy of every lobby in the partition, oldest first
    pub async fn lobbies(&self, partition: &str) -> LobbyResult<Vec<Lobby>> {
        let handle = self.partition(partition)?;
        let mut lobbies: Vec<Lobby> = handle.lock().await.values().cloned().collect();
        lobbies.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.host().cmp(b.host()))
        });
        Ok(lobbies)
    }

    /// Apply the pruning policy to one partition and return what was removed
    pub async fn prune(
        &self,
        partition: &str,
        policy: &PruningPolicy,
    ) -> LobbyResult<Vec<PrunedLobby>> {
        let handle = self.partition(partition)?;
        let mut lobbies = handle.lock().await;
        self.ensure_writable()?;
        let now = self.clock.now();

        let doomed: Vec<(HostKey, PruneReason)> = lobbies
            .values()
            .filter_map(|lobby| {
                policy
                    .evaluate(lobby, self.capacity, now)
                    .map(|reason| (lobby.host().to_string(), reason))
            })
            .collect();

        let mut pruned = Vec::with_capacity(doomed.len());
        for (host, reason) in doomed {
            if let Applied::Closed(closed) =
                self.apply_locked(&mut lobbies, partition, &host, Transition::Prune)?
            {
                pruned.push(PrunedLobby {
                    lobby: closed.lobby,
                    reason,
                });
            }
        }
        drop(lobbies);

        if !pruned.is_empty() {
            self.mutations.bump();
        }
        Ok(pruned)
    }

    /// Empty one partition, returning the removed lobbies
    pub async fn clear(&self, partition: &str) -> LobbyResult<Vec<Lobby>> {
        let handle = self.partition(partition)?;
        let mut lobbies = handle.lock().await;
        self.ensure_writable()?;
        let removed: Vec<Lobby> = lobbies.drain().map(|(_, l)| l).collect();
        drop(lobbies);
        self.mutations.bump();
        Ok(removed)
    }

    /// Copy every partition, holding each lock only for its own copy
    pub async fn snapshot(&self) -> LobbyResult<Snapshot> {
        let handles: Vec<(PartitionName, Arc<Mutex<PartitionLobbies>>)> = {
            let partitions = self
                .partitions
                .read()
                .map_err(|_| LobbyError::lock_poisoned("partition map"))?;
            partitions
                .iter()
                .map(|(name, handle)| (name.clone(), handle.clone()))
                .collect()
        };

        let mut snapshot = Snapshot::default();
        for (name, handle) in handles {
            let copy = handle.lock().await.clone();
            snapshot.insert_partition(name, copy.into_iter().collect());
        }
        Ok(snapshot)
    }

    /// Replace all state with a snapshot; `ensure` partitions exist afterwards
    pub fn restore(&self, snapshot: Snapshot, ensure: &[PartitionName]) -> LobbyResult<()> {
        let mut map: HashMap<PartitionName, Arc<Mutex<PartitionLobbies>>> = snapshot
            .into_partitions()
            .into_iter()
            .map(|(name, lobbies)| {
                (
                    name,
                    Arc::new(Mutex::new(lobbies.into_iter().collect::<PartitionLobbies>())),
                )
            })
            .collect();
        for name in ensure {
            map.entry(name.clone())
                .or_insert_with(|| Arc::new(Mutex::new(HashMap::new())));
        }

        let mut partitions = self
            .partitions
            .write()
            .map_err(|_| LobbyError::lock_poisoned("partition map"))?;
        *partitions = map;
        Ok(())
    }

    /// (lobbies, participants) per partition
    pub async fn counts(&self) -> LobbyResult<Vec<(PartitionName, usize, usize)>> {
        let mut counts = Vec::new();
        for name in self.partition_names()? {
            let handle = self.partition(&name)?;
            let lobbies = handle.lock().await;
            let participants = lobbies.values().map(|l| l.size()).sum();
            counts.push((name, lobbies.len(), participants));
        }
        Ok(counts)
    }
}
