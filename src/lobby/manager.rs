//! Lobby manager: the command surface over the store
//!
//! Each command validates its input, awaits any tier lookup without holding
//! a partition lock, then hands the mutation to the store, which re-checks
//! every precondition atomically. Events are published after the store call
//! returns; a failed publish is logged and never fails the command.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::amqp::publisher::EventPublisher;
use crate::clock::Clock;
use crate::config::LobbySettings;
use crate::error::{LobbyError, LobbyResult};
use crate::lobby::instance::{Lobby, LobbyState};
use crate::lobby::lifecycle::Phase;
use crate::lobby::provider::{PartitionPolicy, PartitionProvider};
use crate::lobby::pruning::PruningPolicy;
use crate::lobby::rate_limit::ListRateLimiter;
use crate::lobby::store::{Closed, LobbyStore, Updated};
use crate::metrics::MetricsCollector;
use crate::rank::TimedTierLookup;
use crate::snapshot::{SnapshotManager, SnapshotStatus};
use crate::types::{
    HostKey, JoinTarget, LobbyCancelled, LobbyCreated, LobbyEvent, LobbyFilled, LobbyPruned,
    LobbyStarted, ParticipantId, ParticipantJoined, ParticipantKicked, ParticipantLeft,
    PartitionCleared, PartitionName, Region, RosterEntry, Tier,
};
use crate::utils::minutes_between;

/// Counters kept by the manager
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LobbyManagerStats {
    pub lobbies_created: u64,
    pub lobbies_started: u64,
    pub lobbies_cancelled: u64,
    pub lobbies_pruned: u64,
    pub joins: u64,
    pub leaves: u64,
    pub kicks: u64,
    /// Current number of lobbies across all partitions
    pub active_lobbies: usize,
    /// Current number of participants sitting in lobbies
    pub waiting_participants: usize,
}

/// What callers see of a lobby; never carries the credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbySummary {
    pub host: HostKey,
    pub region: Region,
    pub min_tier: Tier,
    pub size: usize,
    pub capacity: usize,
    pub state: LobbyState,
    pub age_minutes: i64,
    pub idle_minutes: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roster: Option<Vec<RosterEntry>>,
}

impl LobbySummary {
    pub fn of(lobby: &Lobby, capacity: usize, now: DateTime<Utc>, with_roster: bool) -> Self {
        Self {
            host: lobby.host().to_string(),
            region: lobby.region(),
            min_tier: lobby.min_tier(),
            size: lobby.size(),
            capacity,
            state: lobby.state(capacity),
            age_minutes: minutes_between(lobby.created_at(), now),
            idle_minutes: minutes_between(lobby.last_activity_at(), now),
            roster: with_roster.then(|| lobby.roster()),
        }
    }
}

/// A newly created lobby and the credential to hand its host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedLobby {
    pub lobby: LobbySummary,
    pub credential: String,
}

/// Outcome of a successful start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartedLobby {
    pub host: HostKey,
    pub region: Region,
    /// Join order, host first and flagged
    pub roster: Vec<RosterEntry>,
    pub forced: bool,
}

/// Per-partition line of [`ManagerStatus`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionStatus {
    pub name: PartitionName,
    pub lobbies: usize,
    pub participants: usize,
    pub exempt_from_pruning: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub paused: bool,
    pub hosting_enabled: bool,
    pub partitions: Vec<PartitionStatus>,
    pub snapshot: SnapshotStatus,
}

/// Serialized lobby command
///
/// Region and tier arrive as text so that bad input maps to
/// `invalid_region` and `invalid_tier` replies rather than decode failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Create {
        partition: PartitionName,
        host: ParticipantId,
        #[serde(default)]
        region: Option<String>,
        #[serde(default)]
        min_tier: Option<String>,
    },
    /// Join by host when `host` is set, otherwise by region
    Join {
        partition: PartitionName,
        seeker: ParticipantId,
        #[serde(default)]
        host: Option<HostKey>,
        #[serde(default)]
        region: Option<String>,
    },
    Leave {
        partition: PartitionName,
        participant: ParticipantId,
    },
    Kick {
        partition: PartitionName,
        host: ParticipantId,
        target: ParticipantId,
    },
    Start {
        partition: PartitionName,
        host: ParticipantId,
        #[serde(default)]
        force: bool,
    },
    Cancel {
        partition: PartitionName,
        host: ParticipantId,
    },
    List {
        partition: PartitionName,
        #[serde(default)]
        full: bool,
    },
    Info {
        partition: PartitionName,
        host: HostKey,
    },
    Credential {
        partition: PartitionName,
        participant: ParticipantId,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Create { .. } => "create",
            Command::Join { .. } => "join",
            Command::Leave { .. } => "leave",
            Command::Kick { .. } => "kick",
            Command::Start { .. } => "start",
            Command::Cancel { .. } => "cancel",
            Command::List { .. } => "list",
            Command::Info { .. } => "info",
            Command::Credential { .. } => "credential",
        }
    }
}

/// Tagged reply to a [`Command`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum CommandReply {
    Created(CreatedLobby),
    Joined { lobby: LobbySummary },
    Left { lobby: LobbySummary },
    Kicked { lobby: LobbySummary, target: ParticipantId },
    Started(StartedLobby),
    Cancelled { host: HostKey, participants: Vec<ParticipantId> },
    Listing { lobbies: Vec<LobbySummary> },
    Info { lobby: LobbySummary },
    Credential { host: HostKey, credential: String },
    Error { error: String, message: String },
}

impl From<LobbyError> for CommandReply {
    fn from(error: LobbyError) -> Self {
        CommandReply::Error {
            error: error.tag().to_string(),
            message: error.to_string(),
        }
    }
}

fn parse_region(value: Option<String>) -> LobbyResult<Option<Region>> {
    value.map(|v| v.parse()).transpose()
}

fn parse_tier(value: Option<String>) -> LobbyResult<Option<Tier>> {
    value.map(|v| v.parse()).transpose()
}

pub struct LobbyManager {
    store: Arc<LobbyStore>,
    snapshots: Arc<SnapshotManager>,
    provider: Arc<dyn PartitionProvider>,
    tiers: TimedTierLookup,
    publisher: Arc<dyn EventPublisher>,
    rate_limiter: ListRateLimiter,
    pruning: PruningPolicy,
    clock: Arc<dyn Clock>,
    hosting_enabled: AtomicBool,
    stats: RwLock<LobbyManagerStats>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl LobbyManager {
    pub fn new(
        snapshots: Arc<SnapshotManager>,
        provider: Arc<dyn PartitionProvider>,
        tiers: TimedTierLookup,
        publisher: Arc<dyn EventPublisher>,
        settings: &LobbySettings,
    ) -> LobbyResult<Self> {
        let store = snapshots.store().clone();
        let clock = store.clock();

        let manager = Self {
            rate_limiter: ListRateLimiter::new(settings.list_cooldown(), clock.clone()),
            pruning: settings.pruning_policy(),
            store,
            snapshots,
            provider,
            tiers,
            publisher,
            clock,
            hosting_enabled: AtomicBool::new(true),
            stats: RwLock::new(LobbyManagerStats::default()),
            metrics: None,
        };
        manager.sync_partitions()?;
        Ok(manager)
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn store(&self) -> &Arc<LobbyStore> {
        &self.store
    }

    /// Make every store partition known to the provider and vice versa
    ///
    /// Partitions added at runtime come back from a snapshot without a
    /// league; they get a standalone policy.
    fn sync_partitions(&self) -> LobbyResult<()> {
        for name in self.store.partition_names()? {
            if self.provider.add_partition(&name)? {
                info!("Registered partition {} restored from snapshot", name);
            }
        }
        for policy in self.provider.partitions() {
            self.store.add_partition(&policy.name)?;
        }
        Ok(())
    }

    fn ensure_accepting(&self) -> LobbyResult<()> {
        if self.snapshots.is_paused() {
            Err(LobbyError::CommandsPaused)
        } else {
            Ok(())
        }
    }

    fn update_stats(&self, update: impl FnOnce(&mut LobbyManagerStats)) {
        match self.stats.write() {
            Ok(mut stats) => update(&mut stats),
            Err(_) => warn!("Failed to acquire stats lock"),
        }
    }

    fn observe<T>(&self, command: &str, started: Instant, result: &LobbyResult<T>) {
        if let Err(e) = result {
            debug!("{} failed: {}", command, e);
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_command(command, result, started.elapsed());
        }
    }

    /// Hand an event to the publisher; delivery is counted by the dispatcher
    async fn emit(&self, event: LobbyEvent) {
        let kind = event.kind();
        if let Err(e) = self.publisher.publish(event).await {
            warn!("Failed to queue {} event: {:#}", kind, e);
            if let Some(metrics) = &self.metrics {
                metrics.record_event(kind, false);
            }
        }
    }

    fn summary(&self, lobby: &Lobby, with_roster: bool) -> LobbySummary {
        LobbySummary::of(lobby, self.store.capacity(), self.clock.now(), with_roster)
    }

    /// Remove stale lobbies from a partition unless it is exempt
    async fn prune(&self, policy: &PartitionPolicy) -> LobbyResult<()> {
        if policy.exempt_from_pruning {
            return Ok(());
        }

        let pruned = self.store.prune(&policy.name, &self.pruning).await?;
        if pruned.is_empty() {
            return Ok(());
        }

        self.update_stats(|s| s.lobbies_pruned += pruned.len() as u64);
        for entry in pruned {
            info!(
                "Pruned lobby {} in {} ({})",
                entry.lobby.host(),
                policy.name,
                entry.reason
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_lobby_closed(&policy.name, "pruned");
            }
            self.emit(LobbyEvent::LobbyPruned(LobbyPruned {
                partition: policy.name.clone(),
                host: entry.lobby.host().to_string(),
                participants: entry.lobby.participants().to_vec(),
                reason: entry.reason,
                timestamp: self.clock.now(),
            }))
            .await;
        }
        Ok(())
    }

    /// Open a lobby hosted by `host`
    ///
    /// In a region-locked partition the region may be omitted. Without an
    /// explicit minimum the league minimum applies.
    pub async fn create(
        &self,
        partition: &str,
        host: &str,
        region: Option<Region>,
        min_tier: Option<Tier>,
    ) -> LobbyResult<CreatedLobby> {
        let started = Instant::now();
        let result = self.create_inner(partition, host, region, min_tier).await;
        self.observe("create", started, &result);
        result
    }

    async fn create_inner(
        &self,
        partition: &str,
        host: &str,
        region: Option<Region>,
        min_tier: Option<Tier>,
    ) -> LobbyResult<CreatedLobby> {
        self.ensure_accepting()?;
        if !self.hosting_enabled.load(Ordering::SeqCst) {
            return Err(LobbyError::HostingDisabled);
        }

        let policy = self.provider.policy(partition)?;
        let region = policy.lobby_region(region)?;
        let min_tier = policy.lobby_min_tier(min_tier);

        if self.store.find_by_host(partition, host).await?.is_some() {
            return Err(LobbyError::AlreadyHosting {
                partition: partition.to_string(),
                host: host.to_string(),
            });
        }
        if let Some(other) = self.store.find_by_participant(partition, host).await? {
            return Err(LobbyError::AlreadyMember {
                participant: host.to_string(),
                host: other.host().to_string(),
            });
        }

        let tier = self.tiers.tier_of(host).await?.tier;
        policy.check_tier(host, tier)?;
        if tier < min_tier {
            return Err(LobbyError::TierTooLow {
                participant: host.to_string(),
                required: min_tier.to_string(),
                actual: tier.to_string(),
            });
        }

        let lobby = self.store.create(partition, host, region, min_tier).await?;
        info!(
            "Lobby {} opened in {} ({}, min {})",
            host, partition, region, min_tier
        );

        self.update_stats(|s| s.lobbies_created += 1);
        if let Some(metrics) = &self.metrics {
            metrics.record_lobby_created(partition);
        }
        self.emit(LobbyEvent::LobbyCreated(LobbyCreated {
            partition: partition.to_string(),
            host: host.to_string(),
            region,
            min_tier,
            timestamp: lobby.created_at(),
        }))
        .await;

        Ok(CreatedLobby {
            credential: lobby.credential().to_string(),
            lobby: self.summary(&lobby, true),
        })
    }

    /// Join a specific lobby or the best open lobby in a region
    pub async fn join(
        &self,
        partition: &str,
        seeker: &str,
        target: JoinTarget,
    ) -> LobbyResult<LobbySummary> {
        let started = Instant::now();
        let result = self.join_inner(partition, seeker, &target).await;
        self.observe("join", started, &result);
        result
    }

    async fn join_inner(
        &self,
        partition: &str,
        seeker: &str,
        target: &JoinTarget,
    ) -> LobbyResult<LobbySummary> {
        self.ensure_accepting()?;
        let policy = self.provider.policy(partition)?;
        self.prune(&policy).await?;

        // Fail fast before the lookup; the store checks all of this again.
        if let Some(current) = self.store.find_by_participant(partition, seeker).await? {
            return Err(LobbyError::AlreadyMember {
                participant: seeker.to_string(),
                host: current.host().to_string(),
            });
        }
        if let JoinTarget::Host { host } = target {
            let lobby = self.store.find_by_host(partition, host).await?.ok_or_else(|| {
                LobbyError::LobbyNotFound {
                    partition: partition.to_string(),
                    host: host.clone(),
                }
            })?;
            if lobby.is_full(self.store.capacity()) {
                return Err(LobbyError::LobbyFull { host: host.clone() });
            }
        }

        let tier = self.tiers.tier_of(seeker).await?.tier;
        policy.check_tier(seeker, tier)?;

        let Updated { lobby, phase } = match target {
            JoinTarget::Host { host } => {
                self.store
                    .add_participant(partition, host, seeker, tier)
                    .await?
            }
            JoinTarget::Region { region } => {
                self.store.join_best(partition, seeker, *region, tier).await?
            }
        };
        debug!(
            "{} joined {} in {} ({}/{})",
            seeker,
            lobby.host(),
            partition,
            lobby.size(),
            self.store.capacity()
        );

        self.update_stats(|s| s.joins += 1);
        if let Some(metrics) = &self.metrics {
            metrics.record_join(partition, target.mode());
        }
        self.emit(LobbyEvent::ParticipantJoined(ParticipantJoined {
            partition: partition.to_string(),
            host: lobby.host().to_string(),
            participant: seeker.to_string(),
            participants: lobby.participants().to_vec(),
            timestamp: lobby.last_activity_at(),
        }))
        .await;
        if phase == Phase::Full {
            info!("Lobby {} in {} is full", lobby.host(), partition);
            self.emit(LobbyEvent::LobbyFilled(LobbyFilled {
                partition: partition.to_string(),
                host: lobby.host().to_string(),
                timestamp: lobby.last_activity_at(),
            }))
            .await;
        }

        Ok(self.summary(&lobby, true))
    }

    /// Leave whichever lobby the participant is in
    pub async fn leave(&self, partition: &str, participant: &str) -> LobbyResult<LobbySummary> {
        let started = Instant::now();
        let result = self.leave_inner(partition, participant).await;
        self.observe("leave", started, &result);
        result
    }

    async fn leave_inner(&self, partition: &str, participant: &str) -> LobbyResult<LobbySummary> {
        self.ensure_accepting()?;
        let Updated { lobby, .. } = self.store.leave(partition, participant).await?;

        self.update_stats(|s| s.leaves += 1);
        self.emit(LobbyEvent::ParticipantLeft(ParticipantLeft {
            partition: partition.to_string(),
            host: lobby.host().to_string(),
            participant: participant.to_string(),
            remaining: lobby.participants().to_vec(),
            timestamp: lobby.last_activity_at(),
        }))
        .await;

        Ok(self.summary(&lobby, true))
    }

    /// Host removes a member
    pub async fn kick(&self, partition: &str, host: &str, target: &str) -> LobbyResult<LobbySummary> {
        let started = Instant::now();
        let result = async {
            self.ensure_accepting()?;
            let updated = self.store.kick(partition, host, target).await?;
            self.after_kick(partition, updated, target, false).await
        }
        .await;
        self.observe("kick", started, &result);
        result
    }

    async fn after_kick(
        &self,
        partition: &str,
        updated: Updated,
        target: &str,
        by_admin: bool,
    ) -> LobbyResult<LobbySummary> {
        let lobby = updated.lobby;
        info!(
            "{} kicked from {} in {}{}",
            target,
            lobby.host(),
            partition,
            if by_admin { " by admin" } else { "" }
        );

        self.update_stats(|s| s.kicks += 1);
        self.emit(LobbyEvent::ParticipantKicked(ParticipantKicked {
            partition: partition.to_string(),
            host: lobby.host().to_string(),
            participant: target.to_string(),
            by_admin,
            timestamp: lobby.last_activity_at(),
        }))
        .await;

        Ok(self.summary(&lobby, true))
    }

    /// Start the host's lobby; `force` allows starting below capacity
    ///
    /// Tiers are not re-checked here, only at join time.
    pub async fn start(&self, partition: &str, host: &str, force: bool) -> LobbyResult<StartedLobby> {
        let started = Instant::now();
        let result = self.start_inner(partition, host, force).await;
        self.observe("start", started, &result);
        result
    }

    async fn start_inner(
        &self,
        partition: &str,
        host: &str,
        force: bool,
    ) -> LobbyResult<StartedLobby> {
        self.ensure_accepting()?;
        let Closed { lobby, .. } = self.store.start(partition, host, force).await?;
        let roster = lobby.roster();
        info!(
            "Lobby {} in {} started with {} participants{}",
            host,
            partition,
            roster.len(),
            if force { " (forced)" } else { "" }
        );

        self.update_stats(|s| s.lobbies_started += 1);
        if let Some(metrics) = &self.metrics {
            metrics.record_lobby_closed(partition, "started");
        }
        self.emit(LobbyEvent::LobbyStarted(LobbyStarted {
            partition: partition.to_string(),
            host: host.to_string(),
            region: lobby.region(),
            roster: roster.clone(),
            forced: force,
            timestamp: self.clock.now(),
        }))
        .await;

        Ok(StartedLobby {
            host: host.to_string(),
            region: lobby.region(),
            roster,
            forced: force,
        })
    }

    /// Host cancels their lobby; returns the participants it had
    pub async fn cancel(&self, partition: &str, host: &str) -> LobbyResult<Vec<ParticipantId>> {
        let started = Instant::now();
        let result = async {
            self.ensure_accepting()?;
            let closed = self.store.cancel(partition, host).await?;
            Ok::<_, LobbyError>(self.after_cancel(partition, closed, false).await)
        }
        .await;
        self.observe("cancel", started, &result);
        result
    }

    async fn after_cancel(&self, partition: &str, closed: Closed, by_admin: bool) -> Vec<ParticipantId> {
        let lobby = closed.lobby;
        let participants = lobby.participants().to_vec();
        info!(
            "Lobby {} in {} cancelled{}",
            lobby.host(),
            partition,
            if by_admin { " by admin" } else { "" }
        );

        self.update_stats(|s| s.lobbies_cancelled += 1);
        if let Some(metrics) = &self.metrics {
            metrics.record_lobby_closed(partition, "cancelled");
        }
        self.emit(LobbyEvent::LobbyCancelled(LobbyCancelled {
            partition: partition.to_string(),
            host: lobby.host().to_string(),
            participants: participants.clone(),
            by_admin,
            timestamp: self.clock.now(),
        }))
        .await;

        participants
    }

    /// Lobbies in a partition, oldest first; rate limited per partition
    pub async fn list(&self, partition: &str, full: bool) -> LobbyResult<Vec<LobbySummary>> {
        let started = Instant::now();
        let result = self.list_inner(partition, full).await;
        self.observe("list", started, &result);
        result
    }

    async fn list_inner(&self, partition: &str, full: bool) -> LobbyResult<Vec<LobbySummary>> {
        self.ensure_accepting()?;
        let policy = self.provider.policy(partition)?;

        if let Err(e) = self.rate_limiter.try_acquire(partition) {
            if let Some(metrics) = &self.metrics {
                metrics.record_rate_limited(partition);
            }
            return Err(e);
        }

        self.prune(&policy).await?;
        let lobbies = self.store.lobbies(partition).await?;
        Ok(lobbies.iter().map(|l| self.summary(l, full)).collect())
    }

    /// A lobby by host key, or the lobby that participant is in
    pub async fn info(&self, partition: &str, key: &str) -> LobbyResult<LobbySummary> {
        let started = Instant::now();
        let result = async {
            self.ensure_accepting()?;
            let policy = self.provider.policy(partition)?;
            self.prune(&policy).await?;

            let lobby = match self.store.find_by_host(partition, key).await? {
                Some(lobby) => Some(lobby),
                None => self.store.find_by_participant(partition, key).await?,
            };
            lobby
                .map(|l| self.summary(&l, true))
                .ok_or_else(|| LobbyError::LobbyNotFound {
                    partition: partition.to_string(),
                    host: key.to_string(),
                })
        }
        .await;
        self.observe("info", started, &result);
        result
    }

    /// Credential of the lobby the participant belongs to
    pub async fn credential(&self, partition: &str, participant: &str) -> LobbyResult<(HostKey, String)> {
        let started = Instant::now();
        let result = async {
            self.ensure_accepting()?;
            self.store
                .find_by_participant(partition, participant)
                .await?
                .map(|l| (l.host().to_string(), l.credential().to_string()))
                .ok_or_else(|| LobbyError::NotMember {
                    partition: partition.to_string(),
                    participant: participant.to_string(),
                })
        }
        .await;
        self.observe("credential", started, &result);
        result
    }

    /// Run a serialized command and wrap the outcome in a tagged reply
    pub async fn execute(&self, command: Command) -> CommandReply {
        match self.dispatch(command).await {
            Ok(reply) => reply,
            Err(e) => e.into(),
        }
    }

    async fn dispatch(&self, command: Command) -> LobbyResult<CommandReply> {
        match command {
            Command::Create {
                partition,
                host,
                region,
                min_tier,
            } => {
                let region = parse_region(region)?;
                let min_tier = parse_tier(min_tier)?;
                let created = self.create(&partition, &host, region, min_tier).await?;
                Ok(CommandReply::Created(created))
            }
            Command::Join {
                partition,
                seeker,
                host,
                region,
            } => {
                let target = match (host, parse_region(region)?) {
                    (Some(host), _) => JoinTarget::Host { host },
                    (None, Some(region)) => JoinTarget::Region { region },
                    (None, None) => {
                        return Err(LobbyError::InvalidRegion {
                            value: "missing".to_string(),
                        })
                    }
                };
                let lobby = self.join(&partition, &seeker, target).await?;
                Ok(CommandReply::Joined { lobby })
            }
            Command::Leave {
                partition,
                participant,
            } => {
                let lobby = self.leave(&partition, &participant).await?;
                Ok(CommandReply::Left { lobby })
            }
            Command::Kick {
                partition,
                host,
                target,
            } => {
                let lobby = self.kick(&partition, &host, &target).await?;
                Ok(CommandReply::Kicked { lobby, target })
            }
            Command::Start {
                partition,
                host,
                force,
            } => Ok(CommandReply::Started(
                self.start(&partition, &host, force).await?,
            )),
            Command::Cancel { partition, host } => {
                let participants = self.cancel(&partition, &host).await?;
                Ok(CommandReply::Cancelled { host, participants })
            }
            Command::List { partition, full } => Ok(CommandReply::Listing {
                lobbies: self.list(&partition, full).await?,
            }),
            Command::Info { partition, host } => Ok(CommandReply::Info {
                lobby: self.info(&partition, &host).await?,
            }),
            Command::Credential {
                partition,
                participant,
            } => {
                let (host, credential) = self.credential(&partition, &participant).await?;
                Ok(CommandReply::Credential { host, credential })
            }
        }
    }

    // Operator commands. Permission checks belong to the caller.

    pub async fn admin_cancel(&self, partition: &str, host: &str) -> LobbyResult<Vec<ParticipantId>> {
        self.ensure_accepting()?;
        let closed = self.store.admin_cancel(partition, host).await?;
        Ok(self.after_cancel(partition, closed, true).await)
    }

    /// Remove any non-host member of a lobby
    pub async fn admin_kick(&self, partition: &str, host: &str, target: &str) -> LobbyResult<LobbySummary> {
        self.ensure_accepting()?;
        let updated = self.store.admin_kick(partition, host, target).await?;
        self.after_kick(partition, updated, target, true).await
    }

    /// Drop every lobby in one partition; returns how many were removed
    pub async fn clear_partition(&self, partition: &str) -> LobbyResult<usize> {
        self.ensure_accepting()?;
        let removed = self.store.clear(partition).await?;
        self.after_clear(partition, removed.len()).await;
        Ok(removed.len())
    }

    async fn after_clear(&self, partition: &str, removed: usize) {
        warn!("Cleared {} lobbies from {}", removed, partition);
        if let Some(metrics) = &self.metrics {
            for _ in 0..removed {
                metrics.record_lobby_closed(partition, "cleared");
            }
        }
        self.emit(LobbyEvent::PartitionCleared(PartitionCleared {
            partition: partition.to_string(),
            lobbies_removed: removed,
            timestamp: self.clock.now(),
        }))
        .await;
    }

    pub async fn clear_all(&self) -> LobbyResult<usize> {
        self.ensure_accepting()?;
        let mut total = 0;
        for partition in self.store.partition_names()? {
            total += self.clear_partition(&partition).await?;
        }
        Ok(total)
    }

    /// Register a partition; `false` if it already existed
    pub fn add_partition(&self, name: &str) -> LobbyResult<bool> {
        let added = self.provider.add_partition(name)?;
        let created = self.store.add_partition(name)?;
        Ok(added || created)
    }

    /// Drop a partition and all of its lobbies
    pub async fn remove_partition(&self, name: &str) -> LobbyResult<usize> {
        if self.provider.remove_partition(name)?.is_none() && !self.store.has_partition(name) {
            return Err(LobbyError::PartitionNotFound {
                partition: name.to_string(),
            });
        }
        let removed = self.store.remove_partition(name).await?;
        self.rate_limiter.reset(name);
        if !removed.is_empty() {
            self.after_clear(name, removed.len()).await;
        }
        Ok(removed.len())
    }

    pub fn set_hosting_enabled(&self, enabled: bool) {
        self.hosting_enabled.store(enabled, Ordering::SeqCst);
        info!(
            "Hosting {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn hosting_enabled(&self) -> bool {
        self.hosting_enabled.load(Ordering::SeqCst)
    }

    /// Stop lobby commands and save immediately
    pub async fn pause(&self) -> SnapshotStatus {
        self.snapshots.pause().await
    }

    /// Reload the snapshot and accept commands again
    pub async fn resume(&self) -> LobbyResult<usize> {
        let restored = self.snapshots.resume().await?;
        self.sync_partitions()?;
        Ok(restored)
    }

    pub fn is_paused(&self) -> bool {
        self.snapshots.is_paused()
    }

    pub async fn status(&self) -> LobbyResult<ManagerStatus> {
        let counts = self.store.counts().await?;
        let partitions = counts
            .into_iter()
            .map(|(name, lobbies, participants)| PartitionStatus {
                exempt_from_pruning: self
                    .provider
                    .policy(&name)
                    .map(|p| p.exempt_from_pruning)
                    .unwrap_or(false),
                name,
                lobbies,
                participants,
            })
            .collect();

        Ok(ManagerStatus {
            paused: self.is_paused(),
            hosting_enabled: self.hosting_enabled(),
            partitions,
            snapshot: self.snapshots.status(),
        })
    }

    /// Counters plus current occupancy
    pub async fn stats(&self) -> LobbyResult<LobbyManagerStats> {
        let counts = self.store.counts().await?;
        let mut stats = self
            .stats
            .read()
            .map_err(|_| LobbyError::lock_poisoned("stats"))?
            .clone();
        stats.active_lobbies = counts.iter().map(|(_, lobbies, _)| lobbies).sum();
        stats.waiting_participants = counts.iter().map(|(_, _, participants)| participants).sum();
        Ok(stats)
    }
}
