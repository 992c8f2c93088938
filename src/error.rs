//! Error types for the lobby service
//!
//! Infrastructure code (config loading, AMQP, snapshot I/O, HTTP) uses
//! anyhow for consistent error handling. Lobby commands return the typed
//! [`LobbyError`] so every outcome maps to exactly one stable tag.

use chrono::Duration;

/// Result type alias for convenience
pub type Result<T> = anyhow::Result<T>;

/// Result type for lobby commands and store operations
pub type LobbyResult<T> = std::result::Result<T, LobbyError>;

/// Every failure a lobby command can report
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    #[error("{host} is already hosting a lobby in {partition}")]
    AlreadyHosting { partition: String, host: String },

    #[error("{participant} is already in a lobby hosted by {host}")]
    AlreadyMember { participant: String, host: String },

    #[error("No lobby hosted by {host} in {partition}")]
    LobbyNotFound { partition: String, host: String },

    #[error("Lobby hosted by {host} is full")]
    LobbyFull { host: String },

    #[error("{participant} is not in any lobby in {partition}")]
    NotMember {
        partition: String,
        participant: String,
    },

    #[error("Cannot remove the last participant of the lobby hosted by {host}")]
    CannotRemoveLast { host: String },

    #[error("Cannot remove host {host} from their own lobby; cancel it instead")]
    CannotRemoveHost { host: String },

    #[error("{caller} is not the host of the lobby hosted by {host}")]
    NotAuthorized { caller: String, host: String },

    #[error("Invalid region: {value}")]
    InvalidRegion { value: String },

    #[error("Invalid tier: {value}")]
    InvalidTier { value: String },

    #[error("Listing {partition} is rate limited, retry in {retry_after_ms}ms")]
    RateLimited {
        partition: String,
        retry_after_ms: i64,
    },

    #[error("Rank service unavailable: {message}")]
    ServiceUnavailable { message: String },

    #[error("All lobbies for region {region} in {partition} are full")]
    AllFull { partition: String, region: String },

    #[error("No eligible lobby for region {region} in {partition}")]
    NoneEligible { partition: String, region: String },

    #[error("There are no lobbies in {partition}")]
    NoneExist { partition: String },

    #[error("Snapshot write failed: {message}")]
    PersistenceWriteFailed { message: String },

    #[error("Partition not found: {partition}")]
    PartitionNotFound { partition: String },

    #[error("{participant} has tier {actual}, {required} is required")]
    TierTooLow {
        participant: String,
        required: String,
        actual: String,
    },

    #[error("No tier on record for {participant}")]
    UnknownTier { participant: String },

    #[error("Lobby hosted by {host} has {size} participants, {required} needed to start")]
    NotReady {
        host: String,
        size: usize,
        required: usize,
    },

    #[error("Lobby commands are paused")]
    CommandsPaused,

    #[error("Hosting new lobbies is disabled")]
    HostingDisabled,

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Internal service error: {message}")]
    InternalError { message: String },
}

impl LobbyError {
    /// Stable machine-readable tag for this error
    pub fn tag(&self) -> &'static str {
        match self {
            LobbyError::AlreadyHosting { .. } => "already_hosting",
            LobbyError::AlreadyMember { .. } => "already_member",
            LobbyError::LobbyNotFound { .. } => "lobby_not_found",
            LobbyError::LobbyFull { .. } => "lobby_full",
            LobbyError::NotMember { .. } => "not_member",
            LobbyError::CannotRemoveLast { .. } => "cannot_remove_last",
            LobbyError::CannotRemoveHost { .. } => "cannot_remove_host",
            LobbyError::NotAuthorized { .. } => "not_authorized",
            LobbyError::InvalidRegion { .. } => "invalid_region",
            LobbyError::InvalidTier { .. } => "invalid_tier",
            LobbyError::RateLimited { .. } => "rate_limited",
            LobbyError::ServiceUnavailable { .. } => "service_unavailable",
            LobbyError::AllFull { .. } => "all_full",
            LobbyError::NoneEligible { .. } => "none_eligible",
            LobbyError::NoneExist { .. } => "none_exist",
            LobbyError::PersistenceWriteFailed { .. } => "persistence_write_failed",
            LobbyError::PartitionNotFound { .. } => "partition_not_found",
            LobbyError::TierTooLow { .. } => "tier_too_low",
            LobbyError::UnknownTier { .. } => "unknown_tier",
            LobbyError::NotReady { .. } => "not_ready",
            LobbyError::CommandsPaused => "commands_paused",
            LobbyError::HostingDisabled => "hosting_disabled",
            LobbyError::ConfigurationError { .. } => "configuration_error",
            LobbyError::InternalError { .. } => "internal_error",
        }
    }

    pub(crate) fn rate_limited(partition: &str, retry_after: Duration) -> Self {
        LobbyError::RateLimited {
            partition: partition.to_string(),
            retry_after_ms: retry_after.num_milliseconds().max(0),
        }
    }

    pub(crate) fn lock_poisoned(what: &str) -> Self {
        LobbyError::InternalError {
            message: format!("Failed to acquire {} lock", what),
        }
    }
}
