//! Lobby engine
//!
//! [`store::LobbyStore`] owns all lobby state and applies the transitions
//! defined in [`lifecycle`]. [`manager::LobbyManager`] is the command
//! surface on top: it validates input, looks up tiers, publishes events and
//! applies pruning and rate limiting.

pub mod instance;
pub mod lifecycle;
pub mod manager;
pub mod matching;
pub mod provider;
pub mod pruning;
pub mod rate_limit;
pub mod store;

pub use instance::{Lobby, LobbyState};
pub use lifecycle::{Phase, TransitionKind};
pub use manager::{
    Command, CommandReply, CreatedLobby, LobbyManager, LobbyManagerStats, LobbySummary,
    ManagerStatus, PartitionStatus, StartedLobby,
};
pub use matching::{GreedyFillResolver, LobbyResolver, ResolveOutcome};
pub use provider::{PartitionPolicy, PartitionProvider, StaticPartitionProvider};
pub use pruning::PruningPolicy;
pub use rate_limit::ListRateLimiter;
pub use store::LobbyStore;
