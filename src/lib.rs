//! Anteroom - lobby coordination for tier-gated, region-partitioned matchmaking
//!
//! Hosts open lobbies in named partitions, seekers join them by host or by
//! region, and hosts start or cancel them. State survives restarts through
//! snapshots, and every state change is published as an event over AMQP.

pub mod amqp;
pub mod clock;
pub mod config;
pub mod error;
pub mod lobby;
pub mod metrics;
pub mod rank;
pub mod service;
pub mod snapshot;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{LobbyError, LobbyResult, Result};
pub use types::*;

pub use amqp::publisher::EventPublisher;
pub use lobby::{LobbyManager, LobbyStore, PartitionProvider, StaticPartitionProvider};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
