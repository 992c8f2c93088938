//! Configuration management for the anteroom service
//!
//! Configuration is layered: built-in defaults, an optional TOML file, then
//! `ANTEROOM_*` environment variables. The binary applies CLI flags last.

pub mod app;
pub mod league;
pub mod lobby;

// Re-export commonly used types
pub use app::{
    validate_config, AmqpSettings, AppConfig, PersistenceSettings, RankSettings, ServiceSettings,
};
pub use league::LeagueSettings;
pub use lobby::LobbySettings;
