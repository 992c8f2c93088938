//! Prometheus metrics and the HTTP endpoints that expose them

pub mod collector;
pub mod health;

pub use collector::{
    LobbyMetrics, LookupMetrics, MetricsCollector, MetricsTimer, PersistenceMetrics,
    ServiceMetrics,
};
pub use health::{HealthServer, HealthServerConfig, HealthServerState};
