//! Service layer: application state, background tasks and health checks

pub mod app;
pub mod health;

pub use app::{AppState, Components, ServiceError};
pub use health::{ComponentCheck, HealthCheck, HealthStatus};
